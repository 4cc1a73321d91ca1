//! Mock media engine for room client testing.
//!
//! Transports created by the mock behave like their real counterparts at
//! the signaling boundary: the first `produce`/`consume` connects the
//! transport through the session's [`TransportSignaler`], and `produce`
//! asks the server for the producer id. Everything created is recorded so
//! tests can inspect it afterwards.
//!
//! # Example
//!
//! ```rust,ignore
//! use room_test_utils::MockMediaEngine;
//!
//! let engine = MockMediaEngine::builder()
//!     .without_video()
//!     .fail_consume("decoder unavailable")
//!     .build();
//!
//! // Pass `engine.clone()` to RoomClient::spawn...
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use common::types::MediaKind;
use room_client::errors::MediaError;
use room_client::media::{
    Consumer, DataConsumer, DataProducer, DataProducerOptions, LocalTrack, MediaEngine,
    MediaEvent, MediaEventSender, ProduceOptions, Producer, RecvTransport, SendTransport,
    TransportSignaler,
};
use serde_json::{json, Value};
use signaling_protocol::payloads::{NewConsumerRequest, NewDataConsumerRequest, WebRtcTransportInfo};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Mock media engine.
#[derive(Debug)]
pub struct MockMediaEngine {
    can_produce_audio: bool,
    can_produce_video: bool,
    can_change_camera: bool,
    fail_consume: Option<String>,
    fail_track: Option<MediaKind>,
    capabilities: Mutex<Option<Value>>,
    load_calls: AtomicUsize,
    camera_switches: AtomicUsize,
    released: AtomicBool,
    send_transports: Mutex<Vec<Arc<MockSendTransport>>>,
    recv_transports: Mutex<Vec<Arc<MockRecvTransport>>>,
}

impl Default for MockMediaEngine {
    fn default() -> Self {
        MockMediaEngineBuilder::default().build_engine()
    }
}

impl MockMediaEngine {
    /// Create a new MockMediaEngine builder.
    #[must_use]
    pub fn builder() -> MockMediaEngineBuilder {
        MockMediaEngineBuilder::default()
    }

    /// Number of `load` calls.
    #[must_use]
    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    /// Number of successful camera switches.
    #[must_use]
    pub fn camera_switches(&self) -> usize {
        self.camera_switches.load(Ordering::SeqCst)
    }

    /// Whether `release` was called.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Every send transport created so far, oldest first.
    #[must_use]
    pub fn send_transports(&self) -> Vec<Arc<MockSendTransport>> {
        self.send_transports.lock().unwrap().clone()
    }

    /// Every receive transport created so far, oldest first.
    #[must_use]
    pub fn recv_transports(&self) -> Vec<Arc<MockRecvTransport>> {
        self.recv_transports.lock().unwrap().clone()
    }

    /// The most recent send transport.
    #[must_use]
    pub fn send_transport(&self) -> Option<Arc<MockSendTransport>> {
        self.send_transports.lock().unwrap().last().cloned()
    }

    /// The most recent receive transport.
    #[must_use]
    pub fn recv_transport(&self) -> Option<Arc<MockRecvTransport>> {
        self.recv_transports.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    fn is_loaded(&self) -> bool {
        self.capabilities.lock().unwrap().is_some()
    }

    async fn load(&self, router_rtp_capabilities: &Value) -> Result<(), MediaError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        let mut capabilities = self.capabilities.lock().unwrap();
        if capabilities.is_some() {
            return Err(MediaError::AlreadyLoaded);
        }
        *capabilities = Some(router_rtp_capabilities.clone());
        Ok(())
    }

    fn rtp_capabilities(&self) -> Result<Value, MediaError> {
        self.capabilities
            .lock()
            .unwrap()
            .clone()
            .ok_or(MediaError::NotLoaded)
    }

    fn sctp_capabilities(&self) -> Result<Value, MediaError> {
        if !self.is_loaded() {
            return Err(MediaError::NotLoaded);
        }
        Ok(json!({ "numStreams": { "OS": 1024, "MIS": 1024 } }))
    }

    fn can_produce(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.can_produce_audio,
            MediaKind::Video => self.can_produce_video,
        }
    }

    fn can_change_camera(&self) -> bool {
        self.can_change_camera
    }

    async fn create_send_transport(
        &self,
        info: &WebRtcTransportInfo,
        signaler: Arc<dyn TransportSignaler>,
        events: MediaEventSender,
    ) -> Result<Arc<dyn SendTransport>, MediaError> {
        let transport = Arc::new(MockSendTransport {
            state: TransportState::new(&info.id, signaler, events),
            producers: Mutex::new(Vec::new()),
            data_producers: Mutex::new(Vec::new()),
        });
        self.send_transports
            .lock()
            .unwrap()
            .push(Arc::clone(&transport));
        Ok(transport)
    }

    async fn create_recv_transport(
        &self,
        info: &WebRtcTransportInfo,
        signaler: Arc<dyn TransportSignaler>,
        events: MediaEventSender,
    ) -> Result<Arc<dyn RecvTransport>, MediaError> {
        let transport = Arc::new(MockRecvTransport {
            state: TransportState::new(&info.id, signaler, events),
            fail_consume: self.fail_consume.clone(),
            consumers: Mutex::new(Vec::new()),
            data_consumers: Mutex::new(Vec::new()),
        });
        self.recv_transports
            .lock()
            .unwrap()
            .push(Arc::clone(&transport));
        Ok(transport)
    }

    async fn acquire_track(&self, kind: MediaKind) -> Result<LocalTrack, MediaError> {
        if self.fail_track == Some(kind) {
            return Err(MediaError::Engine(format!("no {kind} device")));
        }
        Ok(LocalTrack {
            id: format!("{kind}-track"),
            kind,
        })
    }

    async fn switch_camera(&self) -> Result<(), MediaError> {
        if !self.can_change_camera {
            return Err(MediaError::Unsupported("single camera".to_string()));
        }
        self.camera_switches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Builder for MockMediaEngine configuration.
#[derive(Debug)]
pub struct MockMediaEngineBuilder {
    can_produce_audio: bool,
    can_produce_video: bool,
    can_change_camera: bool,
    fail_consume: Option<String>,
    fail_track: Option<MediaKind>,
}

impl Default for MockMediaEngineBuilder {
    fn default() -> Self {
        Self {
            can_produce_audio: true,
            can_produce_video: true,
            can_change_camera: true,
            fail_consume: None,
            fail_track: None,
        }
    }
}

impl MockMediaEngineBuilder {
    /// Report that audio cannot be produced.
    #[must_use]
    pub fn without_audio(mut self) -> Self {
        self.can_produce_audio = false;
        self
    }

    /// Report that video cannot be produced.
    #[must_use]
    pub fn without_video(mut self) -> Self {
        self.can_produce_video = false;
        self
    }

    /// Report a single camera.
    #[must_use]
    pub fn single_camera(mut self) -> Self {
        self.can_change_camera = false;
        self
    }

    /// Make every `consume` and `consume_data` fail with `reason`.
    #[must_use]
    pub fn fail_consume(mut self, reason: impl Into<String>) -> Self {
        self.fail_consume = Some(reason.into());
        self
    }

    /// Make capture of `kind` fail.
    #[must_use]
    pub fn fail_track(mut self, kind: MediaKind) -> Self {
        self.fail_track = Some(kind);
        self
    }

    /// Build the MockMediaEngine.
    #[must_use]
    pub fn build(self) -> Arc<MockMediaEngine> {
        Arc::new(self.build_engine())
    }

    fn build_engine(self) -> MockMediaEngine {
        MockMediaEngine {
            can_produce_audio: self.can_produce_audio,
            can_produce_video: self.can_produce_video,
            can_change_camera: self.can_change_camera,
            fail_consume: self.fail_consume,
            fail_track: self.fail_track,
            capabilities: Mutex::new(None),
            load_calls: AtomicUsize::new(0),
            camera_switches: AtomicUsize::new(0),
            released: AtomicBool::new(false),
            send_transports: Mutex::new(Vec::new()),
            recv_transports: Mutex::new(Vec::new()),
        }
    }
}

// ============================================================================
// Transports
// ============================================================================

struct TransportState {
    id: String,
    signaler: Arc<dyn TransportSignaler>,
    events: MediaEventSender,
    connected: AtomicBool,
    closed: AtomicBool,
    ice_restarts: Mutex<Vec<Value>>,
}

impl std::fmt::Debug for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportState")
            .field("id", &self.id)
            .field("connected", &self.connected)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl TransportState {
    fn new(id: &str, signaler: Arc<dyn TransportSignaler>, events: MediaEventSender) -> Self {
        Self {
            id: id.to_string(),
            signaler,
            events,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            ice_restarts: Mutex::new(Vec::new()),
        }
    }

    /// Connect through the signaler on first use, like a DTLS handshake would.
    async fn ensure_connected(&self) -> Result<(), MediaError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MediaError::Engine("transport closed".to_string()));
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self
            .signaler
            .connect(&self.id, json!({ "role": "client", "fingerprints": [] }))
            .await;
        if result.is_err() {
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }

    fn emit(&self, event: MediaEvent) {
        let _ = self.events.send(event);
    }
}

/// Recording send transport.
#[derive(Debug)]
pub struct MockSendTransport {
    state: TransportState,
    producers: Mutex<Vec<Arc<MockProducer>>>,
    data_producers: Mutex<Vec<Arc<MockDataProducer>>>,
}

impl MockSendTransport {
    #[must_use]
    pub fn transport_id(&self) -> &str {
        &self.state.id
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// ICE parameters passed to every `restart_ice`.
    #[must_use]
    pub fn ice_restarts(&self) -> Vec<Value> {
        self.state.ice_restarts.lock().unwrap().clone()
    }

    #[must_use]
    pub fn producers(&self) -> Vec<Arc<MockProducer>> {
        self.producers.lock().unwrap().clone()
    }

    #[must_use]
    pub fn data_producers(&self) -> Vec<Arc<MockDataProducer>> {
        self.data_producers.lock().unwrap().clone()
    }

    /// Simulate the underlying transport of a producer closing.
    pub fn close_producer_transport(&self, producer_id: &str) {
        self.state.emit(MediaEvent::ProducerTransportClosed {
            producer_id: producer_id.to_string(),
        });
    }
}

#[async_trait]
impl SendTransport for MockSendTransport {
    fn id(&self) -> &str {
        &self.state.id
    }

    async fn produce(
        &self,
        track: LocalTrack,
        options: ProduceOptions,
    ) -> Result<Arc<dyn Producer>, MediaError> {
        self.state.ensure_connected().await?;
        let id = self
            .state
            .signaler
            .produce(
                &self.state.id,
                track.kind,
                json!({ "mid": track.id, "codecs": [] }),
                options.app_data,
            )
            .await?;
        let producer = Arc::new(MockProducer::new(&id, track.kind));
        self.producers.lock().unwrap().push(Arc::clone(&producer));
        Ok(producer)
    }

    async fn produce_data(
        &self,
        options: DataProducerOptions,
    ) -> Result<Arc<dyn DataProducer>, MediaError> {
        self.state.ensure_connected().await?;
        let id = self
            .state
            .signaler
            .produce_data(
                &self.state.id,
                json!({
                    "ordered": options.ordered,
                    "maxRetransmits": options.max_retransmits,
                }),
                &options.label,
                &options.protocol,
                options.app_data,
            )
            .await?;
        let data_producer = Arc::new(MockDataProducer {
            id,
            label: options.label,
            ordered: options.ordered,
            max_retransmits: options.max_retransmits,
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.data_producers
            .lock()
            .unwrap()
            .push(Arc::clone(&data_producer));
        Ok(data_producer)
    }

    async fn restart_ice(&self, ice_parameters: Value) -> Result<(), MediaError> {
        self.state.ice_restarts.lock().unwrap().push(ice_parameters);
        Ok(())
    }

    fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

/// Recording receive transport.
#[derive(Debug)]
pub struct MockRecvTransport {
    state: TransportState,
    fail_consume: Option<String>,
    consumers: Mutex<Vec<Arc<MockConsumer>>>,
    data_consumers: Mutex<Vec<Arc<MockDataConsumer>>>,
}

impl MockRecvTransport {
    #[must_use]
    pub fn transport_id(&self) -> &str {
        &self.state.id
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// ICE parameters passed to every `restart_ice`.
    #[must_use]
    pub fn ice_restarts(&self) -> Vec<Value> {
        self.state.ice_restarts.lock().unwrap().clone()
    }

    #[must_use]
    pub fn consumers(&self) -> Vec<Arc<MockConsumer>> {
        self.consumers.lock().unwrap().clone()
    }

    #[must_use]
    pub fn consumer(&self, id: &str) -> Option<Arc<MockConsumer>> {
        self.consumers
            .lock()
            .unwrap()
            .iter()
            .find(|consumer| consumer.id == id)
            .cloned()
    }

    #[must_use]
    pub fn data_consumers(&self) -> Vec<Arc<MockDataConsumer>> {
        self.data_consumers.lock().unwrap().clone()
    }

    /// Simulate a message arriving on a data consumer.
    pub fn deliver_data(&self, data_consumer_id: &str, text: &str) {
        self.state.emit(MediaEvent::DataMessage {
            data_consumer_id: data_consumer_id.to_string(),
            payload: Bytes::from(text.to_string()),
        });
    }

    /// Simulate the underlying transport of a consumer closing.
    pub fn close_consumer_transport(&self, consumer_id: &str) {
        self.state.emit(MediaEvent::ConsumerTransportClosed {
            consumer_id: consumer_id.to_string(),
        });
    }
}

#[async_trait]
impl RecvTransport for MockRecvTransport {
    fn id(&self) -> &str {
        &self.state.id
    }

    async fn consume(&self, request: &NewConsumerRequest) -> Result<Arc<dyn Consumer>, MediaError> {
        if let Some(reason) = &self.fail_consume {
            return Err(MediaError::Engine(reason.clone()));
        }
        self.state.ensure_connected().await?;
        let consumer = Arc::new(MockConsumer {
            id: request.id.clone(),
            producer_id: request.producer_id.clone(),
            kind: request.kind,
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.consumers.lock().unwrap().push(Arc::clone(&consumer));
        Ok(consumer)
    }

    async fn consume_data(
        &self,
        request: &NewDataConsumerRequest,
    ) -> Result<Arc<dyn DataConsumer>, MediaError> {
        if let Some(reason) = &self.fail_consume {
            return Err(MediaError::Engine(reason.clone()));
        }
        self.state.ensure_connected().await?;
        let data_consumer = Arc::new(MockDataConsumer {
            id: request.id.clone(),
            label: request.label.clone(),
            closed: AtomicBool::new(false),
        });
        self.data_consumers
            .lock()
            .unwrap()
            .push(Arc::clone(&data_consumer));
        Ok(data_consumer)
    }

    async fn restart_ice(&self, ice_parameters: Value) -> Result<(), MediaError> {
        self.state.ice_restarts.lock().unwrap().push(ice_parameters);
        Ok(())
    }

    fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Producers and consumers
// ============================================================================

#[derive(Debug)]
pub struct MockProducer {
    id: String,
    kind: MediaKind,
    paused: AtomicBool,
    closed: AtomicBool,
}

impl MockProducer {
    fn new(id: &str, kind: MediaKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Producer for MockProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MockConsumer {
    id: String,
    producer_id: String,
    kind: MediaKind,
    paused: AtomicBool,
    closed: AtomicBool,
}

impl MockConsumer {
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Consumer for MockConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn producer_id(&self) -> &str {
        &self.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MockDataProducer {
    id: String,
    label: String,
    ordered: bool,
    max_retransmits: Option<u16>,
    sent: Mutex<Vec<Bytes>>,
    closed: AtomicBool,
}

impl MockDataProducer {
    #[must_use]
    pub fn ordered(&self) -> bool {
        self.ordered
    }

    #[must_use]
    pub fn max_retransmits(&self) -> Option<u16> {
        self.max_retransmits
    }

    /// Payloads sent so far, decoded as UTF-8.
    #[must_use]
    pub fn sent_text(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|payload| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl DataProducer for MockDataProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn send(&self, payload: Bytes) -> Result<(), MediaError> {
        if self.is_closed() {
            return Err(MediaError::Engine("data producer closed".to_string()));
        }
        self.sent.lock().unwrap().push(payload);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MockDataConsumer {
    id: String,
    label: String,
    closed: AtomicBool,
}

impl MockDataConsumer {
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl DataConsumer for MockDataConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
