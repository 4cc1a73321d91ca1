//! Media engine boundary.
//!
//! Capture, codecs, RTP and ICE/DTLS live behind these traits. Transport
//! callbacks that need signaling (`connect`, `produce`, `produceData`) go
//! through a [`TransportSignaler`]; lifecycle callbacks (a producer's
//! transport closing, data channel messages) are posted as [`MediaEvent`]s
//! and consumed by the session's worker loop.

mod observer;

pub use observer::ObserverEngine;

use crate::errors::MediaError;
use crate::store::ProducerSource;
use async_trait::async_trait;
use bytes::Bytes;
use common::types::MediaKind;
use serde_json::Value;
use signaling_protocol::payloads::{NewConsumerRequest, NewDataConsumerRequest, WebRtcTransportInfo};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle events raised by media-engine objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    ProducerTransportClosed { producer_id: String },
    ConsumerTransportClosed { consumer_id: String },
    DataProducerClosed { data_producer_id: String },
    DataConsumerClosed { data_consumer_id: String },
    DataMessage { data_consumer_id: String, payload: Bytes },
    TransportConnectionState { transport_id: String, state: String },
}

/// Where media-engine objects post their events.
pub type MediaEventSender = mpsc::UnboundedSender<MediaEvent>;

/// A captured local track ready to be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub kind: MediaKind,
}

/// Options of a `produce` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProduceOptions {
    pub source: ProducerSource,
    pub app_data: Value,
}

/// Options of a `produce_data` call.
#[derive(Debug, Clone, PartialEq)]
pub struct DataProducerOptions {
    pub label: String,
    pub protocol: String,
    pub ordered: bool,
    pub max_retransmits: Option<u16>,
    pub app_data: Value,
}

/// Signaling round trips issued on behalf of a media transport.
#[async_trait]
pub trait TransportSignaler: Send + Sync {
    /// `connectWebRtcTransport`
    async fn connect(&self, transport_id: &str, dtls_parameters: Value) -> Result<(), MediaError>;

    /// `produce`; returns the server-assigned producer id.
    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: Value,
    ) -> Result<String, MediaError>;

    /// `produceData`; returns the server-assigned data producer id.
    async fn produce_data(
        &self,
        transport_id: &str,
        sctp_stream_parameters: Value,
        label: &str,
        protocol: &str,
        app_data: Value,
    ) -> Result<String, MediaError>;
}

#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    fn is_loaded(&self) -> bool;

    /// Initialize the local capability set. Fails with `AlreadyLoaded` on a second call.
    async fn load(&self, router_rtp_capabilities: &Value) -> Result<(), MediaError>;

    fn rtp_capabilities(&self) -> Result<Value, MediaError>;

    fn sctp_capabilities(&self) -> Result<Value, MediaError>;

    fn can_produce(&self, kind: MediaKind) -> bool;

    fn can_change_camera(&self) -> bool;

    async fn create_send_transport(
        &self,
        info: &WebRtcTransportInfo,
        signaler: Arc<dyn TransportSignaler>,
        events: MediaEventSender,
    ) -> Result<Arc<dyn SendTransport>, MediaError>;

    async fn create_recv_transport(
        &self,
        info: &WebRtcTransportInfo,
        signaler: Arc<dyn TransportSignaler>,
        events: MediaEventSender,
    ) -> Result<Arc<dyn RecvTransport>, MediaError>;

    async fn acquire_track(&self, kind: MediaKind) -> Result<LocalTrack, MediaError>;

    async fn switch_camera(&self) -> Result<(), MediaError>;

    /// Release capture devices.
    fn release(&self);
}

#[async_trait]
pub trait SendTransport: Send + Sync {
    fn id(&self) -> &str;

    async fn produce(
        &self,
        track: LocalTrack,
        options: ProduceOptions,
    ) -> Result<Arc<dyn Producer>, MediaError>;

    async fn produce_data(
        &self,
        options: DataProducerOptions,
    ) -> Result<Arc<dyn DataProducer>, MediaError>;

    async fn restart_ice(&self, ice_parameters: Value) -> Result<(), MediaError>;

    fn close(&self);
}

#[async_trait]
pub trait RecvTransport: Send + Sync {
    fn id(&self) -> &str;

    async fn consume(&self, request: &NewConsumerRequest) -> Result<Arc<dyn Consumer>, MediaError>;

    async fn consume_data(
        &self,
        request: &NewDataConsumerRequest,
    ) -> Result<Arc<dyn DataConsumer>, MediaError>;

    async fn restart_ice(&self, ice_parameters: Value) -> Result<(), MediaError>;

    fn close(&self);
}

pub trait Producer: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn is_paused(&self) -> bool;
    fn pause(&self);
    fn resume(&self);
    fn close(&self);
}

pub trait Consumer: Send + Sync {
    fn id(&self) -> &str;
    fn producer_id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn is_paused(&self) -> bool;
    fn pause(&self);
    fn resume(&self);
    fn close(&self);
}

pub trait DataProducer: Send + Sync {
    fn id(&self) -> &str;
    fn label(&self) -> &str;
    fn send(&self, payload: Bytes) -> Result<(), MediaError>;
    fn close(&self);
}

pub trait DataConsumer: Send + Sync {
    fn id(&self) -> &str;
    fn label(&self) -> &str;
    fn close(&self);
}
