//! `RoomActor` - the single task that owns a room session.
//!
//! Every mutation of the session goes through this actor: commands from the
//! [`RoomClient`](super::RoomClient) handle, events from the signaling peer,
//! and lifecycle events from the media engine are all consumed by one
//! `tokio::select!` loop. Signaling round trips are awaited inline, so the
//! commands of one session never interleave. A close or cancel abandons the
//! handler in flight.

use super::messages::RoomCommand;
use super::signaler::RpcSignaler;
use crate::config::RoomConfig;
use crate::errors::{MediaError, RoomError};
use crate::media::{
    Consumer, DataProducerOptions, MediaEngine, MediaEvent, MediaEventSender, ProduceOptions,
    Producer, RecvTransport, SendTransport, TransportSignaler,
};
use crate::observability::metrics;
use crate::registry::Registries;
use crate::rpc::{InboundNotification, PeerEvent, Responder, RpcPeer, ServerRequest};
use crate::store::{set_field, Notify, PauseOrigin, ProducerSource, RoomStore};
use crate::transport::Connector;
use bytes::Bytes;
use common::types::{ConnectionState, MediaKind};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use signaling_protocol::message::empty_data;
use signaling_protocol::methods::{ClientMethod, NotificationMethod, ServerRequestMethod};
use signaling_protocol::payloads::{
    ActiveSpeakerNotification, ChangeDisplayNameRequest, ConsumerIdPayload,
    ConsumerLayersChangedNotification, ConsumerScoreNotification, CreateWebRtcTransportRequest,
    DataConsumerClosedNotification, DownlinkBweNotification, JoinRequest, JoinResponse,
    NewConsumerRequest, NewDataConsumerRequest, PeerClosedNotification,
    PeerDisplayNameChangedNotification, PeerInfo, ProducerIdPayload, ProducerScoreNotification,
    TransportIdPayload, WebRtcTransportInfo,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Label and protocol of the chat data channel.
pub(crate) const CHAT_LABEL: &str = "chat";

/// Retransmissions allowed on the (unordered) chat data channel.
const CHAT_MAX_RETRANSMITS: u16 = 1;

/// Reject reason when the session does not consume.
pub(crate) const NOT_CONSUMING_REASON: &str = "I do not want to consume";

/// Reject reason when the session does not use data channels.
pub(crate) const NO_DATA_CHANNELS_REASON: &str = "I do not want DataChannels";

pub(crate) struct RoomActor {
    config: RoomConfig,
    engine: Arc<dyn MediaEngine>,
    connector: Arc<dyn Connector>,
    store: Arc<RoomStore>,
    registries: Arc<Registries>,
    receiver: mpsc::UnboundedReceiver<RoomCommand>,
    /// Weak so that dropping every handle still ends the session.
    mailbox: mpsc::WeakUnboundedSender<RoomCommand>,
    peer: Option<RpcPeer>,
    peer_events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
    media_tx: MediaEventSender,
    media_rx: mpsc::UnboundedReceiver<MediaEvent>,
    send_transport: Option<Arc<dyn SendTransport>>,
    recv_transport: Option<Arc<dyn RecvTransport>>,
    /// Shared with the handle; set once a close has been requested or performed.
    closed: Arc<AtomicBool>,
    cancel_token: CancellationToken,
    /// Child of `cancel_token`, cancelled by `RoomClient::close`.
    close_token: CancellationToken,
    is_closed: bool,
}

impl RoomActor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: RoomConfig,
        engine: Arc<dyn MediaEngine>,
        connector: Arc<dyn Connector>,
        store: Arc<RoomStore>,
        registries: Arc<Registries>,
        receiver: mpsc::UnboundedReceiver<RoomCommand>,
        mailbox: mpsc::WeakUnboundedSender<RoomCommand>,
        closed: Arc<AtomicBool>,
        cancel_token: CancellationToken,
        close_token: CancellationToken,
    ) -> Self {
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        Self {
            config,
            engine,
            connector,
            store,
            registries,
            receiver,
            mailbox,
            peer: None,
            peer_events: None,
            media_tx,
            media_rx,
            send_transport: None,
            recv_transport: None,
            closed,
            cancel_token,
            close_token,
            is_closed: false,
        }
    }

    /// Run the actor loop until the session closes.
    #[instrument(
        skip_all,
        name = "room.actor",
        fields(room_id = %self.config.room_id, peer_id = %self.config.peer_id)
    )]
    pub(crate) async fn run(mut self) {
        debug!(target: "room.actor", "RoomActor started");

        let close_token = self.close_token.clone();

        loop {
            tokio::select! {
                biased;

                () = close_token.cancelled() => {
                    let reason = self.close_reason();
                    self.close_session(reason).await;
                    break;
                }

                command = self.receiver.recv() => {
                    let Some(command) = command else {
                        self.close_session("all handles dropped").await;
                        break;
                    };
                    if until_closed(&close_token, self.handle_command(command)).await.is_none() {
                        let reason = self.close_reason();
                        self.close_session(reason).await;
                        break;
                    }
                }

                event = next_peer_event(&mut self.peer_events) => {
                    let Some(event) = event else {
                        self.peer_events = None;
                        continue;
                    };
                    let reason = match until_closed(&close_token, self.handle_peer_event(event)).await {
                        Some(None) => continue,
                        Some(Some(reason)) => reason,
                        None => self.close_reason(),
                    };
                    self.close_session(reason).await;
                    break;
                }

                Some(event) = self.media_rx.recv() => {
                    self.handle_media_event(event);
                }
            }
        }

        debug!(target: "room.actor", "RoomActor stopped");
    }

    async fn handle_command(&mut self, command: RoomCommand) {
        debug!(target: "room.actor", command = command.name(), "Handling command");

        match command {
            RoomCommand::Join => self.join(),
            RoomCommand::EnableMic => self.enable_producer(ProducerSource::Mic).await,
            RoomCommand::DisableMic => self.disable_producer(ProducerSource::Mic).await,
            RoomCommand::MuteMic => self.set_mic_paused(true).await,
            RoomCommand::UnmuteMic => self.set_mic_paused(false).await,
            RoomCommand::EnableCam => self.enable_producer(ProducerSource::Cam).await,
            RoomCommand::DisableCam => self.disable_producer(ProducerSource::Cam).await,
            RoomCommand::ChangeCam => self.change_cam().await,
            RoomCommand::EnableAudioOnly => self.enable_audio_only().await,
            RoomCommand::DisableAudioOnly => self.disable_audio_only().await,
            RoomCommand::MuteAudio => self.set_audio_muted(true).await,
            RoomCommand::UnmuteAudio => self.set_audio_muted(false).await,
            RoomCommand::RestartIce => self.restart_ice().await,
            RoomCommand::ChangeDisplayName { display_name } => {
                self.change_display_name(display_name).await;
            }
            RoomCommand::RequestConsumerKeyFrame { consumer_id } => {
                self.request_consumer_key_frame(&consumer_id).await;
            }
            RoomCommand::EnableChatDataProducer => self.enable_chat_data_producer().await,
            RoomCommand::SendChatMessage { text } => self.send_chat_message(text).await,
            RoomCommand::Flush { respond_to } => {
                let _ = respond_to.send(());
            }
        }
    }

    fn close_reason(&self) -> &'static str {
        if self.cancel_token.is_cancelled() {
            "cancelled"
        } else {
            "requested"
        }
    }

    fn post(&self, command: RoomCommand) {
        if let Some(mailbox) = self.mailbox.upgrade() {
            let _ = mailbox.send(command);
        }
    }

    // ========================================================================
    // Join
    // ========================================================================

    fn join(&mut self) {
        if self.store.state() != ConnectionState::New {
            warn!(target: "room.actor", state = ?self.store.state(), "Ignoring join outside NEW");
            return;
        }

        self.store.set_room_state(ConnectionState::Connecting);
        let url = self.config.protoo_url();
        info!(target: "room.actor", url = %url, "Connecting to room");

        let (peer, events) = RpcPeer::connect(
            url,
            Arc::clone(&self.connector),
            self.config.reconnect,
            self.config.server_request_timeout,
        );
        self.peer = Some(peer);
        self.peer_events = Some(events);
    }

    /// Join sequence, run on every (re)opening of the signaling channel.
    #[instrument(skip_all, name = "room.actor.join")]
    async fn join_room(&mut self) -> Result<(), RoomError> {
        let peer = self
            .peer
            .clone()
            .ok_or_else(|| RoomError::InvalidState("no signaling peer".to_string()))?;
        self.dispose_transports();

        let router_rtp_capabilities = peer
            .request(ClientMethod::GetRouterRtpCapabilities, &empty_data())
            .await?;
        if !self.engine.is_loaded() {
            self.engine.load(&router_rtp_capabilities).await?;
        }

        let signaler: Arc<dyn TransportSignaler> = Arc::new(RpcSignaler::new(peer.clone()));

        if self.config.produce {
            let info: WebRtcTransportInfo = peer
                .request_as(ClientMethod::CreateWebRtcTransport, &self.transport_request(true)?)
                .await?;
            let transport = self
                .engine
                .create_send_transport(&info, Arc::clone(&signaler), self.media_tx.clone())
                .await?;
            debug!(target: "room.actor", transport_id = %transport.id(), "Send transport created");
            self.send_transport = Some(transport);
        }

        if self.config.consume {
            let info: WebRtcTransportInfo = peer
                .request_as(ClientMethod::CreateWebRtcTransport, &self.transport_request(false)?)
                .await?;
            let transport = self
                .engine
                .create_recv_transport(&info, Arc::clone(&signaler), self.media_tx.clone())
                .await?;
            debug!(target: "room.actor", transport_id = %transport.id(), "Receive transport created");
            self.recv_transport = Some(transport);
        }

        let request = JoinRequest {
            display_name: self.store.me().snapshot().display_name,
            device: self.config.device.clone(),
            rtp_capabilities: if self.config.consume {
                Some(self.engine.rtp_capabilities()?)
            } else {
                None
            },
            sctp_capabilities: if self.config.consume && self.config.use_data_channel {
                Some(self.engine.sctp_capabilities()?)
            } else {
                None
            },
        };
        let response: JoinResponse = peer.request_as(ClientMethod::Join, &request).await?;

        self.store.set_room_state(ConnectionState::Connected);
        self.store.notify(Notify::info("You are in the room!"));

        self.registries.peers.clear();
        info!(target: "room.actor", peers = response.peers.len(), "Joined room");
        for info in response.peers {
            self.registries.peers.add(info);
        }

        if self.config.produce {
            let can_send_mic = self.engine.can_produce(MediaKind::Audio);
            let can_send_cam = self.engine.can_produce(MediaKind::Video);
            let can_change_cam = self.engine.can_change_camera();
            self.store.modify_me(|me| {
                let mic = set_field(&mut me.can_send_mic, can_send_mic);
                let cam = set_field(&mut me.can_send_cam, can_send_cam);
                let change = set_field(&mut me.can_change_cam, can_change_cam);
                mic || cam || change
            });

            self.post(RoomCommand::EnableMic);
            self.post(RoomCommand::EnableCam);
            if self.config.use_data_channel {
                self.post(RoomCommand::EnableChatDataProducer);
            }
        }

        Ok(())
    }

    fn transport_request(&self, producing: bool) -> Result<CreateWebRtcTransportRequest, RoomError> {
        Ok(CreateWebRtcTransportRequest {
            force_tcp: self.config.force_tcp,
            producing,
            consuming: !producing,
            sctp_capabilities: if self.config.use_data_channel {
                Some(self.engine.sctp_capabilities()?)
            } else {
                None
            },
        })
    }

    /// Close every media resource and both transports.
    fn dispose_transports(&mut self) {
        self.registries.dispose_media().close_all();
        if let Some(transport) = self.send_transport.take() {
            transport.close();
        }
        if let Some(transport) = self.recv_transport.take() {
            transport.close();
        }
    }

    // ========================================================================
    // Peer events
    // ========================================================================

    /// Returns the reason to close the session, if the event ends it.
    async fn handle_peer_event(&mut self, event: PeerEvent) -> Option<&'static str> {
        match event {
            PeerEvent::Open => {
                if let Err(e) = self.join_room().await {
                    error!(target: "room.actor", error = %e, "Join failed");
                    self.store
                        .notify(Notify::error(format!("Could not join the room: {e}")));
                    return Some("join failed");
                }
            }
            PeerEvent::Failed => {
                warn!(target: "room.actor", "Signaling connection failed");
                self.store.notify(Notify::error("WebSocket connection failed"));
                self.store.set_room_state(ConnectionState::Connecting);
            }
            PeerEvent::Disconnected => {
                warn!(target: "room.actor", "Signaling disconnected");
                self.store.notify(Notify::error("WebSocket disconnected"));
                self.store.set_room_state(ConnectionState::Connecting);
                self.dispose_transports();
            }
            PeerEvent::Closed => return Some("signaling closed"),
            PeerEvent::Request(request) => self.handle_server_request(request).await,
            PeerEvent::Notification(notification) => self.handle_notification(notification),
        }
        None
    }

    // ========================================================================
    // Server requests
    // ========================================================================

    #[instrument(skip_all, name = "room.actor.server_request", fields(method = %request.method().as_str()))]
    async fn handle_server_request(&mut self, request: ServerRequest) {
        let (method, data, responder) = request.into_parts();
        match method {
            ServerRequestMethod::NewConsumer => match self.new_consumer(data).await {
                Ok(request) => {
                    if !accept(responder, "newConsumer") {
                        // Unacknowledged consumers are never resumed server side.
                        if let Some(consumer) = self.registries.remove_consumer(&request.id) {
                            consumer.close();
                        }
                        return;
                    }
                    if request.kind == MediaKind::Video && self.store.me().snapshot().audio_only {
                        self.pause_consumer(&request.id).await;
                    }
                }
                Err(e) => reject(responder, "newConsumer", &e),
            },
            ServerRequestMethod::NewDataConsumer => match self.new_data_consumer(data).await {
                Ok(data_consumer_id) => {
                    if !accept(responder, "newDataConsumer") {
                        if let Some(data_consumer) =
                            self.registries.remove_data_consumer(&data_consumer_id)
                        {
                            data_consumer.close();
                        }
                    }
                }
                Err(e) => reject(responder, "newDataConsumer", &e),
            },
            ServerRequestMethod::Unknown(name) => {
                warn!(target: "room.actor", method = %name, "Unknown server request");
                if let Err(e) = responder.reject(403, format!("unknown method {name}")) {
                    warn!(target: "room.actor", error = %e, "Could not reject server request");
                }
                metrics::record_server_request("unknown", "reject");
            }
        }
    }

    async fn new_consumer(&mut self, data: Value) -> Result<NewConsumerRequest, RoomError> {
        if !self.config.consume {
            return Err(RoomError::Capability(NOT_CONSUMING_REASON.to_string()));
        }
        let request: NewConsumerRequest = serde_json::from_value(data)?;

        let consumer = match self.consume(&request).await {
            Ok(consumer) => consumer,
            Err(e) => {
                error!(target: "room.actor", consumer_id = %request.id, error = %e, "Consume failed");
                self.store
                    .notify(Notify::error(format!("Error creating a Consumer: {e}")));
                return Err(e.into());
            }
        };

        debug!(
            target: "room.actor",
            consumer_id = %request.id,
            peer_id = %request.peer_id,
            kind = %request.kind,
            "Consumer created"
        );
        self.registries.add_consumer(consumer, &request);
        Ok(request)
    }

    async fn consume(&self, request: &NewConsumerRequest) -> Result<Arc<dyn Consumer>, MediaError> {
        let transport = self
            .recv_transport
            .clone()
            .ok_or_else(|| MediaError::Engine("no receive transport".to_string()))?;
        transport.consume(request).await
    }

    /// Returns the id of the registered data consumer.
    async fn new_data_consumer(&mut self, data: Value) -> Result<String, RoomError> {
        if !self.config.consume {
            return Err(RoomError::Capability(NOT_CONSUMING_REASON.to_string()));
        }
        if !self.config.use_data_channel {
            return Err(RoomError::Capability(NO_DATA_CHANNELS_REASON.to_string()));
        }
        let request: NewDataConsumerRequest = serde_json::from_value(data)?;

        let transport = self
            .recv_transport
            .clone()
            .ok_or_else(|| MediaError::Engine("no receive transport".to_string()));
        let result = match transport {
            Ok(transport) => transport.consume_data(&request).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(data_consumer) => {
                debug!(target: "room.actor", data_consumer_id = %request.id, label = %request.label, "DataConsumer created");
                self.registries.add_data_consumer(data_consumer, &request);
                Ok(request.id)
            }
            Err(e) => {
                error!(target: "room.actor", data_consumer_id = %request.id, error = %e, "Data consume failed");
                self.store
                    .notify(Notify::error(format!("Error creating a DataConsumer: {e}")));
                Err(e.into())
            }
        }
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    fn handle_notification(&mut self, notification: InboundNotification) {
        let InboundNotification { method, data } = notification;
        match &method {
            NotificationMethod::ProducerScore => {
                if let Some(n) = parse::<ProducerScoreNotification>(&method, data) {
                    self.registries.set_producer_score(&n.producer_id, n.score);
                }
            }
            NotificationMethod::NewPeer => {
                if let Some(peer) = parse::<PeerInfo>(&method, data) {
                    self.store.notify(Notify::info(format!(
                        "{} has joined the room",
                        peer.display_name
                    )));
                    self.registries.peers.add(peer);
                }
            }
            NotificationMethod::PeerClosed => {
                if let Some(n) = parse::<PeerClosedNotification>(&method, data) {
                    self.registries.peers.remove(&n.peer_id);
                }
            }
            NotificationMethod::PeerDisplayNameChanged => {
                if let Some(n) = parse::<PeerDisplayNameChangedNotification>(&method, data) {
                    self.registries
                        .peers
                        .set_display_name(&n.peer_id, &n.display_name);
                    self.store.notify(Notify::info(format!(
                        "{} is now {}",
                        n.old_display_name, n.display_name
                    )));
                }
            }
            NotificationMethod::ConsumerClosed => {
                if let Some(n) = parse::<ConsumerIdPayload>(&method, data) {
                    if let Some(consumer) = self.registries.remove_consumer(&n.consumer_id) {
                        consumer.close();
                    }
                }
            }
            NotificationMethod::ConsumerPaused => {
                if let Some(n) = parse::<ConsumerIdPayload>(&method, data) {
                    self.registries
                        .set_consumer_paused(&n.consumer_id, PauseOrigin::Remote, true);
                }
            }
            NotificationMethod::ConsumerResumed => {
                if let Some(n) = parse::<ConsumerIdPayload>(&method, data) {
                    self.registries
                        .set_consumer_paused(&n.consumer_id, PauseOrigin::Remote, false);
                }
            }
            NotificationMethod::ConsumerLayersChanged => {
                if let Some(n) = parse::<ConsumerLayersChangedNotification>(&method, data) {
                    self.registries.set_consumer_layers(&n);
                }
            }
            NotificationMethod::ConsumerScore => {
                if let Some(n) = parse::<ConsumerScoreNotification>(&method, data) {
                    self.registries.set_consumer_score(&n.consumer_id, n.score);
                }
            }
            NotificationMethod::ActiveSpeaker => {
                if let Some(n) = parse::<ActiveSpeakerNotification>(&method, data) {
                    self.store
                        .modify_room(|room| set_field(&mut room.active_speaker_id, n.peer_id));
                }
            }
            NotificationMethod::DataConsumerClosed => {
                if let Some(n) = parse::<DataConsumerClosedNotification>(&method, data) {
                    if let Some(data_consumer) =
                        self.registries.remove_data_consumer(&n.data_consumer_id)
                    {
                        data_consumer.close();
                    }
                }
            }
            NotificationMethod::DownlinkBwe => {
                if let Some(n) = parse::<DownlinkBweNotification>(&method, data) {
                    debug!(
                        target: "room.actor",
                        desired_bitrate = ?n.desired_bitrate,
                        effective_desired_bitrate = ?n.effective_desired_bitrate,
                        available_bitrate = ?n.available_bitrate,
                        "Downlink BWE"
                    );
                }
            }
            NotificationMethod::Unknown(name) => {
                warn!(target: "room.actor", method = %name, "Unknown notification");
            }
        }
    }

    // ========================================================================
    // Media events
    // ========================================================================

    fn handle_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::ProducerTransportClosed { producer_id } => {
                debug!(target: "room.actor", producer_id = %producer_id, "Producer transport closed");
                if let Some(producer) = self.registries.remove_producer(&producer_id) {
                    producer.close();
                }
            }
            MediaEvent::ConsumerTransportClosed { consumer_id } => {
                debug!(target: "room.actor", consumer_id = %consumer_id, "Consumer transport closed");
                if let Some(consumer) = self.registries.remove_consumer(&consumer_id) {
                    consumer.close();
                }
            }
            MediaEvent::DataProducerClosed { data_producer_id } => {
                self.registries.remove_data_producer(&data_producer_id);
            }
            MediaEvent::DataConsumerClosed { data_consumer_id } => {
                self.registries.remove_data_consumer(&data_consumer_id);
            }
            MediaEvent::DataMessage {
                data_consumer_id,
                payload,
            } => self.handle_data_message(&data_consumer_id, &payload),
            MediaEvent::TransportConnectionState {
                transport_id,
                state,
            } => {
                debug!(target: "room.actor", transport_id = %transport_id, state = %state, "Transport connection state");
            }
        }
    }

    fn handle_data_message(&self, data_consumer_id: &str, payload: &Bytes) {
        let Some(record) = self.registries.data_consumers.record(data_consumer_id) else {
            debug!(target: "room.actor", data_consumer_id = %data_consumer_id, "Message for unknown DataConsumer");
            return;
        };
        if record.label != CHAT_LABEL {
            debug!(target: "room.actor", label = %record.label, "Ignoring DataConsumer message");
            return;
        }

        let text = String::from_utf8_lossy(payload);
        let sender = record
            .peer_id
            .as_deref()
            .and_then(|peer_id| self.registries.peers.display_name(peer_id))
            .unwrap_or_else(|| "Unknown".to_string());
        self.store
            .notify(Notify::info(format!("{sender} says: {text}")));
    }

    // ========================================================================
    // Producers
    // ========================================================================

    async fn enable_producer(&mut self, source: ProducerSource) {
        let kind = source.kind();
        if self.registries.producer_by_source(source).is_some() {
            debug!(target: "room.actor", source = source.as_str(), "Producer already enabled");
            return;
        }
        if !self.engine.is_loaded() {
            debug!(target: "room.actor", source = source.as_str(), "Media engine not loaded");
            return;
        }
        if !self.engine.can_produce(kind) {
            info!(target: "room.actor", kind = %kind, "Cannot produce this kind, skipping");
            return;
        }
        let Some(transport) = self.send_transport.clone() else {
            debug!(target: "room.actor", source = source.as_str(), "No send transport");
            return;
        };

        if source == ProducerSource::Cam {
            self.store
                .modify_me(|me| set_field(&mut me.cam_in_progress, true));
        }

        match self.produce(transport.as_ref(), source).await {
            Ok(producer) => {
                info!(target: "room.actor", producer_id = %producer.id(), source = source.as_str(), "Producer enabled");
                self.registries.add_producer(producer, source);
            }
            Err(e) => {
                error!(target: "room.actor", source = source.as_str(), error = %e, "Enabling producer failed");
                let what = match source {
                    ProducerSource::Mic => "microphone",
                    ProducerSource::Cam | ProducerSource::Share => "webcam",
                };
                self.store
                    .notify(Notify::error(format!("Error enabling {what}: {e}")));
            }
        }

        if source == ProducerSource::Cam {
            self.store
                .modify_me(|me| set_field(&mut me.cam_in_progress, false));
        }
    }

    async fn produce(
        &self,
        transport: &dyn SendTransport,
        source: ProducerSource,
    ) -> Result<Arc<dyn Producer>, MediaError> {
        let track = self.engine.acquire_track(source.kind()).await?;
        transport
            .produce(
                track,
                ProduceOptions {
                    source,
                    app_data: json!({ "source": source.as_str() }),
                },
            )
            .await
    }

    async fn disable_producer(&mut self, source: ProducerSource) {
        let Some((producer_id, _)) = self.registries.producer_by_source(source) else {
            return;
        };
        if let Some(producer) = self.registries.remove_producer(&producer_id) {
            producer.close();
        }

        let result = self
            .request(
                ClientMethod::CloseProducer,
                &ProducerIdPayload {
                    producer_id: producer_id.clone(),
                },
            )
            .await;
        if let Err(e) = result {
            warn!(target: "room.actor", producer_id = %producer_id, error = %e, "closeProducer failed");
            let what = match source {
                ProducerSource::Mic => "mic",
                ProducerSource::Cam | ProducerSource::Share => "webcam",
            };
            self.store.notify(Notify::error(format!(
                "Error closing server-side {what} Producer: {e}"
            )));
        }
    }

    async fn set_mic_paused(&mut self, paused: bool) {
        let Some((producer_id, producer)) = self.registries.producer_by_source(ProducerSource::Mic)
        else {
            return;
        };

        let method = if paused {
            producer.pause();
            ClientMethod::PauseProducer
        } else {
            producer.resume();
            ClientMethod::ResumeProducer
        };
        let result = self
            .request(
                method,
                &ProducerIdPayload {
                    producer_id: producer_id.clone(),
                },
            )
            .await;
        match result {
            Ok(_) => {
                self.registries.set_producer_paused(&producer_id, paused);
            }
            Err(e) => {
                let action = if paused { "pausing" } else { "resuming" };
                self.store.notify(Notify::error(format!(
                    "Error {action} server-side mic Producer: {e}"
                )));
            }
        }
    }

    async fn change_cam(&mut self) {
        if !self.store.me().snapshot().can_change_cam {
            debug!(target: "room.actor", "Camera change not available");
            return;
        }

        self.store
            .modify_me(|me| set_field(&mut me.cam_in_progress, true));
        if let Err(e) = self.engine.switch_camera().await {
            warn!(target: "room.actor", error = %e, "Switching camera failed");
            self.store
                .notify(Notify::error(format!("Could not change cam: {e}")));
        }
        self.store
            .modify_me(|me| set_field(&mut me.cam_in_progress, false));
    }

    // ========================================================================
    // Consumers
    // ========================================================================

    async fn enable_audio_only(&mut self) {
        self.store
            .modify_me(|me| set_field(&mut me.audio_only_in_progress, true));

        self.disable_producer(ProducerSource::Cam).await;
        for (consumer_id, _) in self.registries.consumers_of_kind(MediaKind::Video) {
            self.pause_consumer(&consumer_id).await;
        }

        self.store.modify_me(|me| {
            let only = set_field(&mut me.audio_only, true);
            let progress = set_field(&mut me.audio_only_in_progress, false);
            only || progress
        });
    }

    async fn disable_audio_only(&mut self) {
        self.store
            .modify_me(|me| set_field(&mut me.audio_only_in_progress, true));

        if self.config.produce
            && self
                .registries
                .producer_by_source(ProducerSource::Cam)
                .is_none()
        {
            self.enable_producer(ProducerSource::Cam).await;
        }
        for (consumer_id, _) in self.registries.consumers_of_kind(MediaKind::Video) {
            self.resume_consumer(&consumer_id).await;
        }

        self.store.modify_me(|me| {
            let only = set_field(&mut me.audio_only, false);
            let progress = set_field(&mut me.audio_only_in_progress, false);
            only || progress
        });
    }

    async fn set_audio_muted(&mut self, muted: bool) {
        self.store
            .modify_me(|me| set_field(&mut me.audio_muted, muted));

        for (consumer_id, _) in self.registries.consumers_of_kind(MediaKind::Audio) {
            if muted {
                self.pause_consumer(&consumer_id).await;
            } else {
                self.resume_consumer(&consumer_id).await;
            }
        }
    }

    async fn pause_consumer(&mut self, consumer_id: &str) {
        self.set_consumer_locally_paused(consumer_id, true).await;
    }

    async fn resume_consumer(&mut self, consumer_id: &str) {
        self.set_consumer_locally_paused(consumer_id, false).await;
    }

    async fn set_consumer_locally_paused(&mut self, consumer_id: &str, paused: bool) {
        let Some(record) = self.registries.consumers.record(consumer_id) else {
            return;
        };
        if record.locally_paused == paused {
            return;
        }

        let method = if paused {
            ClientMethod::PauseConsumer
        } else {
            ClientMethod::ResumeConsumer
        };
        let result = self
            .request(
                method,
                &ConsumerIdPayload {
                    consumer_id: consumer_id.to_string(),
                },
            )
            .await;
        if let Err(e) = result {
            let action = if paused { "pausing" } else { "resuming" };
            warn!(target: "room.actor", consumer_id = %consumer_id, action, error = %e, "Consumer request failed");
            self.store
                .notify(Notify::error(format!("Error {action} Consumer: {e}")));
            return;
        }

        if let Some(consumer) = self.registries.consumers.handle(consumer_id) {
            if paused {
                consumer.pause();
            } else {
                consumer.resume();
            }
        }
        self.registries
            .set_consumer_paused(consumer_id, PauseOrigin::Local, paused);
    }

    async fn request_consumer_key_frame(&mut self, consumer_id: &str) {
        let result = self
            .request(
                ClientMethod::RequestConsumerKeyFrame,
                &ConsumerIdPayload {
                    consumer_id: consumer_id.to_string(),
                },
            )
            .await;
        match result {
            Ok(_) => self
                .store
                .notify(Notify::info("Keyframe requested for video consumer")),
            Err(e) => self.store.notify(Notify::error(format!(
                "Error requesting key frame for Consumer: {e}"
            ))),
        }
    }

    // ========================================================================
    // Session
    // ========================================================================

    #[instrument(skip_all, name = "room.actor.restart_ice")]
    async fn restart_ice(&mut self) {
        self.store
            .modify_me(|me| set_field(&mut me.restart_ice_in_progress, true));

        if let Err(e) = self.restart_transports_ice().await {
            warn!(target: "room.actor", error = %e, "ICE restart failed");
            self.store
                .notify(Notify::error(format!("ICE restart failed: {e}")));
        }

        self.store
            .modify_me(|me| set_field(&mut me.restart_ice_in_progress, false));
    }

    async fn restart_transports_ice(&self) -> Result<(), RoomError> {
        if let Some(transport) = self.send_transport.clone() {
            let ice_parameters = self.fetch_ice_parameters(transport.id()).await?;
            transport.restart_ice(ice_parameters).await?;
        }
        if let Some(transport) = self.recv_transport.clone() {
            let ice_parameters = self.fetch_ice_parameters(transport.id()).await?;
            transport.restart_ice(ice_parameters).await?;
        }
        Ok(())
    }

    async fn fetch_ice_parameters(&self, transport_id: &str) -> Result<Value, RoomError> {
        self.request(
            ClientMethod::RestartIce,
            &TransportIdPayload {
                transport_id: transport_id.to_string(),
            },
        )
        .await
    }

    async fn change_display_name(&mut self, display_name: String) {
        let result = self
            .request(
                ClientMethod::ChangeDisplayName,
                &ChangeDisplayNameRequest {
                    display_name: display_name.clone(),
                },
            )
            .await;
        match result {
            Ok(_) => {
                self.store
                    .modify_me(|me| set_field(&mut me.display_name, display_name));
                self.store.notify(Notify::info("Display name changed"));
            }
            Err(e) => {
                warn!(target: "room.actor", error = %e, "changeDisplayName failed");
                self.store.notify(Notify::error(format!(
                    "Could not change display name: {e}"
                )));
                // Re-publish the unchanged name.
                self.store.modify_me(|_| true);
            }
        }
    }

    async fn enable_chat_data_producer(&mut self) {
        if !self.config.use_data_channel {
            debug!(target: "room.actor", "Data channels disabled");
            return;
        }
        if self.registries.data_producer_by_label(CHAT_LABEL).is_some() {
            return;
        }
        let Some(transport) = self.send_transport.clone() else {
            debug!(target: "room.actor", "No send transport for chat DataProducer");
            return;
        };

        let result = transport
            .produce_data(DataProducerOptions {
                label: CHAT_LABEL.to_string(),
                protocol: CHAT_LABEL.to_string(),
                ordered: false,
                max_retransmits: Some(CHAT_MAX_RETRANSMITS),
                app_data: json!({ "info": "my-chat-DataProducer" }),
            })
            .await;
        match result {
            Ok(data_producer) => {
                info!(target: "room.actor", data_producer_id = %data_producer.id(), "Chat DataProducer enabled");
                self.registries.add_data_producer(data_producer, CHAT_LABEL);
            }
            Err(e) => {
                error!(target: "room.actor", error = %e, "Creating chat DataProducer failed");
                self.store.notify(Notify::error(format!(
                    "Error creating chat DataProducer: {e}"
                )));
            }
        }
    }

    async fn send_chat_message(&mut self, text: String) {
        if self.registries.data_producer_by_label(CHAT_LABEL).is_none() {
            self.enable_chat_data_producer().await;
        }
        let Some(data_producer) = self.registries.data_producer_by_label(CHAT_LABEL) else {
            self.store.notify(Notify::error("No chat DataProducer"));
            return;
        };

        if let Err(e) = data_producer.send(Bytes::from(text)) {
            warn!(target: "room.actor", error = %e, "Chat message not sent");
            self.store.notify(Notify::error(format!(
                "chat DataProducer.send() failed: {e}"
            )));
        }
    }

    /// Issue a request on the signaling peer.
    async fn request<T: serde::Serialize + ?Sized>(
        &self,
        method: ClientMethod,
        data: &T,
    ) -> Result<Value, RoomError> {
        let peer = self.peer.as_ref().ok_or(RoomError::Closed)?;
        Ok(peer.request(method, data).await?)
    }

    /// Tear the session down. Runs once; later calls are no-ops.
    async fn close_session(&mut self, reason: &str) {
        if self.is_closed {
            return;
        }
        self.is_closed = true;
        self.closed.store(true, Ordering::SeqCst);
        info!(target: "room.actor", reason = %reason, "Closing room");

        if let Some(peer) = self.peer.take() {
            peer.close().await;
        }
        self.peer_events = None;
        self.dispose_transports();
        self.engine.release();
        self.registries.peers.clear();
        self.store.set_room_state(ConnectionState::Closed);
    }
}

/// Drive `handler` unless `token` fires first. `None` means the handler was
/// abandoned.
async fn until_closed<F: Future>(token: &CancellationToken, handler: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = token.cancelled() => None,
        exit = handler => Some(exit),
    }
}

async fn next_peer_event(
    events: &mut Option<mpsc::UnboundedReceiver<PeerEvent>>,
) -> Option<PeerEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

fn parse<T: DeserializeOwned>(method: &NotificationMethod, data: Value) -> Option<T> {
    match serde_json::from_value(data) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(target: "room.actor", method = %method.as_str(), error = %e, "Malformed notification");
            None
        }
    }
}

/// Returns `false` when the accept could not be sent.
fn accept(responder: Responder, method: &'static str) -> bool {
    match responder.accept_empty() {
        Ok(()) => {
            metrics::record_server_request(method, "accept");
            true
        }
        Err(e) => {
            warn!(target: "room.actor", method, error = %e, "Could not accept server request");
            false
        }
    }
}

fn reject(responder: Responder, method: &'static str, error: &RoomError) {
    let reason = match error {
        RoomError::Capability(reason) => reason.clone(),
        other => other.to_string(),
    };
    if let Err(e) = responder.reject(error.error_code(), reason) {
        warn!(target: "room.actor", method, error = %e, "Could not reject server request");
    }
    metrics::record_server_request(method, "reject");
}
