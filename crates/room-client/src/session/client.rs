//! `RoomClient` - handle to a room session.

use super::actor::RoomActor;
use super::messages::RoomCommand;
use crate::config::RoomConfig;
use crate::errors::RoomError;
use crate::media::MediaEngine;
use crate::registry::Registries;
use crate::store::{Me, RoomInfo, RoomStore};
use crate::transport::Connector;
use common::types::ConnectionState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to a room session.
///
/// Commands are fire-and-forget: they are queued on the actor's mailbox and
/// processed in order. Their outcome is observed through [`RoomClient::store`].
/// Every method is callable from any thread, inside or outside the runtime.
///
/// `close` and `cancel` bypass the mailbox and interrupt whatever the actor
/// is awaiting.
#[derive(Clone, Debug)]
pub struct RoomClient {
    sender: mpsc::UnboundedSender<RoomCommand>,
    store: Arc<RoomStore>,
    registries: Arc<Registries>,
    closed: Arc<AtomicBool>,
    cancel_token: CancellationToken,
    /// Child of `cancel_token`; cancelled by `close`.
    close_token: CancellationToken,
    config: Arc<RoomConfig>,
}

impl RoomClient {
    /// Spawn the session actor.
    ///
    /// Must be called from within a tokio runtime. Returns the handle and the
    /// actor's join handle, which completes once the session is closed.
    pub fn spawn(
        config: RoomConfig,
        engine: Arc<dyn MediaEngine>,
        connector: Arc<dyn Connector>,
    ) -> (Self, JoinHandle<()>) {
        let store = Arc::new(RoomStore::new(
            RoomInfo {
                room_id: config.room_id.clone(),
                url: config.protoo_url(),
                ..RoomInfo::default()
            },
            Me {
                id: config.peer_id.clone(),
                display_name: config.display_name.clone(),
                device: config.device.clone(),
                ..Me::default()
            },
        ));
        let registries = Arc::new(Registries::new(&store));
        let (sender, receiver) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let cancel_token = CancellationToken::new();
        let close_token = cancel_token.child_token();

        let actor = RoomActor::new(
            config.clone(),
            engine,
            connector,
            Arc::clone(&store),
            Arc::clone(&registries),
            receiver,
            sender.downgrade(),
            Arc::clone(&closed),
            cancel_token.clone(),
            close_token.clone(),
        );
        let task_handle = tokio::spawn(actor.run());

        debug!(target: "room.client", room_id = %config.room_id, peer_id = %config.peer_id, "Room session spawned");

        let handle = Self {
            sender,
            store,
            registries,
            closed,
            cancel_token,
            close_token,
            config: Arc::new(config),
        };
        (handle, task_handle)
    }

    /// Observable session state.
    #[must_use]
    pub fn store(&self) -> Arc<RoomStore> {
        Arc::clone(&self.store)
    }

    /// Open media handles and their records, e.g. to attach a renderer to a
    /// consumer's track. Mutated only by the session actor.
    #[must_use]
    pub fn registries(&self) -> Arc<Registries> {
        Arc::clone(&self.registries)
    }

    #[must_use]
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Whether a close has been requested or performed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Connect and join the room. Only valid from `New`.
    pub fn join(&self) -> Result<(), RoomError> {
        if self.store.state() != ConnectionState::New {
            return Err(RoomError::InvalidState(
                "join is only valid for a new session".to_string(),
            ));
        }
        self.post(RoomCommand::Join)
    }

    pub fn enable_mic(&self) -> Result<(), RoomError> {
        self.post(RoomCommand::EnableMic)
    }

    pub fn disable_mic(&self) -> Result<(), RoomError> {
        self.post(RoomCommand::DisableMic)
    }

    pub fn mute_mic(&self) -> Result<(), RoomError> {
        self.post(RoomCommand::MuteMic)
    }

    pub fn unmute_mic(&self) -> Result<(), RoomError> {
        self.post(RoomCommand::UnmuteMic)
    }

    pub fn enable_cam(&self) -> Result<(), RoomError> {
        self.post(RoomCommand::EnableCam)
    }

    pub fn disable_cam(&self) -> Result<(), RoomError> {
        self.post(RoomCommand::DisableCam)
    }

    /// Switch to the next capture device.
    pub fn change_cam(&self) -> Result<(), RoomError> {
        self.post(RoomCommand::ChangeCam)
    }

    pub fn enable_audio_only(&self) -> Result<(), RoomError> {
        self.post(RoomCommand::EnableAudioOnly)
    }

    pub fn disable_audio_only(&self) -> Result<(), RoomError> {
        self.post(RoomCommand::DisableAudioOnly)
    }

    pub fn mute_audio(&self) -> Result<(), RoomError> {
        self.post(RoomCommand::MuteAudio)
    }

    pub fn unmute_audio(&self) -> Result<(), RoomError> {
        self.post(RoomCommand::UnmuteAudio)
    }

    pub fn restart_ice(&self) -> Result<(), RoomError> {
        self.post(RoomCommand::RestartIce)
    }

    pub fn change_display_name(&self, display_name: impl Into<String>) -> Result<(), RoomError> {
        self.post(RoomCommand::ChangeDisplayName {
            display_name: display_name.into(),
        })
    }

    pub fn request_consumer_key_frame(&self, consumer_id: impl Into<String>) -> Result<(), RoomError> {
        self.post(RoomCommand::RequestConsumerKeyFrame {
            consumer_id: consumer_id.into(),
        })
    }

    pub fn enable_chat_data_producer(&self) -> Result<(), RoomError> {
        self.post(RoomCommand::EnableChatDataProducer)
    }

    /// Send a chat message, creating the chat data producer if needed.
    pub fn send_chat_message(&self, text: impl Into<String>) -> Result<(), RoomError> {
        self.post(RoomCommand::SendChatMessage { text: text.into() })
    }

    /// Close the session. Idempotent.
    ///
    /// Takes effect even while the actor is waiting on a signaling round
    /// trip: that request fails with `TransportClosed` as the peer closes.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(target: "room.client", "Close requested");
        self.close_token.cancel();
    }

    /// Wait until every command posted before this call has been processed.
    ///
    /// Returns immediately once the actor has stopped.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(RoomCommand::Flush { respond_to: tx }).is_err() {
            return;
        }
        let _ = rx.await;
    }

    /// Cancel the session actor. The actor closes the session on its way out.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    fn post(&self, command: RoomCommand) -> Result<(), RoomError> {
        if self.is_closed() {
            return Err(RoomError::Closed);
        }
        self.sender
            .send(command)
            .map_err(|_| RoomError::Closed)
    }
}
