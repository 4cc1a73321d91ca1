//! `RetryingTransport` - duplex signaling channel with exponential-backoff
//! reconnection.
//!
//! All connection state lives in a single actor task, so close, connect and
//! reconnect never race. The handle is cheap to clone; events come out of the
//! receiver returned by [`RetryingTransport::connect`].
//!
//! # Events
//!
//! - `Open` after every successful (re)connection
//! - `Message` for every inbound text frame, in arrival order
//! - `Failed` when a connection attempt fails before any connection succeeded
//! - `Disconnected` when the channel fails after having been connected
//! - `Closed` exactly once, when the server closes cleanly or retries run out
//!
//! An explicit [`RetryingTransport::close`] emits nothing further.
//!
//! Frames are only accepted while a socket is live: between sockets `send`
//! fails with `NotConnected`, so callers never wait on a frame that was
//! silently dropped.

mod backoff;
mod connector;

pub use backoff::{
    ReconnectPolicy, DEFAULT_FACTOR, DEFAULT_MAX_RETRIES, DEFAULT_MAX_TIMEOUT_MS,
    DEFAULT_MIN_TIMEOUT_MS,
};
pub use connector::{
    Connector, FrameSink, FrameStream, OutboundFrame, WebSocketConnector, WireConnection,
};

use crate::errors::TransportError;
use crate::observability::metrics;
use backoff::Backoff;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

/// Close code sent on an explicit close.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Close reason sent on an explicit close.
pub const NORMAL_CLOSE_REASON: &str = "bye";

/// Event emitted by the transport actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Disconnected,
    Failed,
    Closed,
}

/// Sequence number of an enqueued outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SendTicket(pub u64);

#[derive(Debug)]
enum TransportCommand {
    Send(String),
    Close { respond_to: oneshot::Sender<()> },
}

/// Handle to the transport actor.
#[derive(Clone, Debug)]
pub struct RetryingTransport {
    sender: mpsc::UnboundedSender<TransportCommand>,
    closed: Arc<AtomicBool>,
    /// Set by the actor while a socket is live.
    connected: Arc<AtomicBool>,
    next_ticket: Arc<AtomicU64>,
}

impl RetryingTransport {
    /// Spawn the transport actor and start connecting to `url`.
    pub fn connect(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(false));

        let actor = TransportActor {
            url: url.into(),
            connector,
            backoff: Backoff::new(policy),
            receiver,
            events,
            closed: Arc::clone(&closed),
            connected: Arc::clone(&connected),
            ever_connected: false,
        };
        tokio::spawn(actor.run());

        let handle = Self {
            sender,
            closed,
            connected,
            next_ticket: Arc::new(AtomicU64::new(1)),
        };
        (handle, events_rx)
    }

    /// Enqueue a text frame on the live socket.
    ///
    /// Fails with `NotConnected` while the channel is connecting or
    /// reconnecting.
    pub fn send(&self, payload: String) -> Result<SendTicket, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let ticket = SendTicket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        self.sender
            .send(TransportCommand::Send(payload))
            .map_err(|_| TransportError::Closed)?;
        Ok(ticket)
    }

    /// Close the channel. Idempotent.
    ///
    /// Cancels any pending reconnection and returns once the actor has shut
    /// the socket down.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(TransportCommand::Close { respond_to: tx })
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Whether the transport accepts no more frames.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether a socket is currently live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

enum ConnectOutcome {
    Connected(WireConnection),
    Failed(TransportError),
    Shutdown,
}

enum SessionEnd {
    Failed(TransportError),
    RemoteClosed,
    Shutdown,
}

struct TransportActor {
    url: String,
    connector: Arc<dyn Connector>,
    backoff: Backoff,
    receiver: mpsc::UnboundedReceiver<TransportCommand>,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    ever_connected: bool,
}

impl TransportActor {
    #[instrument(skip_all, name = "room.transport", fields(url = %self.url))]
    async fn run(mut self) {
        debug!(target: "room.transport", "Transport actor started");

        loop {
            let connection = match self.connect_once().await {
                ConnectOutcome::Connected(connection) => connection,
                ConnectOutcome::Failed(e) => {
                    warn!(target: "room.transport", error = %e, "Connection attempt failed");
                    if self.schedule_retry().await {
                        continue;
                    }
                    break;
                }
                ConnectOutcome::Shutdown => break,
            };

            self.backoff.reset();
            self.ever_connected = true;
            self.connected.store(true, Ordering::SeqCst);
            info!(target: "room.transport", "Signaling channel open");
            self.emit(TransportEvent::Open);

            let end = self.pump(connection).await;
            // Cleared before `Disconnected` is emitted, so every frame
            // accepted for the old socket is ordered before that event.
            self.connected.store(false, Ordering::SeqCst);
            match end {
                SessionEnd::Failed(e) => {
                    warn!(target: "room.transport", error = %e, "Signaling channel failed");
                    if !self.schedule_retry().await {
                        break;
                    }
                }
                SessionEnd::RemoteClosed => {
                    info!(target: "room.transport", "Signaling channel closed by server");
                    self.finish();
                    break;
                }
                SessionEnd::Shutdown => break,
            }
        }

        debug!(target: "room.transport", "Transport actor stopped");
    }

    async fn connect_once(&mut self) -> ConnectOutcome {
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let connect = connector.connect(&url);
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(connection) => ConnectOutcome::Connected(connection),
                        Err(e) => ConnectOutcome::Failed(e),
                    };
                }
                cmd = self.receiver.recv() => match cmd {
                    Some(TransportCommand::Send(_)) => {
                        debug!(target: "room.transport", "Dropping frame while connecting");
                    }
                    Some(TransportCommand::Close { respond_to }) => {
                        let _ = respond_to.send(());
                        return ConnectOutcome::Shutdown;
                    }
                    None => return ConnectOutcome::Shutdown,
                },
            }
        }
    }

    async fn pump(&mut self, connection: WireConnection) -> SessionEnd {
        let WireConnection {
            mut sink,
            mut stream,
        } = connection;

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.emit(TransportEvent::Message(text)),
                    Some(Err(e)) => return SessionEnd::Failed(e),
                    None => return SessionEnd::RemoteClosed,
                },
                cmd = self.receiver.recv() => match cmd {
                    Some(TransportCommand::Send(text)) => {
                        if let Err(e) = sink.send(OutboundFrame::Text(text)).await {
                            return SessionEnd::Failed(e);
                        }
                    }
                    Some(TransportCommand::Close { respond_to }) => {
                        let _ = sink
                            .send(OutboundFrame::Close {
                                code: NORMAL_CLOSE_CODE,
                                reason: NORMAL_CLOSE_REASON.to_string(),
                            })
                            .await;
                        let _ = sink.close().await;
                        let _ = respond_to.send(());
                        return SessionEnd::Shutdown;
                    }
                    None => {
                        let _ = sink.close().await;
                        return SessionEnd::Shutdown;
                    }
                },
            }
        }
    }

    /// Wait out the next backoff delay. Returns `false` when the actor must stop.
    async fn schedule_retry(&mut self) -> bool {
        let Some(delay) = self.backoff.next_delay() else {
            warn!(
                target: "room.transport",
                attempts = self.backoff.attempt(),
                "Reconnection attempts exhausted"
            );
            self.finish();
            return false;
        };

        metrics::record_reconnect_attempt();
        debug!(
            target: "room.transport",
            attempt = self.backoff.attempt(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling reconnection"
        );

        self.emit(if self.ever_connected {
            TransportEvent::Disconnected
        } else {
            TransportEvent::Failed
        });

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return true,
                cmd = self.receiver.recv() => match cmd {
                    Some(TransportCommand::Send(_)) => {
                        debug!(target: "room.transport", "Dropping frame while reconnecting");
                    }
                    Some(TransportCommand::Close { respond_to }) => {
                        let _ = respond_to.send(());
                        return false;
                    }
                    None => return false,
                },
            }
        }
    }

    /// Terminal close. Emits `Closed` unless the handle already closed us.
    fn finish(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.emit(TransportEvent::Closed);
        }
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!(target: "room.transport", "Event receiver dropped");
        }
    }
}
