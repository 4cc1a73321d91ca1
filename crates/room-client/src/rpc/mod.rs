//! `RpcPeer` - correlation-based request/response protocol over the
//! signaling transport.
//!
//! Outbound requests are registered in a pending table before they are sent
//! and resolved exactly once by the matching response. Inbound requests and
//! notifications are forwarded, in arrival order, as [`PeerEvent`]s.

mod server_request;

pub use server_request::{Responder, ServerRequest, TIMEOUT_REJECT_CODE, TIMEOUT_REJECT_REASON};

use crate::errors::RpcError;
use crate::observability::metrics;
use crate::transport::{Connector, ReconnectPolicy, RetryingTransport, TransportEvent};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use signaling_protocol::codec;
use signaling_protocol::message::{Message, ResponseOutcome};
use signaling_protocol::methods::{ClientMethod, NotificationMethod};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

type PendingSender = oneshot::Sender<Result<Value, RpcError>>;

/// Event forwarded to the session.
#[derive(Debug)]
pub enum PeerEvent {
    /// Channel (re)opened
    Open,
    /// Channel failed after having been connected; reconnecting
    Disconnected,
    /// Channel failed before ever connecting; retrying
    Failed,
    /// Channel closed for good
    Closed,
    /// Server-initiated request
    Request(ServerRequest),
    /// Server notification
    Notification(InboundNotification),
}

/// A server notification with its method already classified.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundNotification {
    pub method: NotificationMethod,
    pub data: Value,
}

struct PeerShared {
    transport: RetryingTransport,
    pending: DashMap<u64, PendingSender>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl PeerShared {
    fn fail_pending(&self, error: &RpcError) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }
}

/// Handle to the request/response protocol.
#[derive(Clone)]
pub struct RpcPeer {
    shared: Arc<PeerShared>,
}

impl std::fmt::Debug for RpcPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcPeer")
            .field("pending", &self.shared.pending.len())
            .field("closed", &self.shared.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl RpcPeer {
    /// Open a transport to `url` and layer a peer on top of it.
    pub fn connect(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        server_request_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (transport, events) = RetryingTransport::connect(url, connector, policy);
        Self::spawn(transport, events, server_request_timeout)
    }

    /// Layer a peer on an existing transport and spawn its dispatch task.
    pub fn spawn(
        transport: RetryingTransport,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        server_request_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let shared = Arc::new(PeerShared {
            transport,
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });
        let (output, output_rx) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher {
            shared: Arc::clone(&shared),
            events,
            output,
            server_request_timeout,
        };
        tokio::spawn(dispatcher.run());

        (Self { shared }, output_rx)
    }

    /// Send a request and wait for its response.
    #[instrument(skip_all, name = "room.rpc.request", fields(method = %method))]
    pub async fn request<T: Serialize + ?Sized>(
        &self,
        method: ClientMethod,
        data: &T,
    ) -> Result<Value, RpcError> {
        let started = Instant::now();
        let result = match self.enqueue(method, data) {
            Ok(rx) => rx.await.unwrap_or(Err(RpcError::TransportClosed)),
            Err(e) => Err(e),
        };
        metrics::record_rpc_request(method.as_str(), status_label(&result), started.elapsed());
        result
    }

    /// Send a request and decode the response payload.
    pub async fn request_as<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        method: ClientMethod,
        data: &T,
    ) -> Result<R, RpcError> {
        let value = self.request(method, data).await?;
        serde_json::from_value(value).map_err(|e| RpcError::InvalidResponse(e.to_string()))
    }

    /// Send a request and block the calling thread until it resolves.
    ///
    /// For threads outside the async runtime only. Inside the runtime this
    /// would stall the very task that delivers the response, so it is
    /// refused with `BlockingInAsyncContext`.
    pub fn request_blocking<T: Serialize + ?Sized>(
        &self,
        method: ClientMethod,
        data: &T,
    ) -> Result<Value, RpcError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(RpcError::BlockingInAsyncContext);
        }
        let rx = self.enqueue(method, data)?;
        rx.blocking_recv().unwrap_or(Err(RpcError::TransportClosed))
    }

    fn enqueue<T: Serialize + ?Sized>(
        &self,
        method: ClientMethod,
        data: &T,
    ) -> Result<oneshot::Receiver<Result<Value, RpcError>>, RpcError> {
        if self.is_closed() {
            return Err(RpcError::TransportClosed);
        }

        let data = serde_json::to_value(data).map_err(|e| RpcError::Encode(e.to_string()))?;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = codec::encode(&Message::request(id, method.as_str(), data))
            .map_err(|e| RpcError::Encode(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id, tx);

        // A close racing with the insert above must not leave the entry behind.
        if self.is_closed() {
            self.shared.pending.remove(&id);
            return Err(RpcError::TransportClosed);
        }

        if let Err(e) = self.shared.transport.send(frame) {
            self.shared.pending.remove(&id);
            return Err(e.into());
        }

        debug!(target: "room.rpc", id, method = %method, "Request sent");
        Ok(rx)
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Close the peer and its transport. Idempotent.
    ///
    /// Every pending request fails with `TransportClosed`.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.fail_pending(&RpcError::TransportClosed);
        self.shared.transport.close().await;
    }
}

fn status_label(result: &Result<Value, RpcError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(RpcError::Rejected { .. }) => "rejected",
        Err(_) => "error",
    }
}

struct Dispatcher {
    shared: Arc<PeerShared>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    output: mpsc::UnboundedSender<PeerEvent>,
    server_request_timeout: Duration,
}

impl Dispatcher {
    #[instrument(skip_all, name = "room.rpc.dispatch")]
    async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            if self.shared.closed.load(Ordering::SeqCst) {
                break;
            }
            match event {
                TransportEvent::Open => self.forward(PeerEvent::Open),
                TransportEvent::Message(text) => self.handle_frame(&text),
                TransportEvent::Disconnected => {
                    self.shared.fail_pending(&RpcError::ConnectionLost);
                    self.forward(PeerEvent::Disconnected);
                }
                TransportEvent::Failed => self.forward(PeerEvent::Failed),
                TransportEvent::Closed => {
                    self.shared.closed.store(true, Ordering::SeqCst);
                    self.shared.fail_pending(&RpcError::TransportClosed);
                    self.forward(PeerEvent::Closed);
                    break;
                }
            }
        }

        self.shared.fail_pending(&RpcError::TransportClosed);
        debug!(target: "room.rpc", "Dispatcher stopped");
    }

    fn handle_frame(&self, text: &str) {
        let message = match codec::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(target: "room.rpc", error = %e, "Dropping malformed frame");
                return;
            }
        };

        match message {
            Message::Response(response) => {
                let Some((_, tx)) = self.shared.pending.remove(&response.id) else {
                    warn!(target: "room.rpc", id = response.id, "Response for unknown request");
                    return;
                };
                let result = match response.outcome {
                    ResponseOutcome::Accepted(data) => Ok(data),
                    ResponseOutcome::Rejected { code, reason } => {
                        Err(RpcError::Rejected { code, reason })
                    }
                };
                let _ = tx.send(result);
            }
            Message::Request(request) => {
                debug!(target: "room.rpc", id = request.id, method = %request.method, "Server request");
                let request = ServerRequest::new(
                    request,
                    self.shared.transport.clone(),
                    self.server_request_timeout,
                );
                self.forward(PeerEvent::Request(request));
            }
            Message::Notification(notification) => {
                let method = NotificationMethod::parse(&notification.method);
                metrics::record_notification(method.metric_label());
                self.forward(PeerEvent::Notification(InboundNotification {
                    method,
                    data: notification.data,
                }));
            }
        }
    }

    fn forward(&self, event: PeerEvent) {
        if self.output.send(event).is_err() {
            debug!(target: "room.rpc", "Peer event receiver dropped");
        }
    }
}
