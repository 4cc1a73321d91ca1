//! In-memory protoo signaling server for room client testing.
//!
//! The server hands out connections through [`MockSignalingServer::connector`].
//! Every request the client sends is recorded and answered from a script:
//! scripted results first, then sensible defaults for the join sequence
//! (router capabilities, transport parameters, generated producer ids).
//! Tests drive the other direction with [`MockSignalingServer::notify`] and
//! [`MockSignalingServer::request`].
//!
//! # Example
//!
//! ```rust,ignore
//! use room_test_utils::MockSignalingServer;
//!
//! let server = MockSignalingServer::builder()
//!     .with_peer(peer_info("alice", "Alice"))
//!     .reject("changeDisplayName", 500, "name taken")
//!     .build();
//!
//! // Pass `server.connector()` to RoomClient::spawn...
//! let request = server.wait_for_request("join").await;
//! ```

use crate::fixtures::{ice_parameters, router_rtp_capabilities, to_value, transport_info, WAIT_TIMEOUT};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use room_client::errors::TransportError;
use room_client::transport::{Connector, OutboundFrame, WireConnection};
use serde_json::{json, Value};
use signaling_protocol::codec;
use signaling_protocol::message::{Message, Response, ResponseOutcome};
use signaling_protocol::payloads::{JoinResponse, PeerInfo};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// A request received from the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedRequest {
    pub id: u64,
    pub method: String,
    pub data: Value,
}

/// Scripted answer to a client request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Accept(Value),
    Reject { code: i64, reason: String },
    /// Never answer.
    Silent,
}

#[derive(Default)]
struct ServerState {
    requests: Vec<ReceivedRequest>,
    responses: HashMap<u64, Response>,
    client_closes: Vec<(u16, String)>,
    connection: Option<mpsc::UnboundedSender<Result<String, TransportError>>>,
}

struct Inner {
    script: Mutex<HashMap<String, Vec<Reply>>>,
    peers: Vec<PeerInfo>,
    fail_connects: AtomicUsize,
    connects: AtomicUsize,
    next_id: AtomicU64,
    next_server_request_id: AtomicU64,
    state: Mutex<ServerState>,
    changed: Notify,
}

/// Scripted in-memory signaling server.
#[derive(Clone)]
pub struct MockSignalingServer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MockSignalingServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSignalingServer")
            .field("connects", &self.connection_count())
            .finish_non_exhaustive()
    }
}

impl Default for MockSignalingServer {
    fn default() -> Self {
        MockSignalingServerBuilder::default().build()
    }
}

impl MockSignalingServer {
    /// Create a new MockSignalingServer builder.
    #[must_use]
    pub fn builder() -> MockSignalingServerBuilder {
        MockSignalingServerBuilder::default()
    }

    /// Connector that opens connections to this server.
    #[must_use]
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Number of connection attempts, failed ones included.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Whether a connection is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().unwrap().connection.is_some()
    }

    /// Every request received so far, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.inner.state.lock().unwrap().requests.clone()
    }

    /// Received requests with `method`.
    #[must_use]
    pub fn requests_for(&self, method: &str) -> Vec<ReceivedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == method)
            .collect()
    }

    /// Methods of every received request, in arrival order.
    #[must_use]
    pub fn methods(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|request| request.method)
            .collect()
    }

    /// Close frames sent by the client.
    #[must_use]
    pub fn client_closes(&self) -> Vec<(u16, String)> {
        self.inner.state.lock().unwrap().client_closes.clone()
    }

    /// Queue a scripted reply for the next request with `method`.
    pub fn script(&self, method: &str, reply: Reply) {
        self.inner
            .script
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push(reply);
    }

    /// Send a notification to the client.
    pub fn notify(&self, method: &str, data: Value) {
        self.send(&Message::notification(method, data));
    }

    /// Send a request to the client and return its id.
    pub fn request(&self, method: &str, data: Value) -> u64 {
        let id = self
            .inner
            .next_server_request_id
            .fetch_add(1, Ordering::SeqCst);
        self.send(&Message::request(id, method, data));
        id
    }

    /// Answer a received request by hand (for requests scripted `Silent`).
    pub fn respond(&self, id: u64, reply: Reply) {
        if let Some(message) = reply_message(id, reply) {
            self.send(&message);
        }
    }

    /// Send a raw text frame.
    pub fn send_raw(&self, text: &str) {
        let state = self.inner.state.lock().unwrap();
        if let Some(connection) = &state.connection {
            let _ = connection.unbounded_send(Ok(text.to_string()));
        }
    }

    /// Fail the live connection with a socket error.
    pub fn drop_connection(&self) {
        let connection = self.inner.state.lock().unwrap().connection.take();
        if let Some(connection) = connection {
            let _ = connection.unbounded_send(Err(TransportError::Socket(
                "connection reset".to_string(),
            )));
        }
        self.inner.changed.notify_waiters();
    }

    /// Close the live connection cleanly.
    pub fn close_connection(&self) {
        let connection = self.inner.state.lock().unwrap().connection.take();
        if let Some(connection) = connection {
            connection.close_channel();
        }
        self.inner.changed.notify_waiters();
    }

    /// Fail the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: usize) {
        self.inner.fail_connects.store(count, Ordering::SeqCst);
    }

    /// Wait for the first request with `method`.
    pub async fn wait_for_request(&self, method: &str) -> ReceivedRequest {
        self.wait_for_nth_request(method, 1).await
    }

    /// Wait until `count` requests with `method` have arrived; returns the last.
    pub async fn wait_for_nth_request(&self, method: &str, count: usize) -> ReceivedRequest {
        self.wait(&format!("{count} x {method}"), || {
            let matching = self.requests_for(method);
            if matching.len() >= count {
                matching.into_iter().nth(count - 1)
            } else {
                None
            }
        })
        .await
    }

    /// Wait for the client's answer to server request `id`.
    pub async fn wait_for_response(&self, id: u64) -> Response {
        self.wait(&format!("response to {id}"), || {
            self.inner.state.lock().unwrap().responses.get(&id).cloned()
        })
        .await
    }

    /// Wait for `count` connection attempts.
    pub async fn wait_for_connects(&self, count: usize) {
        self.wait(&format!("{count} connects"), || {
            (self.connection_count() >= count).then_some(())
        })
        .await;
    }

    async fn wait<T>(&self, what: &str, check: impl Fn() -> Option<T>) -> T {
        let wait = async {
            loop {
                let changed = self.inner.changed.notified();
                if let Some(found) = check() {
                    return found;
                }
                changed.await;
            }
        };
        tokio::time::timeout(WAIT_TIMEOUT, wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
    }

    fn send(&self, message: &Message) {
        let text = codec::encode(message).expect("message encodes");
        self.send_raw(&text);
    }
}

/// Builder for MockSignalingServer configuration.
#[derive(Debug, Default)]
pub struct MockSignalingServerBuilder {
    script: HashMap<String, Vec<Reply>>,
    peers: Vec<PeerInfo>,
    fail_connects: usize,
}

impl MockSignalingServerBuilder {
    /// Announce `peer` in the `join` response.
    #[must_use]
    pub fn with_peer(mut self, peer: PeerInfo) -> Self {
        self.peers.push(peer);
        self
    }

    /// Accept the next request with `method` with `data`.
    #[must_use]
    pub fn accept(self, method: &str, data: Value) -> Self {
        self.reply(method, Reply::Accept(data))
    }

    /// Reject the next request with `method`.
    #[must_use]
    pub fn reject(self, method: &str, code: i64, reason: &str) -> Self {
        self.reply(
            method,
            Reply::Reject {
                code,
                reason: reason.to_string(),
            },
        )
    }

    /// Never answer the next request with `method`.
    #[must_use]
    pub fn silent(self, method: &str) -> Self {
        self.reply(method, Reply::Silent)
    }

    /// Queue a scripted reply.
    #[must_use]
    pub fn reply(mut self, method: &str, reply: Reply) -> Self {
        self.script
            .entry(method.to_string())
            .or_default()
            .push(reply);
        self
    }

    /// Fail the first `count` connection attempts.
    #[must_use]
    pub fn fail_connects(mut self, count: usize) -> Self {
        self.fail_connects = count;
        self
    }

    /// Build the MockSignalingServer.
    #[must_use]
    pub fn build(self) -> MockSignalingServer {
        MockSignalingServer {
            inner: Arc::new(Inner {
                script: Mutex::new(self.script),
                peers: self.peers,
                fail_connects: AtomicUsize::new(self.fail_connects),
                connects: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                next_server_request_id: AtomicU64::new(1),
                state: Mutex::new(ServerState::default()),
                changed: Notify::new(),
            }),
        }
    }
}

// ============================================================================
// Connector
// ============================================================================

struct MockConnector {
    inner: Arc<Inner>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<WireConnection, TransportError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .inner
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.inner.changed.notify_waiters();
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (to_server, from_client) = mpsc::unbounded::<OutboundFrame>();
        let (to_client, from_server) = mpsc::unbounded::<Result<String, TransportError>>();
        self.inner.state.lock().unwrap().connection = Some(to_client);
        self.inner.changed.notify_waiters();

        tokio::spawn(serve(Arc::clone(&self.inner), from_client));

        Ok(WireConnection {
            sink: Box::pin(to_server.sink_map_err(|_| TransportError::Closed)),
            stream: Box::pin(from_server),
        })
    }
}

async fn serve(inner: Arc<Inner>, mut from_client: mpsc::UnboundedReceiver<OutboundFrame>) {
    while let Some(frame) = from_client.next().await {
        match frame {
            OutboundFrame::Text(text) => handle_frame(&inner, &text),
            OutboundFrame::Close { code, reason } => {
                let mut state = inner.state.lock().unwrap();
                state.client_closes.push((code, reason));
                state.connection = None;
            }
        }
        inner.changed.notify_waiters();
    }
    inner.changed.notify_waiters();
}

fn handle_frame(inner: &Inner, text: &str) {
    let message = codec::decode(text).expect("client sends valid protoo frames");
    match message {
        Message::Request(request) => {
            let received = ReceivedRequest {
                id: request.id,
                method: request.method.clone(),
                data: request.data.clone(),
            };
            inner.state.lock().unwrap().requests.push(received);

            let reply = next_reply(inner, &request.method, &request.data);
            if let Some(message) = reply_message(request.id, reply) {
                let text = codec::encode(&message).expect("reply encodes");
                let state = inner.state.lock().unwrap();
                if let Some(connection) = &state.connection {
                    let _ = connection.unbounded_send(Ok(text));
                }
            }
        }
        Message::Response(response) => {
            inner
                .state
                .lock()
                .unwrap()
                .responses
                .insert(response.id, response);
        }
        Message::Notification(_) => {}
    }
}

fn next_reply(inner: &Inner, method: &str, data: &Value) -> Reply {
    let scripted = {
        let mut script = inner.script.lock().unwrap();
        script
            .get_mut(method)
            .filter(|replies| !replies.is_empty())
            .map(|replies| replies.remove(0))
    };
    scripted.unwrap_or_else(|| default_reply(inner, method, data))
}

fn default_reply(inner: &Inner, method: &str, data: &Value) -> Reply {
    let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
    Reply::Accept(match method {
        "getRouterRtpCapabilities" => router_rtp_capabilities(),
        "createWebRtcTransport" => {
            let role = if data.get("producing") == Some(&Value::Bool(true)) {
                "send"
            } else {
                "recv"
            };
            to_value(&transport_info(&format!("{role}-transport-{id}")))
        }
        "join" => to_value(&JoinResponse {
            peers: inner.peers.clone(),
        }),
        "produce" => json!({ "id": format!("producer-{id}") }),
        "produceData" => json!({ "id": format!("data-producer-{id}") }),
        "restartIce" => ice_parameters(),
        _ => json!({}),
    })
}

fn reply_message(id: u64, reply: Reply) -> Option<Message> {
    match reply {
        Reply::Accept(data) => Some(Message::accept(id, data)),
        Reply::Reject { code, reason } => Some(Message::reject(id, code, reason)),
        Reply::Silent => None,
    }
}

/// Whether `response` accepted.
#[must_use]
pub fn is_accepted(response: &Response) -> bool {
    matches!(response.outcome, ResponseOutcome::Accepted(_))
}
