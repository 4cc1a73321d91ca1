//! Server-initiated requests and their single-use responders.

use crate::errors::RpcError;
use crate::transport::RetryingTransport;
use serde::Serialize;
use serde_json::Value;
use signaling_protocol::codec;
use signaling_protocol::message::{empty_data, Message, Request};
use signaling_protocol::methods::ServerRequestMethod;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Response code of the implicit reject sent when a request times out.
pub const TIMEOUT_REJECT_CODE: i64 = 408;

/// Reason of the implicit reject sent when a request times out.
pub const TIMEOUT_REJECT_REASON: &str = "request timeout";

/// A request sent by the server, awaiting exactly one accept or reject.
#[derive(Debug)]
pub struct ServerRequest {
    method: ServerRequestMethod,
    data: Value,
    responder: Responder,
}

impl ServerRequest {
    pub(crate) fn new(request: Request, transport: RetryingTransport, timeout: Duration) -> Self {
        let answered = Arc::new(AtomicBool::new(false));
        let id = request.id;

        let timer = {
            let answered = Arc::clone(&answered);
            let transport = transport.clone();
            let method = request.method.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if answered.swap(true, Ordering::SeqCst) {
                    return;
                }
                warn!(
                    target: "room.rpc",
                    id,
                    method = %method,
                    "Server request unanswered, rejecting"
                );
                let reject = Message::reject(id, TIMEOUT_REJECT_CODE, TIMEOUT_REJECT_REASON);
                if let Ok(frame) = codec::encode(&reject) {
                    let _ = transport.send(frame);
                }
            })
            .abort_handle()
        };

        Self {
            method: ServerRequestMethod::parse(&request.method),
            data: request.data,
            responder: Responder {
                id,
                transport,
                answered,
                timer,
            },
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.responder.id
    }

    #[must_use]
    pub fn method(&self) -> &ServerRequestMethod {
        &self.method
    }

    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Split into method, payload and responder.
    #[must_use]
    pub fn into_parts(self) -> (ServerRequestMethod, Value, Responder) {
        (self.method, self.data, self.responder)
    }
}

/// Answers one server request. Consumed by `accept` or `reject`.
#[derive(Debug)]
pub struct Responder {
    id: u64,
    transport: RetryingTransport,
    answered: Arc<AtomicBool>,
    timer: AbortHandle,
}

impl Responder {
    /// Accept with a payload.
    pub fn accept<T: Serialize + ?Sized>(self, data: &T) -> Result<(), RpcError> {
        let data = serde_json::to_value(data).map_err(|e| RpcError::Encode(e.to_string()))?;
        self.respond(&Message::accept(self.id, data))
    }

    /// Accept with an empty payload.
    pub fn accept_empty(self) -> Result<(), RpcError> {
        self.respond(&Message::accept(self.id, empty_data()))
    }

    /// Reject with a code and reason.
    pub fn reject(self, code: i64, reason: impl Into<String>) -> Result<(), RpcError> {
        let reason = reason.into();
        debug!(target: "room.rpc", id = self.id, code, reason = %reason, "Rejecting server request");
        self.respond(&Message::reject(self.id, code, reason))
    }

    /// Whether a response (explicit or timeout) has been sent.
    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.answered.load(Ordering::SeqCst)
    }

    fn respond(&self, message: &Message) -> Result<(), RpcError> {
        if self.answered.swap(true, Ordering::SeqCst) {
            return Err(RpcError::AlreadyAnswered);
        }
        self.timer.abort();
        let frame = codec::encode(message).map_err(|e| RpcError::Encode(e.to_string()))?;
        self.transport.send(frame)?;
        Ok(())
    }
}
