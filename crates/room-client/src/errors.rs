//! Room client error types.
//!
//! Errors never cross the worker boundary as panics: the session either turns
//! them into a user notification or returns them as values. `error_code()`
//! gives the numeric code used when an error has to be reported back to the
//! server as a request rejection.

use crate::config::ConfigError;
use thiserror::Error;

/// Signaling channel errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Opening the socket failed.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// The live socket failed while reading or writing.
    #[error("Socket error: {0}")]
    Socket(String),

    /// No socket is live; the transport is connecting or reconnecting.
    #[error("not connected")]
    NotConnected,

    /// The transport was closed and accepts no more frames.
    #[error("transport closed")]
    Closed,
}

/// Request/response protocol errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    /// The server answered with `ok: false`.
    #[error("request rejected [code:{code}, reason:\"{reason}\"]")]
    Rejected { code: i64, reason: String },

    /// The peer was closed before a response arrived.
    #[error("transport closed")]
    TransportClosed,

    /// The socket dropped; responses cannot arrive on the next one.
    #[error("connection lost")]
    ConnectionLost,

    /// Sending the request failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The request payload could not be encoded.
    #[error("Encode error: {0}")]
    Encode(String),

    /// The response payload did not match the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A blocking request was issued from inside the async runtime.
    #[error("blocking request issued from an async context")]
    BlockingInAsyncContext,

    /// A server request was already answered (possibly by its timeout).
    #[error("request already answered")]
    AlreadyAnswered,
}

/// Media engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    /// Capabilities have not been loaded yet.
    #[error("media engine not loaded")]
    NotLoaded,

    /// Capabilities were already loaded.
    #[error("media engine already loaded")]
    AlreadyLoaded,

    /// The engine cannot handle this media kind or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Signaling issued on behalf of a media transport failed.
    #[error("Signaling failed: {0}")]
    Signaling(String),

    /// Any other engine failure.
    #[error("Media engine error: {0}")]
    Engine(String),
}

impl From<RpcError> for MediaError {
    fn from(e: RpcError) -> Self {
        MediaError::Signaling(e.to_string())
    }
}

/// Room client error type.
///
/// Maps to response codes when rejecting a server request:
/// - `Protocol`: 400
/// - `Capability`: 403
/// - `InvalidState`, `Closed`: 409
/// - everything else: 500
#[derive(Debug, Error)]
pub enum RoomError {
    /// Signaling channel failure.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// Request rejected or unanswered.
    #[error("{0}")]
    Rpc(#[from] RpcError),

    /// Media engine failure.
    #[error("{0}")]
    Media(#[from] MediaError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed inbound payload.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The session opted out of this capability.
    #[error("Capability disabled: {0}")]
    Capability(String),

    /// Operation not allowed in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The session has been closed.
    #[error("room closed")]
    Closed,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoomError {
    /// Response code used when this error rejects a server request.
    pub fn error_code(&self) -> i64 {
        match self {
            RoomError::Protocol(_) => 400,
            RoomError::Capability(_) => 403,
            RoomError::InvalidState(_) | RoomError::Closed => 409,
            RoomError::Transport(_)
            | RoomError::Rpc(_)
            | RoomError::Media(_)
            | RoomError::Config(_)
            | RoomError::Internal(_) => 500,
        }
    }

    /// Message suitable for a user-facing notification.
    pub fn client_message(&self) -> String {
        match self {
            RoomError::Rpc(RpcError::Rejected { reason, .. }) if !reason.is_empty() => {
                reason.clone()
            }
            RoomError::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for RoomError {
    fn from(e: serde_json::Error) -> Self {
        RoomError::Protocol(e.to_string())
    }
}
