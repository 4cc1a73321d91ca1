//! Codec for encoding and decoding signaling envelopes as JSON text frames.

use crate::message::{empty_data, Message, Notification, Request, Response, ResponseOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error code used when a rejecting response omits `errorCode`.
pub const DEFAULT_ERROR_CODE: i64 = 500;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame is not valid JSON or has wrongly typed fields
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Required field absent
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Id is neither a number nor a numeric string
    #[error("Invalid id: {0}")]
    InvalidId(String),

    /// Envelope matches none of request, response, or notification
    #[error("Unclassifiable envelope")]
    Unclassifiable,

    /// Serialization failed
    #[error("Encode failed: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

impl RawId {
    fn into_u64(self) -> Result<u64, CodecError> {
        match self {
            RawId::Number(n) => Ok(n),
            RawId::Text(s) => s.parse().map_err(|_| CodecError::InvalidId(s)),
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default, skip_serializing_if = "is_false")]
    request: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    response: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    notification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<RawId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_reason: Option<String>,
}

/// Encode a message to a JSON text frame
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn encode(message: &Message) -> Result<String, CodecError> {
    let envelope = match message {
        Message::Request(r) => Envelope {
            request: true,
            id: Some(RawId::Number(r.id)),
            method: Some(r.method.clone()),
            data: Some(r.data.clone()),
            ..Envelope::default()
        },
        Message::Response(r) => match &r.outcome {
            ResponseOutcome::Accepted(data) => Envelope {
                response: true,
                id: Some(RawId::Number(r.id)),
                ok: Some(true),
                data: Some(data.clone()),
                ..Envelope::default()
            },
            ResponseOutcome::Rejected { code, reason } => Envelope {
                response: true,
                id: Some(RawId::Number(r.id)),
                ok: Some(false),
                error_code: Some(*code),
                error_reason: Some(reason.clone()),
                ..Envelope::default()
            },
        },
        Message::Notification(n) => Envelope {
            notification: true,
            method: Some(n.method.clone()),
            data: Some(n.data.clone()),
            ..Envelope::default()
        },
    };

    serde_json::to_string(&envelope).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a JSON text frame into a message
///
/// Envelopes without the `request`/`response`/`notification` flags are
/// classified by shape: `ok` or `errorCode` with an id is a response, an
/// id with a method is a request, a method alone is a notification.
///
/// # Errors
///
/// Returns an error if the frame is malformed or unclassifiable
pub fn decode(text: &str) -> Result<Message, CodecError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let id = envelope.id.map(RawId::into_u64).transpose()?;
    let data = envelope.data.unwrap_or_else(empty_data);

    let looks_like_response =
        envelope.ok.is_some() || envelope.error_code.is_some() || envelope.error_reason.is_some();

    if envelope.response || (looks_like_response && envelope.method.is_none()) {
        let id = id.ok_or(CodecError::MissingField("id"))?;
        let accepted = envelope.ok.unwrap_or(envelope.error_code.is_none());
        let outcome = if accepted {
            ResponseOutcome::Accepted(data)
        } else {
            ResponseOutcome::Rejected {
                code: envelope.error_code.unwrap_or(DEFAULT_ERROR_CODE),
                reason: envelope.error_reason.unwrap_or_default(),
            }
        };
        return Ok(Message::Response(Response { id, outcome }));
    }

    if envelope.request || (id.is_some() && envelope.method.is_some() && !envelope.notification) {
        let id = id.ok_or(CodecError::MissingField("id"))?;
        let method = envelope.method.ok_or(CodecError::MissingField("method"))?;
        return Ok(Message::Request(Request { id, method, data }));
    }

    if let Some(method) = envelope.method {
        return Ok(Message::Notification(Notification { method, data }));
    }

    if envelope.notification {
        return Err(CodecError::MissingField("method"));
    }

    Err(CodecError::Unclassifiable)
}
