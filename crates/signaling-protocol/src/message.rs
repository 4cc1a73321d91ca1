//! Signaling message envelopes.

use serde_json::{Map, Value};

/// A decoded signaling message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Request expecting exactly one response with the same id
    Request(Request),
    /// Response to an earlier request
    Response(Response),
    /// Fire-and-forget notification
    Notification(Notification),
}

/// Request envelope: `{request: true, id, method, data}`
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id, unique per sender
    pub id: u64,
    /// Method name
    pub method: String,
    /// Method payload
    pub data: Value,
}

/// Response envelope: `{response: true, id, ok, data | errorCode, errorReason}`
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Id of the request this answers
    pub id: u64,
    /// Accept or reject outcome
    pub outcome: ResponseOutcome,
}

/// Outcome carried by a response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// Request accepted with a payload
    Accepted(Value),
    /// Request rejected with a numeric code and reason
    Rejected { code: i64, reason: String },
}

/// Notification envelope: `{notification: true, method, data}`
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method name
    pub method: String,
    /// Method payload
    pub data: Value,
}

/// Empty JSON object, the payload of data-less messages.
#[must_use]
pub fn empty_data() -> Value {
    Value::Object(Map::new())
}

impl Message {
    /// Build a request.
    pub fn request(id: u64, method: impl Into<String>, data: Value) -> Self {
        Message::Request(Request {
            id,
            method: method.into(),
            data,
        })
    }

    /// Build an accepting response.
    #[must_use]
    pub fn accept(id: u64, data: Value) -> Self {
        Message::Response(Response {
            id,
            outcome: ResponseOutcome::Accepted(data),
        })
    }

    /// Build a rejecting response.
    pub fn reject(id: u64, code: i64, reason: impl Into<String>) -> Self {
        Message::Response(Response {
            id,
            outcome: ResponseOutcome::Rejected {
                code,
                reason: reason.into(),
            },
        })
    }

    /// Build a notification.
    pub fn notification(method: impl Into<String>, data: Value) -> Self {
        Message::Notification(Notification {
            method: method.into(),
            data,
        })
    }

    /// Method name, if the message carries one.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            Message::Response(_) => None,
        }
    }
}
