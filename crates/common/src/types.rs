//! Common data types for the SFU room client.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl MediaKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor of the device a peer joined from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Short platform flag (e.g. "rust", "chrome")
    pub flag: String,
    /// Human-readable device name
    pub name: String,
    /// Client or platform version
    pub version: String,
}

impl DeviceInfo {
    /// Device descriptor for this client build.
    #[must_use]
    pub fn native(name: impl Into<String>) -> Self {
        Self {
            flag: "rust".to_string(),
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self::native("Rust Room Client")
    }
}

/// Connection state of a room session.
///
/// `New -> Connecting -> Connected -> Closed`. `Closed` is terminal.
/// `Connected -> Connecting` happens while the signaling channel reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Session created, `join` not yet called
    #[default]
    New,
    /// Signaling channel opening or reconnecting
    Connecting,
    /// Joined the room
    Connected,
    /// Session torn down
    Closed,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::New, ConnectionState::Connecting)
                | (ConnectionState::Connecting, ConnectionState::Connected)
                | (ConnectionState::Connected, ConnectionState::Connecting)
                | (ConnectionState::Connecting, ConnectionState::Connecting)
                | (
                    ConnectionState::New
                        | ConnectionState::Connecting
                        | ConnectionState::Connected,
                    ConnectionState::Closed
                )
        )
    }

    /// Whether the state is terminal.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}
