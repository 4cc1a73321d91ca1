//! Room client configuration.
//!
//! Configuration is loaded from environment variables once, at session
//! construction, and is immutable for the session's lifetime.

use crate::transport::ReconnectPolicy;
use common::types::DeviceInfo;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default signaling server host.
pub const DEFAULT_SERVER_HOST: &str = "v3demo.mediasoup.org";

/// Default signaling server port.
pub const DEFAULT_SERVER_PORT: u16 = 4443;

/// Default display name.
pub const DEFAULT_DISPLAY_NAME: &str = "Rust Peer";

/// Default timeout before an unanswered server request is rejected.
pub const DEFAULT_SERVER_REQUEST_TIMEOUT_MS: u64 = 15_000;

/// Length of generated peer ids.
const GENERATED_PEER_ID_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Room client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomConfig {
    /// Room to join.
    pub room_id: String,

    /// Local peer id, unique within the room.
    pub peer_id: String,

    /// Display name announced on join.
    pub display_name: String,

    /// Device descriptor announced on join.
    pub device: DeviceInfo,

    /// Signaling server host (default: "v3demo.mediasoup.org").
    pub server_host: String,

    /// Signaling server port (default: 4443).
    pub server_port: u16,

    /// Ask the server for TCP-only ICE candidates.
    pub force_tcp: bool,

    /// Send local microphone/camera.
    pub produce: bool,

    /// Receive remote media.
    pub consume: bool,

    /// Negotiate SCTP data channels.
    pub use_data_channel: bool,

    /// Ask the server to force H264.
    pub force_h264: bool,

    /// Ask the server to force VP9. Ignored when `force_h264` is set.
    pub force_vp9: bool,

    /// Reconnection backoff of the signaling channel.
    pub reconnect: ReconnectPolicy,

    /// Timeout before an unanswered server request is rejected.
    pub server_request_timeout: Duration,
}

impl RoomConfig {
    /// Build a configuration with defaults for everything but the ids.
    pub fn new(room_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            peer_id: peer_id.into(),
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            device: DeviceInfo::default(),
            server_host: DEFAULT_SERVER_HOST.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            force_tcp: false,
            produce: true,
            consume: true,
            use_data_channel: true,
            force_h264: false,
            force_vp9: false,
            reconnect: ReconnectPolicy::default(),
            server_request_timeout: Duration::from_millis(DEFAULT_SERVER_REQUEST_TIMEOUT_MS),
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    #[must_use]
    pub fn with_produce(mut self, produce: bool) -> Self {
        self.produce = produce;
        self
    }

    #[must_use]
    pub fn with_consume(mut self, consume: bool) -> Self {
        self.consume = consume;
        self
    }

    #[must_use]
    pub fn with_data_channel(mut self, use_data_channel: bool) -> Self {
        self.use_data_channel = use_data_channel;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn with_server_request_timeout(mut self, timeout: Duration) -> Self {
        self.server_request_timeout = timeout;
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let room_id = vars
            .get("ROOM_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("ROOM_ID".to_string()))?
            .clone();
        validate_id("ROOM_ID", &room_id)?;

        let peer_id = match vars.get("PEER_ID") {
            Some(id) => {
                validate_id("PEER_ID", id)?;
                id.clone()
            }
            None => generate_peer_id(),
        };

        let mut config = Self::new(room_id, peer_id);

        if let Some(name) = vars.get("DISPLAY_NAME") {
            config.display_name = name.clone();
        }
        if let Some(name) = vars.get("DEVICE_NAME") {
            config.device = DeviceInfo::native(name.clone());
        }
        if let Some(host) = vars.get("ROOM_SERVER_HOST") {
            config.server_host = host.clone();
        }

        config.server_port = parse_var(vars, "ROOM_SERVER_PORT", DEFAULT_SERVER_PORT)?;
        config.force_tcp = parse_bool(vars, "FORCE_TCP", false)?;
        config.produce = parse_bool(vars, "PRODUCE", true)?;
        config.consume = parse_bool(vars, "CONSUME", true)?;
        config.use_data_channel = parse_bool(vars, "USE_DATA_CHANNEL", true)?;
        config.force_h264 = parse_bool(vars, "FORCE_H264", false)?;
        config.force_vp9 = parse_bool(vars, "FORCE_VP9", false)?;

        let defaults = ReconnectPolicy::default();
        let reconnect = ReconnectPolicy {
            max_retries: parse_var(vars, "RECONNECT_MAX_RETRIES", defaults.max_retries)?,
            factor: parse_var(vars, "RECONNECT_FACTOR", defaults.factor)?,
            min_timeout: Duration::from_millis(parse_var(
                vars,
                "RECONNECT_MIN_TIMEOUT_MS",
                duration_millis(defaults.min_timeout),
            )?),
            max_timeout: Duration::from_millis(parse_var(
                vars,
                "RECONNECT_MAX_TIMEOUT_MS",
                duration_millis(defaults.max_timeout),
            )?),
        };
        if reconnect.factor == 0 {
            return Err(ConfigError::InvalidValue(
                "RECONNECT_FACTOR must be at least 1".to_string(),
            ));
        }
        if reconnect.min_timeout > reconnect.max_timeout {
            return Err(ConfigError::InvalidValue(
                "RECONNECT_MIN_TIMEOUT_MS must not exceed RECONNECT_MAX_TIMEOUT_MS".to_string(),
            ));
        }
        config.reconnect = reconnect;

        config.server_request_timeout = Duration::from_millis(parse_var(
            vars,
            "SERVER_REQUEST_TIMEOUT_MS",
            DEFAULT_SERVER_REQUEST_TIMEOUT_MS,
        )?);

        Ok(config)
    }

    fn codec_query(&self) -> &'static str {
        if self.force_h264 {
            "&forceH264=true"
        } else if self.force_vp9 {
            "&forceVP9=true"
        } else {
            ""
        }
    }

    /// URL of the signaling WebSocket for this peer.
    #[must_use]
    pub fn protoo_url(&self) -> String {
        format!(
            "wss://{}:{}/?roomId={}&peerId={}{}",
            self.server_host,
            self.server_port,
            self.room_id,
            self.peer_id,
            self.codec_query()
        )
    }

    /// Link other participants can open to join the same room.
    #[must_use]
    pub fn invitation_link(&self) -> String {
        format!(
            "https://{}/?roomId={}{}",
            self.server_host,
            self.room_id,
            self.codec_query()
        )
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn validate_id(name: &str, value: &str) -> Result<(), ConfigError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue(format!(
            "{name} must be non-empty and URL-safe, got '{value}'"
        )))
    }
}

fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}='{raw}' is not valid"))),
        None => Ok(default),
    }
}

fn parse_bool(
    vars: &HashMap<String, String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(name).map(|s| s.to_ascii_lowercase()) {
        Some(raw) => match raw.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(format!(
                "{name}='{raw}' is not a boolean"
            ))),
        },
        None => Ok(default),
    }
}

fn generate_peer_id() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(GENERATED_PEER_ID_LEN)
        .collect()
}
