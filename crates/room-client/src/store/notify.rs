//! Ephemeral user notifications.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::time::Duration;

/// Default display timeout of info notifications.
pub const DEFAULT_INFO_TIMEOUT: Duration = Duration::from_millis(3_000);

/// Default display timeout of error notifications.
pub const DEFAULT_ERROR_TIMEOUT: Duration = Duration::from_millis(5_000);

const NOTIFY_ID_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyKind {
    Info,
    Error,
}

/// A transient message for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notify {
    pub id: String,
    pub kind: NotifyKind,
    pub text: String,
    pub timeout: Duration,
}

impl Notify {
    pub fn info(text: impl Into<String>) -> Self {
        Self::new(NotifyKind::Info, text.into(), DEFAULT_INFO_TIMEOUT)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(NotifyKind::Error, text.into(), DEFAULT_ERROR_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn new(kind: NotifyKind, text: String, timeout: Duration) -> Self {
        let id = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NOTIFY_ID_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        Self {
            id,
            kind,
            text,
            timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        assert_eq!(Notify::info("hi").timeout, DEFAULT_INFO_TIMEOUT);
        assert_eq!(Notify::error("oops").timeout, DEFAULT_ERROR_TIMEOUT);
        assert_eq!(
            Notify::info("hi").with_timeout(Duration::from_secs(1)).timeout,
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_id_shape() {
        let notify = Notify::info("hi");
        assert_eq!(notify.id.len(), NOTIFY_ID_LEN);
        assert!(notify
            .id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
