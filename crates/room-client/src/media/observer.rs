//! Signaling-only media engine.
//!
//! Loads router capabilities and advertises them back, but refuses to
//! produce or open media transports. Lets a session join with produce and
//! consume disabled and follow room activity.

use super::{
    LocalTrack, MediaEngine, MediaEventSender, RecvTransport, SendTransport, TransportSignaler,
};
use crate::errors::MediaError;
use async_trait::async_trait;
use common::types::MediaKind;
use serde_json::{json, Value};
use signaling_protocol::payloads::WebRtcTransportInfo;
use std::sync::{Arc, OnceLock};

/// SCTP stream counts advertised by the observer.
const SCTP_STREAMS: u16 = 1024;

#[derive(Debug, Default)]
pub struct ObserverEngine {
    capabilities: OnceLock<Value>,
}

impl ObserverEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MediaEngine for ObserverEngine {
    fn is_loaded(&self) -> bool {
        self.capabilities.get().is_some()
    }

    async fn load(&self, router_rtp_capabilities: &Value) -> Result<(), MediaError> {
        self.capabilities
            .set(router_rtp_capabilities.clone())
            .map_err(|_| MediaError::AlreadyLoaded)
    }

    fn rtp_capabilities(&self) -> Result<Value, MediaError> {
        self.capabilities.get().cloned().ok_or(MediaError::NotLoaded)
    }

    fn sctp_capabilities(&self) -> Result<Value, MediaError> {
        if !self.is_loaded() {
            return Err(MediaError::NotLoaded);
        }
        Ok(json!({ "numStreams": { "OS": SCTP_STREAMS, "MIS": SCTP_STREAMS } }))
    }

    fn can_produce(&self, _kind: MediaKind) -> bool {
        false
    }

    fn can_change_camera(&self) -> bool {
        false
    }

    async fn create_send_transport(
        &self,
        _info: &WebRtcTransportInfo,
        _signaler: Arc<dyn TransportSignaler>,
        _events: MediaEventSender,
    ) -> Result<Arc<dyn SendTransport>, MediaError> {
        Err(MediaError::Unsupported("observer cannot send media".to_string()))
    }

    async fn create_recv_transport(
        &self,
        _info: &WebRtcTransportInfo,
        _signaler: Arc<dyn TransportSignaler>,
        _events: MediaEventSender,
    ) -> Result<Arc<dyn RecvTransport>, MediaError> {
        Err(MediaError::Unsupported("observer cannot receive media".to_string()))
    }

    async fn acquire_track(&self, kind: MediaKind) -> Result<LocalTrack, MediaError> {
        Err(MediaError::Unsupported(format!("observer has no {kind} capture")))
    }

    async fn switch_camera(&self) -> Result<(), MediaError> {
        Err(MediaError::Unsupported("observer has no camera".to_string()))
    }

    fn release(&self) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_is_one_shot() {
        let engine = ObserverEngine::new();
        assert!(!engine.is_loaded());
        assert_eq!(engine.rtp_capabilities(), Err(MediaError::NotLoaded));

        engine.load(&json!({"codecs": []})).await.unwrap();
        assert!(engine.is_loaded());
        assert_eq!(engine.rtp_capabilities().unwrap(), json!({"codecs": []}));
        assert_eq!(
            engine.load(&json!({})).await,
            Err(MediaError::AlreadyLoaded)
        );
    }

    #[test]
    fn test_never_produces() {
        let engine = ObserverEngine::new();
        assert!(!engine.can_produce(MediaKind::Audio));
        assert!(!engine.can_produce(MediaKind::Video));
    }
}
