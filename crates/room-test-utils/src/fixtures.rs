//! Test fixtures for room client testing.
//!
//! Payloads mirror what a mediasoup-demo server sends, trimmed to the
//! fields the client reads.

use common::types::{ConnectionState, DeviceInfo, MediaKind};
use room_client::store::RoomStore;
use room_client::transport::ReconnectPolicy;
use room_client::RoomConfig;
use serde_json::{json, Value};
use signaling_protocol::payloads::{
    ConsumerType, NewConsumerRequest, NewDataConsumerRequest, PeerInfo, WebRtcTransportInfo,
};
use std::time::Duration;

/// Default timeout of the `wait_for_*` helpers.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration pointing at an in-memory server, with fast reconnection.
#[must_use]
pub fn test_config(room_id: &str) -> RoomConfig {
    RoomConfig::new(room_id, "test-peer")
        .with_display_name("Tester")
        .with_reconnect(fast_reconnect())
}

/// Backoff of 10 ms doubling to 40 ms, three retries.
#[must_use]
pub fn fast_reconnect() -> ReconnectPolicy {
    ReconnectPolicy {
        max_retries: 3,
        factor: 2,
        min_timeout: Duration::from_millis(10),
        max_timeout: Duration::from_millis(40),
    }
}

#[must_use]
pub fn router_rtp_capabilities() -> Value {
    json!({
        "codecs": [
            {
                "kind": "audio",
                "mimeType": "audio/opus",
                "clockRate": 48000,
                "channels": 2,
                "preferredPayloadType": 100
            },
            {
                "kind": "video",
                "mimeType": "video/VP8",
                "clockRate": 90000,
                "preferredPayloadType": 101
            }
        ],
        "headerExtensions": []
    })
}

#[must_use]
pub fn transport_info(id: &str) -> WebRtcTransportInfo {
    WebRtcTransportInfo {
        id: id.to_string(),
        ice_parameters: ice_parameters(),
        ice_candidates: json!([{
            "foundation": "udpcandidate",
            "ip": "127.0.0.1",
            "port": 44444,
            "priority": 1_076_302_079,
            "protocol": "udp",
            "type": "host"
        }]),
        dtls_parameters: json!({
            "role": "auto",
            "fingerprints": [{ "algorithm": "sha-256", "value": "AA:BB" }]
        }),
        sctp_parameters: Some(json!({ "port": 5000, "OS": 1024, "MIS": 1024 })),
    }
}

#[must_use]
pub fn ice_parameters() -> Value {
    json!({ "usernameFragment": "ufrag", "password": "pwd", "iceLite": true })
}

#[must_use]
pub fn peer_info(id: &str, display_name: &str) -> PeerInfo {
    PeerInfo {
        id: id.to_string(),
        display_name: display_name.to_string(),
        device: Some(DeviceInfo::native("test-device")),
    }
}

#[must_use]
pub fn new_consumer(id: &str, peer_id: &str, kind: MediaKind) -> NewConsumerRequest {
    NewConsumerRequest {
        peer_id: peer_id.to_string(),
        producer_id: format!("remote-{id}"),
        id: id.to_string(),
        kind,
        rtp_parameters: json!({ "codecs": [], "encodings": [{ "ssrc": 1111 }] }),
        consumer_type: ConsumerType::Simple,
        app_data: json!({}),
        producer_paused: false,
    }
}

#[must_use]
pub fn new_data_consumer(id: &str, peer_id: &str, label: &str) -> NewDataConsumerRequest {
    NewDataConsumerRequest {
        peer_id: Some(peer_id.to_string()),
        data_producer_id: format!("remote-{id}"),
        id: id.to_string(),
        sctp_stream_parameters: json!({ "streamId": 0, "ordered": true }),
        label: label.to_string(),
        protocol: label.to_string(),
        app_data: json!({}),
    }
}

/// Serialize a payload, panicking on failure.
pub fn to_value<T: serde::Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).expect("fixture serializes")
}

/// Wait until the room reaches `state`, panicking after [`WAIT_TIMEOUT`].
pub async fn wait_for_state(store: &RoomStore, state: ConnectionState) {
    let mut rx = store.room().subscribe();
    tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(|room| room.value.state == state))
        .await
        .unwrap_or_else(|_| panic!("room never reached {state:?}"))
        .expect("store dropped");
}

/// Wait until `predicate` holds for the store, panicking after [`WAIT_TIMEOUT`].
///
/// Polled every 5 ms.
pub async fn wait_until(store: &RoomStore, predicate: impl Fn(&RoomStore) -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if predicate(store) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {WAIT_TIMEOUT:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
