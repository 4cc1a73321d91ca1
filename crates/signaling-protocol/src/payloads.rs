//! Typed payloads of signaling methods.
//!
//! Opaque negotiation blobs (RTP capabilities, ICE/DTLS parameters, RTP and
//! SCTP parameters) are carried as `serde_json::Value` and handed to the
//! media engine untouched.

use common::types::{DeviceInfo, MediaKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn empty_object() -> Value {
    crate::message::empty_data()
}

// ============================================================================
// Shared id payloads
// ============================================================================

/// `{transportId}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportIdPayload {
    pub transport_id: String,
}

/// `{producerId}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerIdPayload {
    pub producer_id: String,
}

/// `{consumerId}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerIdPayload {
    pub consumer_id: String,
}

/// `{id}`, returned by `produce` and `produceData`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdResponse {
    pub id: String,
}

// ============================================================================
// Client requests
// ============================================================================

/// `createWebRtcTransport` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWebRtcTransportRequest {
    pub force_tcp: bool,
    pub producing: bool,
    pub consuming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sctp_capabilities: Option<Value>,
}

/// `createWebRtcTransport` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebRtcTransportInfo {
    pub id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sctp_parameters: Option<Value>,
}

/// `connectWebRtcTransport` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectWebRtcTransportRequest {
    pub transport_id: String,
    pub dtls_parameters: Value,
}

/// `join` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub display_name: String,
    pub device: DeviceInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtp_capabilities: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sctp_capabilities: Option<Value>,
}

/// A peer already in the room, or one announced by `newPeer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub device: Option<DeviceInfo>,
}

/// `join` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinResponse {
    #[serde(default)]
    pub peers: Vec<PeerInfo>,
}

/// `produce` request, issued when the send transport produces a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub transport_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    #[serde(default = "empty_object")]
    pub app_data: Value,
}

/// `produceData` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceDataRequest {
    pub transport_id: String,
    pub sctp_stream_parameters: Value,
    pub label: String,
    pub protocol: String,
    #[serde(default = "empty_object")]
    pub app_data: Value,
}

/// `changeDisplayName` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDisplayNameRequest {
    pub display_name: String,
}

// ============================================================================
// Server requests
// ============================================================================

/// Consumer flavour reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerType {
    #[default]
    Simple,
    Simulcast,
    Svc,
    Pipe,
}

/// `newConsumer` server request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConsumerRequest {
    pub peer_id: String,
    pub producer_id: String,
    pub id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    #[serde(rename = "type", default)]
    pub consumer_type: ConsumerType,
    #[serde(default = "empty_object")]
    pub app_data: Value,
    #[serde(default)]
    pub producer_paused: bool,
}

/// `newDataConsumer` server request. `peer_id` is absent for the server's own bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDataConsumerRequest {
    #[serde(default)]
    pub peer_id: Option<String>,
    pub data_producer_id: String,
    pub id: String,
    pub sctp_stream_parameters: Value,
    pub label: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default = "empty_object")]
    pub app_data: Value,
}

// ============================================================================
// Notifications
// ============================================================================

/// One per-stream quality sample of a producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSample {
    #[serde(default)]
    pub encoding_idx: u32,
    pub ssrc: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    pub score: u8,
}

/// `producerScore` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerScoreNotification {
    pub producer_id: String,
    #[serde(default)]
    pub score: Vec<ScoreSample>,
}

/// `peerClosed` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerClosedNotification {
    pub peer_id: String,
}

/// `peerDisplayNameChanged` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDisplayNameChangedNotification {
    pub peer_id: String,
    pub display_name: String,
    #[serde(default)]
    pub old_display_name: String,
}

/// `consumerLayersChanged` notification. Null layers mean none is being received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerLayersChangedNotification {
    pub consumer_id: String,
    #[serde(default)]
    pub spatial_layer: Option<i32>,
    #[serde(default)]
    pub temporal_layer: Option<i32>,
}

/// Quality score of a consumer and the producer feeding it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerScore {
    #[serde(default)]
    pub score: u8,
    #[serde(default)]
    pub producer_score: u8,
    #[serde(default)]
    pub producer_scores: Vec<u8>,
}

/// `consumerScore` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerScoreNotification {
    pub consumer_id: String,
    pub score: ConsumerScore,
}

/// `activeSpeaker` notification. A null peer id clears the speaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSpeakerNotification {
    #[serde(default)]
    pub peer_id: Option<String>,
    #[serde(default)]
    pub volume: Option<i32>,
}

/// `dataConsumerClosed` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataConsumerClosedNotification {
    pub data_consumer_id: String,
}

/// `downlinkBwe` notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownlinkBweNotification {
    #[serde(default)]
    pub desired_bitrate: Option<u64>,
    #[serde(default)]
    pub effective_desired_bitrate: Option<u64>,
    #[serde(default)]
    pub available_bitrate: Option<u64>,
}
