//! Closed enumerations of signaling method names.
//!
//! Inbound method strings are parsed into these enums once, at the edge,
//! so dispatch is an exhaustive `match` with an explicit `Unknown` arm.

use std::fmt;

/// Requests the client sends to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientMethod {
    GetRouterRtpCapabilities,
    CreateWebRtcTransport,
    ConnectWebRtcTransport,
    Join,
    Produce,
    ProduceData,
    CloseProducer,
    PauseProducer,
    ResumeProducer,
    PauseConsumer,
    ResumeConsumer,
    RestartIce,
    ChangeDisplayName,
    RequestConsumerKeyFrame,
}

impl ClientMethod {
    /// Wire name of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ClientMethod::GetRouterRtpCapabilities => "getRouterRtpCapabilities",
            ClientMethod::CreateWebRtcTransport => "createWebRtcTransport",
            ClientMethod::ConnectWebRtcTransport => "connectWebRtcTransport",
            ClientMethod::Join => "join",
            ClientMethod::Produce => "produce",
            ClientMethod::ProduceData => "produceData",
            ClientMethod::CloseProducer => "closeProducer",
            ClientMethod::PauseProducer => "pauseProducer",
            ClientMethod::ResumeProducer => "resumeProducer",
            ClientMethod::PauseConsumer => "pauseConsumer",
            ClientMethod::ResumeConsumer => "resumeConsumer",
            ClientMethod::RestartIce => "restartIce",
            ClientMethod::ChangeDisplayName => "changeDisplayName",
            ClientMethod::RequestConsumerKeyFrame => "requestConsumerKeyFrame",
        }
    }
}

impl fmt::Display for ClientMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requests the server sends to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerRequestMethod {
    NewConsumer,
    NewDataConsumer,
    Unknown(String),
}

impl ServerRequestMethod {
    /// Parse a wire method name.
    #[must_use]
    pub fn parse(method: &str) -> Self {
        match method {
            "newConsumer" => ServerRequestMethod::NewConsumer,
            "newDataConsumer" => ServerRequestMethod::NewDataConsumer,
            other => ServerRequestMethod::Unknown(other.to_string()),
        }
    }

    /// Wire name of the method.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            ServerRequestMethod::NewConsumer => "newConsumer",
            ServerRequestMethod::NewDataConsumer => "newDataConsumer",
            ServerRequestMethod::Unknown(method) => method,
        }
    }
}

/// Notifications the server sends to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationMethod {
    ProducerScore,
    NewPeer,
    PeerClosed,
    PeerDisplayNameChanged,
    ConsumerClosed,
    ConsumerPaused,
    ConsumerResumed,
    ConsumerLayersChanged,
    ConsumerScore,
    ActiveSpeaker,
    DataConsumerClosed,
    DownlinkBwe,
    Unknown(String),
}

impl NotificationMethod {
    /// Parse a wire method name.
    #[must_use]
    pub fn parse(method: &str) -> Self {
        match method {
            "producerScore" => NotificationMethod::ProducerScore,
            "newPeer" => NotificationMethod::NewPeer,
            "peerClosed" => NotificationMethod::PeerClosed,
            "peerDisplayNameChanged" => NotificationMethod::PeerDisplayNameChanged,
            "consumerClosed" => NotificationMethod::ConsumerClosed,
            "consumerPaused" => NotificationMethod::ConsumerPaused,
            "consumerResumed" => NotificationMethod::ConsumerResumed,
            "consumerLayersChanged" => NotificationMethod::ConsumerLayersChanged,
            "consumerScore" => NotificationMethod::ConsumerScore,
            "activeSpeaker" => NotificationMethod::ActiveSpeaker,
            "dataConsumerClosed" => NotificationMethod::DataConsumerClosed,
            "downlinkBwe" => NotificationMethod::DownlinkBwe,
            other => NotificationMethod::Unknown(other.to_string()),
        }
    }

    /// Wire name of the method.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            NotificationMethod::ProducerScore => "producerScore",
            NotificationMethod::NewPeer => "newPeer",
            NotificationMethod::PeerClosed => "peerClosed",
            NotificationMethod::PeerDisplayNameChanged => "peerDisplayNameChanged",
            NotificationMethod::ConsumerClosed => "consumerClosed",
            NotificationMethod::ConsumerPaused => "consumerPaused",
            NotificationMethod::ConsumerResumed => "consumerResumed",
            NotificationMethod::ConsumerLayersChanged => "consumerLayersChanged",
            NotificationMethod::ConsumerScore => "consumerScore",
            NotificationMethod::ActiveSpeaker => "activeSpeaker",
            NotificationMethod::DataConsumerClosed => "dataConsumerClosed",
            NotificationMethod::DownlinkBwe => "downlinkBwe",
            NotificationMethod::Unknown(method) => method,
        }
    }

    /// Bounded label for metrics; unknown methods collapse to "unknown".
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            NotificationMethod::ProducerScore => "producerScore",
            NotificationMethod::NewPeer => "newPeer",
            NotificationMethod::PeerClosed => "peerClosed",
            NotificationMethod::PeerDisplayNameChanged => "peerDisplayNameChanged",
            NotificationMethod::ConsumerClosed => "consumerClosed",
            NotificationMethod::ConsumerPaused => "consumerPaused",
            NotificationMethod::ConsumerResumed => "consumerResumed",
            NotificationMethod::ConsumerLayersChanged => "consumerLayersChanged",
            NotificationMethod::ConsumerScore => "consumerScore",
            NotificationMethod::ActiveSpeaker => "activeSpeaker",
            NotificationMethod::DataConsumerClosed => "dataConsumerClosed",
            NotificationMethod::DownlinkBwe => "downlinkBwe",
            NotificationMethod::Unknown(_) => "unknown",
        }
    }
}
