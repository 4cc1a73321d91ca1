//! Records published by the store.

use common::types::{ConnectionState, DeviceInfo, MediaKind};
use serde::Serialize;
use signaling_protocol::payloads::{ConsumerScore, ConsumerType, ScoreSample};
use std::collections::BTreeSet;

/// Room-wide state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoomInfo {
    pub room_id: String,
    /// Invitation link for other participants.
    pub url: String,
    pub state: ConnectionState,
    pub active_speaker_id: Option<String>,
    pub stats_peer_id: Option<String>,
    pub face_detection: bool,
}

/// Local peer identity and capability/in-progress flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Me {
    pub id: String,
    pub display_name: String,
    pub device: DeviceInfo,
    pub can_send_mic: bool,
    pub can_send_cam: bool,
    pub can_change_cam: bool,
    pub cam_in_progress: bool,
    pub share_in_progress: bool,
    pub audio_only: bool,
    pub audio_only_in_progress: bool,
    pub audio_muted: bool,
    pub restart_ice_in_progress: bool,
}

impl Me {
    /// Reset capability and in-progress flags, keeping identity.
    pub fn clear_flags(&mut self) {
        *self = Me {
            id: std::mem::take(&mut self.id),
            display_name: std::mem::take(&mut self.display_name),
            device: std::mem::take(&mut self.device),
            ..Me::default()
        };
    }
}

/// What a local producer is sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerSource {
    Mic,
    Cam,
    Share,
}

impl ProducerSource {
    #[must_use]
    pub const fn kind(self) -> MediaKind {
        match self {
            ProducerSource::Mic => MediaKind::Audio,
            ProducerSource::Cam | ProducerSource::Share => MediaKind::Video,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ProducerSource::Mic => "mic",
            ProducerSource::Cam => "cam",
            ProducerSource::Share => "share",
        }
    }
}

/// Local media sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProducerRecord {
    pub id: String,
    pub kind: MediaKind,
    pub source: ProducerSource,
    pub paused: bool,
    pub score: Vec<ScoreSample>,
}

/// Which side asked for a consumer pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseOrigin {
    Local,
    Remote,
}

/// Remote media receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerRecord {
    pub id: String,
    pub peer_id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub consumer_type: ConsumerType,
    pub locally_paused: bool,
    pub remotely_paused: bool,
    pub spatial_layer: Option<i32>,
    pub temporal_layer: Option<i32>,
    pub preferred_spatial_layer: Option<i32>,
    pub preferred_temporal_layer: Option<i32>,
    pub score: Option<ConsumerScore>,
}

impl ConsumerRecord {
    /// Audible/visible only when neither side paused it.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.locally_paused && !self.remotely_paused
    }

    /// Set the pause flag of one origin. Returns whether it changed.
    pub fn set_paused(&mut self, origin: PauseOrigin, paused: bool) -> bool {
        let flag = match origin {
            PauseOrigin::Local => &mut self.locally_paused,
            PauseOrigin::Remote => &mut self.remotely_paused,
        };
        let changed = *flag != paused;
        *flag = paused;
        changed
    }
}

/// Local data channel sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataProducerRecord {
    pub id: String,
    pub label: String,
    pub protocol: String,
}

/// Remote data channel receiver. `peer_id` is `None` for the server's bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataConsumerRecord {
    pub id: String,
    pub peer_id: Option<String>,
    pub data_producer_id: String,
    pub label: String,
    pub protocol: String,
}

/// A remote peer in the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerRecord {
    pub id: String,
    pub display_name: String,
    pub device: Option<DeviceInfo>,
    pub consumers: BTreeSet<String>,
    pub data_consumers: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumer() -> ConsumerRecord {
        ConsumerRecord {
            id: "c1".to_string(),
            peer_id: "alice".to_string(),
            producer_id: "p1".to_string(),
            kind: MediaKind::Video,
            consumer_type: ConsumerType::Simple,
            locally_paused: false,
            remotely_paused: false,
            spatial_layer: None,
            temporal_layer: None,
            preferred_spatial_layer: None,
            preferred_temporal_layer: None,
            score: None,
        }
    }

    #[test]
    fn test_active_iff_both_flags_clear_for_all_sequences() {
        let ops = [
            (PauseOrigin::Local, true),
            (PauseOrigin::Local, false),
            (PauseOrigin::Remote, true),
            (PauseOrigin::Remote, false),
        ];
        // Every sequence of four operations drawn from the set above.
        for a in ops {
            for b in ops {
                for c in ops {
                    for d in ops {
                        let mut record = consumer();
                        let mut local = false;
                        let mut remote = false;
                        for (origin, paused) in [a, b, c, d] {
                            record.set_paused(origin, paused);
                            match origin {
                                PauseOrigin::Local => local = paused,
                                PauseOrigin::Remote => remote = paused,
                            }
                            assert_eq!(record.is_active(), !local && !remote);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_set_paused_reports_change() {
        let mut record = consumer();
        assert!(record.set_paused(PauseOrigin::Remote, true));
        assert!(!record.set_paused(PauseOrigin::Remote, true));
        assert!(!record.locally_paused);
    }

    #[test]
    fn test_me_clear_flags_keeps_identity() {
        let mut me = Me {
            id: "me".to_string(),
            display_name: "Ada".to_string(),
            can_send_mic: true,
            audio_only: true,
            restart_ice_in_progress: true,
            ..Me::default()
        };
        me.clear_flags();
        assert_eq!(me.id, "me");
        assert_eq!(me.display_name, "Ada");
        assert!(!me.can_send_mic);
        assert!(!me.audio_only);
        assert!(!me.restart_ice_in_progress);
    }

    #[test]
    fn test_source_kind() {
        assert_eq!(ProducerSource::Mic.kind(), MediaKind::Audio);
        assert_eq!(ProducerSource::Cam.kind(), MediaKind::Video);
        assert_eq!(ProducerSource::Share.kind(), MediaKind::Video);
    }
}
