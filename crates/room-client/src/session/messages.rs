//! Commands posted to the room actor.

use tokio::sync::oneshot;

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomCommand {
    /// Connect and join the room. Only valid from `New`.
    Join,

    EnableMic,
    DisableMic,
    MuteMic,
    UnmuteMic,

    EnableCam,
    DisableCam,
    ChangeCam,

    /// Stop sending and receiving video.
    EnableAudioOnly,
    DisableAudioOnly,

    /// Pause every audio consumer.
    MuteAudio,
    UnmuteAudio,

    RestartIce,

    ChangeDisplayName {
        display_name: String,
    },

    RequestConsumerKeyFrame {
        consumer_id: String,
    },

    EnableChatDataProducer,

    SendChatMessage {
        text: String,
    },

    /// Resolves once every command posted before it has been handled.
    Flush {
        respond_to: oneshot::Sender<()>,
    },
}

impl RoomCommand {
    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            RoomCommand::Join => "join",
            RoomCommand::EnableMic => "enable_mic",
            RoomCommand::DisableMic => "disable_mic",
            RoomCommand::MuteMic => "mute_mic",
            RoomCommand::UnmuteMic => "unmute_mic",
            RoomCommand::EnableCam => "enable_cam",
            RoomCommand::DisableCam => "disable_cam",
            RoomCommand::ChangeCam => "change_cam",
            RoomCommand::EnableAudioOnly => "enable_audio_only",
            RoomCommand::DisableAudioOnly => "disable_audio_only",
            RoomCommand::MuteAudio => "mute_audio",
            RoomCommand::UnmuteAudio => "unmute_audio",
            RoomCommand::RestartIce => "restart_ice",
            RoomCommand::ChangeDisplayName { .. } => "change_display_name",
            RoomCommand::RequestConsumerKeyFrame { .. } => "request_consumer_key_frame",
            RoomCommand::EnableChatDataProducer => "enable_chat_data_producer",
            RoomCommand::SendChatMessage { .. } => "send_chat_message",
            RoomCommand::Flush { .. } => "flush",
        }
    }
}
