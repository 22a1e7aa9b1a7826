use serde::{Deserialize, Serialize};
use std::fmt;

pub type TrackId = String;
pub type UserId = String;
pub type CommandId = String;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: String,
    /// Key into the external image cache, never inline image bytes.
    #[serde(default)]
    pub artwork_ref: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Playback {
    #[serde(default)]
    pub position_secs: u32,
    #[serde(default)]
    pub duration_secs: u32,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    #[serde(default)]
    pub mem_bytes: u64,
    #[serde(default)]
    pub cpu_percent: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub cpu_percent_total: f32,
    pub mem_percent: f32,
    #[serde(default)]
    pub gpu_percent: Option<f32>,
    #[serde(default)]
    pub battery_percent: Option<f32>,
    #[serde(default)]
    pub power_plugged: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Idle,
    Dnd,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub avatar_ref: Option<String>,
    #[serde(default)]
    pub speaking: bool,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub deafened: bool,
    pub status: PresenceStatus,
}

/// Server -> device. The `type` field discriminates the union.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "type")]
pub enum ServerMessage {
    MusicUpdate {
        #[serde(default)]
        now_playing: Option<Track>,
        #[serde(default)]
        playback: Playback,
    },
    QueueUpdate {
        tracks: Vec<Track>,
    },
    ProcessListUpdate {
        processes: Vec<ProcessInfo>,
        #[serde(default)]
        stats: Option<SystemStats>,
    },
    PresenceUpdate {
        #[serde(default)]
        in_call: bool,
        #[serde(default)]
        channel_name: Option<String>,
        #[serde(default)]
        self_muted: bool,
        #[serde(default)]
        self_deafened: bool,
        participants: Vec<Participant>,
    },
    CommandAck {
        command_id: CommandId,
        success: bool,
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Device -> server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "type")]
pub enum DeviceCommand {
    QueueInsert {
        command_id: CommandId,
        track_id: TrackId,
        at_position: u32,
    },
    QueueRemove {
        command_id: CommandId,
        track_id: TrackId,
    },
    QueueReorder {
        command_id: CommandId,
        ordered_track_ids: Vec<TrackId>,
    },
    ProcessKill {
        command_id: CommandId,
        pid: u32,
    },
    MuteToggle {
        command_id: CommandId,
    },
    DeafenToggle {
        command_id: CommandId,
    },
    PlayPause {
        command_id: CommandId,
    },
    SkipNext {
        command_id: CommandId,
    },
    SkipPrevious {
        command_id: CommandId,
    },
}

impl DeviceCommand {
    pub fn command_id(&self) -> &str {
        match self {
            DeviceCommand::QueueInsert { command_id, .. } => command_id,
            DeviceCommand::QueueRemove { command_id, .. } => command_id,
            DeviceCommand::QueueReorder { command_id, .. } => command_id,
            DeviceCommand::ProcessKill { command_id, .. } => command_id,
            DeviceCommand::MuteToggle { command_id } => command_id,
            DeviceCommand::DeafenToggle { command_id } => command_id,
            DeviceCommand::PlayPause { command_id } => command_id,
            DeviceCommand::SkipNext { command_id } => command_id,
            DeviceCommand::SkipPrevious { command_id } => command_id,
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            DeviceCommand::QueueInsert { .. } => CommandKind::QueueInsert,
            DeviceCommand::QueueRemove { .. } => CommandKind::QueueRemove,
            DeviceCommand::QueueReorder { .. } => CommandKind::QueueReorder,
            DeviceCommand::ProcessKill { .. } => CommandKind::ProcessKill,
            DeviceCommand::MuteToggle { .. } => CommandKind::MuteToggle,
            DeviceCommand::DeafenToggle { .. } => CommandKind::DeafenToggle,
            DeviceCommand::PlayPause { .. } => CommandKind::PlayPause,
            DeviceCommand::SkipNext { .. } => CommandKind::SkipNext,
            DeviceCommand::SkipPrevious { .. } => CommandKind::SkipPrevious,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum CommandKind {
    QueueInsert,
    QueueRemove,
    QueueReorder,
    ProcessKill,
    MuteToggle,
    DeafenToggle,
    PlayPause,
    SkipNext,
    SkipPrevious,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::QueueInsert => "queueInsert",
            CommandKind::QueueRemove => "queueRemove",
            CommandKind::QueueReorder => "queueReorder",
            CommandKind::ProcessKill => "processKill",
            CommandKind::MuteToggle => "muteToggle",
            CommandKind::DeafenToggle => "deafenToggle",
            CommandKind::PlayPause => "playPause",
            CommandKind::SkipNext => "skipNext",
            CommandKind::SkipPrevious => "skipPrevious",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
