use crate::config::TransportKind;
use crate::dispatcher::Intent;
use crate::error::SyncError;
use crossbeam_channel::Sender;

pub const INBOUND_CAP: usize = 256;
pub const OUTBOUND_CAP: usize = 64;
pub const OUTCOME_CAP: usize = 64;

/// Everything the engine reacts to arrives here, in order, on one channel.
pub enum InboundMsg {
    LinkUp {
        kind: TransportKind,
        peer: String,
    },
    LinkDown,
    Bytes(Vec<u8>),
    Intent {
        intent: Intent,
        reply: Sender<Result<CommandId, SyncError>>,
    },
    Cancel {
        command_id: CommandId,
        reply: Sender<Result<(), SyncError>>,
    },
}

pub enum OutboundMsg {
    Send { frame: Vec<u8> },
}

pub use deck_protocol::{
    CommandId, CommandKind, DeviceCommand, Participant, Playback, PresenceStatus, ProcessInfo,
    ServerMessage, SystemStats, Track, TrackId, UserId,
};
