use crate::error::SyncError;
use crate::patch::Patch;
use crate::pending::{Expectation, PendingCommand, PendingTable, Target};
use crate::protocol::{CommandKind, DeviceCommand, TrackId};
use crate::store::DashboardState;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::collections::HashSet;
use std::time::{Duration, Instant};

const ID_PREFIX_LEN: usize = 6;

/// A user action as the presenter reports it, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    QueueInsert { track_id: TrackId, at_position: usize },
    QueueRemove { track_id: TrackId },
    QueueReorder { ordered_track_ids: Vec<TrackId> },
    ProcessKill { pid: u32 },
    MuteToggle,
    DeafenToggle,
    PlayPause,
    SkipNext,
    SkipPrevious,
}

impl Intent {
    pub fn kind(&self) -> CommandKind {
        match self {
            Intent::QueueInsert { .. } => CommandKind::QueueInsert,
            Intent::QueueRemove { .. } => CommandKind::QueueRemove,
            Intent::QueueReorder { .. } => CommandKind::QueueReorder,
            Intent::ProcessKill { .. } => CommandKind::ProcessKill,
            Intent::MuteToggle => CommandKind::MuteToggle,
            Intent::DeafenToggle => CommandKind::DeafenToggle,
            Intent::PlayPause => CommandKind::PlayPause,
            Intent::SkipNext => CommandKind::SkipNext,
            Intent::SkipPrevious => CommandKind::SkipPrevious,
        }
    }

    pub fn target(&self) -> Target {
        match self {
            Intent::QueueInsert { track_id, .. } | Intent::QueueRemove { track_id } => {
                Target::Track(track_id.clone())
            }
            Intent::QueueReorder { .. } => Target::Queue,
            Intent::ProcessKill { pid } => Target::Process(*pid),
            Intent::MuteToggle => Target::SelfMute,
            Intent::DeafenToggle => Target::SelfDeafen,
            Intent::PlayPause | Intent::SkipNext | Intent::SkipPrevious => Target::Playback,
        }
    }
}

/// A validated command: what to track locally and what to put on the wire.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub pending: PendingCommand,
    pub wire: DeviceCommand,
}

/// Turns intents into tracked commands. Holds no state beyond id generation;
/// validation runs against the displayed state passed in.
pub struct Dispatcher {
    command_timeout: Duration,
    max_queue_size: usize,
    id_prefix: String,
    seq: u64,
}

impl Dispatcher {
    pub fn new(command_timeout: Duration, max_queue_size: usize) -> Self {
        let id_prefix: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ID_PREFIX_LEN)
            .map(char::from)
            .collect();
        Self {
            command_timeout,
            max_queue_size,
            id_prefix,
            seq: 0,
        }
    }

    pub fn prepare(
        &mut self,
        intent: Intent,
        state: &DashboardState,
        pending: &PendingTable,
        now: Instant,
    ) -> Result<Prepared, SyncError> {
        let kind = intent.kind();
        let target = intent.target();
        if pending.contains(kind, &target) {
            return Err(SyncError::invalid(format!(
                "a {kind} command for {target:?} is already pending"
            )));
        }

        let (optimistic_patch, expectation) = self.plan(&intent, state)?;
        let command_id = self.next_id();
        let wire = wire_command(command_id.clone(), intent);

        Ok(Prepared {
            pending: PendingCommand {
                command_id,
                kind,
                target,
                issued_at: now,
                deadline: now + self.command_timeout,
                optimistic_patch,
                expectation,
                deferrals: 0,
            },
            wire,
        })
    }

    fn plan(
        &self,
        intent: &Intent,
        state: &DashboardState,
    ) -> Result<(Option<Patch>, Expectation), SyncError> {
        match intent {
            Intent::QueueInsert {
                track_id,
                at_position,
            } => {
                if track_id.is_empty() {
                    return Err(SyncError::invalid("empty track id"));
                }
                if state.queue_contains(track_id) {
                    return Err(SyncError::invalid(format!("track {track_id} already queued")));
                }
                let len = state.queue.len();
                if len >= self.max_queue_size {
                    return Err(SyncError::invalid(format!(
                        "queue full ({len}/{})",
                        self.max_queue_size
                    )));
                }
                if *at_position > len {
                    return Err(SyncError::invalid(format!(
                        "position {at_position} past end of queue ({len})"
                    )));
                }
                Ok((
                    Some(Patch::InsertQueue {
                        track_id: track_id.clone(),
                        at: *at_position,
                    }),
                    Expectation::Queued(track_id.clone()),
                ))
            }
            Intent::QueueRemove { track_id } => {
                if !state.queue_contains(track_id) {
                    return Err(SyncError::invalid(format!("track {track_id} not queued")));
                }
                Ok((
                    Some(Patch::RemoveQueue(track_id.clone())),
                    Expectation::NotQueued(track_id.clone()),
                ))
            }
            Intent::QueueReorder { ordered_track_ids } => {
                validate_reorder(&state.queue_ids(), ordered_track_ids)?;
                Ok((
                    Some(Patch::ReorderQueue(ordered_track_ids.clone())),
                    Expectation::QueueOrder(ordered_track_ids.clone()),
                ))
            }
            Intent::ProcessKill { pid } => {
                if !state.processes.contains(*pid) {
                    return Err(SyncError::invalid(format!("pid {pid} not in process list")));
                }
                Ok((
                    Some(Patch::RemoveProcess(*pid)),
                    Expectation::ProcessGone(*pid),
                ))
            }
            Intent::MuteToggle => {
                require_call(state)?;
                let next = !state.presence.self_muted;
                Ok((Some(Patch::SetSelfMuted(next)), Expectation::SelfMuted(next)))
            }
            Intent::DeafenToggle => {
                require_call(state)?;
                let next = !state.presence.self_deafened;
                Ok((
                    Some(Patch::SetSelfDeafened(next)),
                    Expectation::SelfDeafened(next),
                ))
            }
            Intent::PlayPause => {
                require_now_playing(state)?;
                let next = !state.music.playback.is_playing;
                Ok((Some(Patch::SetPlaying(next)), Expectation::Playing(next)))
            }
            Intent::SkipNext | Intent::SkipPrevious => {
                require_now_playing(state)?;
                // Nothing sensible to show until the server picks the next track.
                Ok((
                    None,
                    Expectation::TrackChangedFrom(state.music.now_playing.clone()),
                ))
            }
        }
    }

    fn next_id(&mut self) -> String {
        self.seq += 1;
        format!("{}-{}", self.id_prefix, self.seq)
    }
}

fn validate_reorder(current: &[TrackId], ordered: &[TrackId]) -> Result<(), SyncError> {
    let mut seen = HashSet::new();
    for id in ordered {
        if !seen.insert(id.as_str()) {
            return Err(SyncError::invalid(format!("track {id} listed twice")));
        }
    }
    if ordered.len() != current.len() || current.iter().any(|id| !seen.contains(id.as_str())) {
        return Err(SyncError::invalid(
            "reorder must list exactly the queued tracks",
        ));
    }
    if ordered == current {
        return Err(SyncError::invalid("queue already in that order"));
    }
    Ok(())
}

fn require_call(state: &DashboardState) -> Result<(), SyncError> {
    if state.presence.in_call {
        Ok(())
    } else {
        Err(SyncError::invalid("not in a voice call"))
    }
}

fn require_now_playing(state: &DashboardState) -> Result<(), SyncError> {
    if state.music.now_playing.is_some() {
        Ok(())
    } else {
        Err(SyncError::invalid("nothing is playing"))
    }
}

fn wire_command(command_id: String, intent: Intent) -> DeviceCommand {
    match intent {
        Intent::QueueInsert {
            track_id,
            at_position,
        } => DeviceCommand::QueueInsert {
            command_id,
            track_id,
            at_position: u32::try_from(at_position).unwrap_or(u32::MAX),
        },
        Intent::QueueRemove { track_id } => DeviceCommand::QueueRemove {
            command_id,
            track_id,
        },
        Intent::QueueReorder { ordered_track_ids } => DeviceCommand::QueueReorder {
            command_id,
            ordered_track_ids,
        },
        Intent::ProcessKill { pid } => DeviceCommand::ProcessKill { command_id, pid },
        Intent::MuteToggle => DeviceCommand::MuteToggle { command_id },
        Intent::DeafenToggle => DeviceCommand::DeafenToggle { command_id },
        Intent::PlayPause => DeviceCommand::PlayPause { command_id },
        Intent::SkipNext => DeviceCommand::SkipNext { command_id },
        Intent::SkipPrevious => DeviceCommand::SkipPrevious { command_id },
    }
}
