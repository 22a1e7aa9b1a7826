use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::patch::Patch;
use crate::protocol::{Participant, Playback, ProcessInfo, SystemStats, Track, TrackId};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::ops::Deref;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_queue_size: usize,
    pub max_participants: usize,
}

impl Limits {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_queue_size: config.max_queue_size,
            max_participants: config.max_participants,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Music,
    Queue,
    Processes,
    Presence,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MusicState {
    pub now_playing: Option<TrackId>,
    pub playback: Playback,
    /// Metadata for every track referenced by `now_playing` or the queue.
    pub tracks: BTreeMap<TrackId, Track>,
}

impl MusicState {
    pub fn track(&self, id: &str) -> Option<&Track> {
        self.tracks.get(id)
    }

    pub fn now_playing_track(&self) -> Option<&Track> {
        self.now_playing.as_deref().and_then(|id| self.tracks.get(id))
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub track_id: TrackId,
    pub position: u32,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessTable {
    pub processes: Vec<ProcessInfo>,
    pub stats: Option<SystemStats>,
}

impl ProcessTable {
    pub fn contains(&self, pid: u32) -> bool {
        self.processes.iter().any(|p| p.pid == pid)
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceState {
    pub in_call: bool,
    pub channel_name: Option<String>,
    pub self_muted: bool,
    pub self_deafened: bool,
    pub participants: Vec<Participant>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardState {
    pub music: MusicState,
    pub queue: Vec<QueueEntry>,
    pub processes: ProcessTable,
    pub presence: PresenceState,
}

impl DashboardState {
    pub fn queue_ids(&self) -> Vec<TrackId> {
        self.queue.iter().map(|e| e.track_id.clone()).collect()
    }

    pub fn queue_contains(&self, track_id: &str) -> bool {
        self.queue.iter().any(|e| e.track_id == track_id)
    }
}

/// Immutable view handed to the presenter. Only read accessors are exposed.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    revision: u64,
    #[serde(flatten)]
    state: DashboardState,
}

impl Snapshot {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn state(&self) -> &DashboardState {
        &self.state
    }
}

impl Deref for Snapshot {
    type Target = DashboardState;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

/// Single source of truth for the displayed state. The only way to change it
/// is `commit`, which runs a patch and bumps the revision by exactly one.
pub struct StateStore {
    current: Arc<Snapshot>,
    limits: Limits,
}

impl StateStore {
    pub fn new(limits: Limits) -> Self {
        Self {
            current: Arc::new(Snapshot::default()),
            limits,
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current)
    }

    pub fn revision(&self) -> u64 {
        self.current.revision
    }

    pub fn state(&self) -> &DashboardState {
        &self.current.state
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Returns the new revision, or `None` when the patch changed nothing.
    pub fn commit(&mut self, patch: &Patch) -> Result<Option<u64>, SyncError> {
        let next = patch.apply(&self.current.state, &self.limits);
        if next == self.current.state {
            return Ok(None);
        }
        check_invariants(&next, &self.limits)?;
        let revision = self
            .current
            .revision
            .checked_add(1)
            .ok_or_else(|| SyncError::InvariantViolation("revision overflow".to_string()))?;
        self.current = Arc::new(Snapshot {
            revision,
            state: next,
        });
        Ok(Some(revision))
    }

    /// Replaces the state with an empty one. The revision keeps counting up.
    pub fn rebuild(&mut self) -> u64 {
        let revision = self.current.revision.saturating_add(1);
        self.current = Arc::new(Snapshot {
            revision,
            state: DashboardState::default(),
        });
        revision
    }
}

pub fn check_invariants(state: &DashboardState, limits: &Limits) -> Result<(), SyncError> {
    if state.queue.len() > limits.max_queue_size {
        return Err(violation(format!(
            "queue length {} exceeds {}",
            state.queue.len(),
            limits.max_queue_size
        )));
    }
    let mut seen_tracks = HashSet::new();
    for (i, entry) in state.queue.iter().enumerate() {
        if entry.position as usize != i {
            return Err(violation(format!(
                "queue position {} at index {i}",
                entry.position
            )));
        }
        if !seen_tracks.insert(entry.track_id.as_str()) {
            return Err(violation(format!("track {} queued twice", entry.track_id)));
        }
    }

    let mut seen_pids = HashSet::new();
    for p in &state.processes.processes {
        if !seen_pids.insert(p.pid) {
            return Err(violation(format!("pid {} listed twice", p.pid)));
        }
    }

    if state.presence.participants.len() > limits.max_participants {
        return Err(violation(format!(
            "{} participants exceed {}",
            state.presence.participants.len(),
            limits.max_participants
        )));
    }
    let mut seen_users = HashSet::new();
    for u in &state.presence.participants {
        if !seen_users.insert(u.user_id.as_str()) {
            return Err(violation(format!("user {} listed twice", u.user_id)));
        }
    }
    Ok(())
}

fn violation(msg: String) -> SyncError {
    SyncError::InvariantViolation(msg)
}
