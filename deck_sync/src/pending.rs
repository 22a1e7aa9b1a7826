use crate::patch::Patch;
use crate::protocol::{CommandId, CommandKind, TrackId};
use crate::store::{DashboardState, Family};
use std::time::Instant;

/// The entity a command acts on. Together with the kind it forms the key
/// under which at most one command may be in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Track(TrackId),
    Queue,
    Process(u32),
    SelfMute,
    SelfDeafen,
    Playback,
}

/// What the server state must look like for a command to count as applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    Queued(TrackId),
    NotQueued(TrackId),
    QueueOrder(Vec<TrackId>),
    ProcessGone(u32),
    SelfMuted(bool),
    SelfDeafened(bool),
    Playing(bool),
    TrackChangedFrom(Option<TrackId>),
}

impl Expectation {
    pub fn family(&self) -> Family {
        match self {
            Expectation::Queued(_) | Expectation::NotQueued(_) | Expectation::QueueOrder(_) => {
                Family::Queue
            }
            Expectation::ProcessGone(_) => Family::Processes,
            Expectation::SelfMuted(_) | Expectation::SelfDeafened(_) => Family::Presence,
            Expectation::Playing(_) | Expectation::TrackChangedFrom(_) => Family::Music,
        }
    }

    pub fn is_met(&self, state: &DashboardState) -> bool {
        match self {
            Expectation::Queued(id) => state.queue_contains(id),
            Expectation::NotQueued(id) => !state.queue_contains(id),
            Expectation::QueueOrder(order) => state.queue_ids() == *order,
            Expectation::ProcessGone(pid) => !state.processes.contains(*pid),
            Expectation::SelfMuted(v) => state.presence.self_muted == *v,
            Expectation::SelfDeafened(v) => state.presence.self_deafened == *v,
            Expectation::Playing(v) => state.music.playback.is_playing == *v,
            Expectation::TrackChangedFrom(previous) => state.music.now_playing != *previous,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub command_id: CommandId,
    pub kind: CommandKind,
    pub target: Target,
    pub issued_at: Instant,
    pub deadline: Instant,
    pub optimistic_patch: Option<Patch>,
    pub expectation: Expectation,
    /// Mismatching server updates seen so far.
    pub deferrals: u32,
}

impl PendingCommand {
    pub fn family(&self) -> Family {
        self.expectation.family()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// In-flight commands in issue order. Replaying their patches in this order
/// on top of the server baseline yields the displayed state.
#[derive(Debug, Default)]
pub struct PendingTable {
    commands: Vec<PendingCommand>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn contains(&self, kind: CommandKind, target: &Target) -> bool {
        self.commands
            .iter()
            .any(|c| c.kind == kind && c.target == *target)
    }

    pub fn get(&self, command_id: &str) -> Option<&PendingCommand> {
        self.commands.iter().find(|c| c.command_id == command_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingCommand> {
        self.commands.iter()
    }

    pub fn insert(&mut self, cmd: PendingCommand) {
        self.commands.push(cmd);
    }

    pub fn remove(&mut self, command_id: &str) -> Option<PendingCommand> {
        let idx = self
            .commands
            .iter()
            .position(|c| c.command_id == command_id)?;
        Some(self.commands.remove(idx))
    }

    pub fn retain_mut(&mut self, f: impl FnMut(&mut PendingCommand) -> bool) {
        self.commands.retain_mut(f);
    }

    pub fn take_expired(&mut self, now: Instant) -> Vec<PendingCommand> {
        let (expired, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.commands)
            .into_iter()
            .partition(|c| c.is_expired(now));
        self.commands = live;
        expired
    }

    pub fn drain(&mut self) -> Vec<PendingCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.commands.iter().map(|c| c.deadline).min()
    }
}
