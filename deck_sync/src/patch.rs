use crate::protocol::{Playback, ProcessInfo, ServerMessage, SystemStats, Track, TrackId};
use crate::store::{DashboardState, Family, Limits, MusicState, PresenceState, QueueEntry};
use std::collections::HashSet;

/// A pure transformation of the dashboard state. Server-sourced patches
/// replace a family (track metadata is kept from the first time an id is
/// seen, until nothing references it); optimistic patches carry
/// a single local intent; `Restore` swaps in a fully rebuilt state.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    SetMusic {
        now_playing: Option<Track>,
        playback: Playback,
    },
    SetQueue(Vec<Track>),
    SetProcesses {
        processes: Vec<ProcessInfo>,
        stats: Option<SystemStats>,
    },
    SetPresence(PresenceState),

    InsertQueue {
        track_id: TrackId,
        at: usize,
    },
    RemoveQueue(TrackId),
    ReorderQueue(Vec<TrackId>),
    RemoveProcess(u32),
    SetSelfMuted(bool),
    SetSelfDeafened(bool),
    SetPlaying(bool),

    Restore(Box<DashboardState>),
}

impl Patch {
    /// `None` for messages that carry no state (acks).
    pub fn from_server(msg: ServerMessage) -> Option<Patch> {
        match msg {
            ServerMessage::MusicUpdate {
                now_playing,
                playback,
            } => Some(Patch::SetMusic {
                now_playing,
                playback,
            }),
            ServerMessage::QueueUpdate { tracks } => Some(Patch::SetQueue(tracks)),
            ServerMessage::ProcessListUpdate { processes, stats } => {
                Some(Patch::SetProcesses { processes, stats })
            }
            ServerMessage::PresenceUpdate {
                in_call,
                channel_name,
                self_muted,
                self_deafened,
                participants,
            } => Some(Patch::SetPresence(PresenceState {
                in_call,
                channel_name,
                self_muted,
                self_deafened,
                participants,
            })),
            ServerMessage::CommandAck { .. } => None,
        }
    }

    pub fn family(&self) -> Option<Family> {
        match self {
            Patch::SetMusic { .. } | Patch::SetPlaying(_) => Some(Family::Music),
            Patch::SetQueue(_)
            | Patch::InsertQueue { .. }
            | Patch::RemoveQueue(_)
            | Patch::ReorderQueue(_) => Some(Family::Queue),
            Patch::SetProcesses { .. } | Patch::RemoveProcess(_) => Some(Family::Processes),
            Patch::SetPresence(_) | Patch::SetSelfMuted(_) | Patch::SetSelfDeafened(_) => {
                Some(Family::Presence)
            }
            Patch::Restore(_) => None,
        }
    }

    pub fn apply(&self, state: &DashboardState, limits: &Limits) -> DashboardState {
        if let Patch::Restore(next) = self {
            return (**next).clone();
        }

        let mut next = state.clone();
        match self {
            Patch::SetMusic {
                now_playing,
                playback,
            } => {
                next.music.now_playing = now_playing.as_ref().map(|t| t.id.clone());
                if let Some(track) = now_playing {
                    next.music
                        .tracks
                        .entry(track.id.clone())
                        .or_insert_with(|| track.clone());
                }
                next.music.playback = playback.clone();
            }
            Patch::SetQueue(tracks) => {
                let mut seen = HashSet::new();
                let mut ids = Vec::new();
                for track in tracks {
                    if ids.len() == limits.max_queue_size {
                        break;
                    }
                    if !seen.insert(track.id.as_str()) {
                        continue;
                    }
                    next.music
                        .tracks
                        .entry(track.id.clone())
                        .or_insert_with(|| track.clone());
                    ids.push(track.id.clone());
                }
                next.queue = renumber(ids);
            }
            Patch::SetProcesses { processes, stats } => {
                let mut seen = HashSet::new();
                next.processes.processes = processes
                    .iter()
                    .filter(|p| seen.insert(p.pid))
                    .cloned()
                    .collect();
                next.processes.stats = stats.clone();
            }
            Patch::SetPresence(presence) => {
                let mut seen = HashSet::new();
                let participants = presence
                    .participants
                    .iter()
                    .filter(|u| seen.insert(u.user_id.as_str()))
                    .take(limits.max_participants)
                    .cloned()
                    .collect();
                next.presence = PresenceState {
                    participants,
                    ..presence.clone()
                };
            }
            Patch::InsertQueue { track_id, at } => {
                let mut ids = next.queue_ids();
                if !ids.contains(track_id) && ids.len() < limits.max_queue_size {
                    let at = (*at).min(ids.len());
                    ids.insert(at, track_id.clone());
                    next.queue = renumber(ids);
                }
            }
            Patch::RemoveQueue(track_id) => {
                let ids = next
                    .queue_ids()
                    .into_iter()
                    .filter(|id| id != track_id)
                    .collect();
                next.queue = renumber(ids);
            }
            Patch::ReorderQueue(order) => {
                next.queue = renumber(reorder(&next.queue_ids(), order));
            }
            Patch::RemoveProcess(pid) => {
                next.processes.processes.retain(|p| p.pid != *pid);
            }
            Patch::SetSelfMuted(v) => next.presence.self_muted = *v,
            Patch::SetSelfDeafened(v) => next.presence.self_deafened = *v,
            Patch::SetPlaying(v) => next.music.playback.is_playing = *v,
            Patch::Restore(_) => {}
        }
        prune_tracks(&mut next.music, &next.queue);
        next
    }
}

/// Ids named in `order` come first, in that order; anything else already
/// queued keeps its relative position after them.
fn reorder(current: &[TrackId], order: &[TrackId]) -> Vec<TrackId> {
    let present: HashSet<&str> = current.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut out: Vec<TrackId> = order
        .iter()
        .filter(|id| present.contains(id.as_str()) && seen.insert(id.as_str()))
        .cloned()
        .collect();
    for id in current {
        if !seen.contains(id.as_str()) {
            out.push(id.clone());
        }
    }
    out
}

fn renumber(ids: Vec<TrackId>) -> Vec<QueueEntry> {
    ids.into_iter()
        .enumerate()
        .map(|(i, track_id)| QueueEntry {
            track_id,
            position: i as u32,
        })
        .collect()
}

fn prune_tracks(music: &mut MusicState, queue: &[QueueEntry]) {
    let now_playing = music.now_playing.clone();
    music.tracks.retain(|id, _| {
        now_playing.as_deref() == Some(id.as_str()) || queue.iter().any(|e| &e.track_id == id)
    });
}
