//! Merges server-authoritative updates with locally issued, unconfirmed
//! commands.
//!
//! Two states are kept apart: the last server-confirmed `baseline`, and the
//! table of pending commands with their optimistic patches. The displayed
//! state is always `baseline` with the pending patches replayed in issue
//! order, so reverting a command means dropping it and replaying the rest.
//! Nothing is ever undone blindly.

use crate::error::SyncError;
use crate::patch::Patch;
use crate::pending::{PendingCommand, PendingTable};
use crate::protocol::{CommandId, CommandKind};
use crate::store::{DashboardState, Limits, StateStore};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Confirmed,
    Rejected(SyncError),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command_id: CommandId,
    pub kind: CommandKind,
    pub resolution: Resolution,
}

impl CommandOutcome {
    fn new(cmd: &PendingCommand, resolution: Resolution) -> Self {
        Self {
            command_id: cmd.command_id.clone(),
            kind: cmd.kind,
            resolution,
        }
    }

    pub fn error(&self) -> Option<&SyncError> {
        match &self.resolution {
            Resolution::Rejected(e) => Some(e),
            _ => None,
        }
    }
}

/// Result of one reconciliation step. `fault` is set when the store refused
/// the rebuilt state; the caller must rebuild the engine.
#[derive(Debug, Default)]
pub struct Reconciled {
    pub outcomes: Vec<CommandOutcome>,
    pub fault: Option<SyncError>,
}

pub struct Reconciler {
    baseline: DashboardState,
    pending: PendingTable,
    retry_cycles: u32,
    limits: Limits,
}

impl Reconciler {
    pub fn new(limits: Limits, retry_cycles: u32) -> Self {
        Self {
            baseline: DashboardState::default(),
            pending: PendingTable::new(),
            retry_cycles,
            limits,
        }
    }

    pub fn baseline(&self) -> &DashboardState {
        &self.baseline
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Registers a freshly dispatched command and shows its optimistic patch.
    pub fn track(&mut self, store: &mut StateStore, cmd: PendingCommand) -> Reconciled {
        self.pending.insert(cmd);
        self.publish(store, Vec::new())
    }

    /// The state the presenter should see right now.
    pub fn view(&self) -> DashboardState {
        self.pending
            .iter()
            .filter_map(|c| c.optimistic_patch.as_ref())
            .fold(self.baseline.clone(), |state, patch| {
                patch.apply(&state, &self.limits)
            })
    }

    pub fn apply_server_update(
        &mut self,
        store: &mut StateStore,
        patch: Patch,
        now: Instant,
    ) -> Reconciled {
        let Some(family) = patch.family() else {
            return Reconciled::default();
        };
        let next = patch.apply(&self.baseline, &self.limits);
        if next == self.baseline {
            // A repeat of what the server already said is not another
            // conflict; only the deadline bounds the wait.
            debug!(?family, "server update repeats the baseline");
            return Reconciled::default();
        }
        let retry_cycles = self.retry_cycles;
        let mut outcomes = Vec::new();

        self.pending.retain_mut(|cmd| {
            if cmd.family() != family {
                return true;
            }
            if cmd.expectation.is_met(&next) {
                debug!(command_id = %cmd.command_id, kind = %cmd.kind, "server state confirms command");
                outcomes.push(CommandOutcome::new(cmd, Resolution::Confirmed));
                return false;
            }
            if cmd.is_expired(now) {
                info!(command_id = %cmd.command_id, kind = %cmd.kind, "command timed out; server state wins");
                outcomes.push(CommandOutcome::new(
                    cmd,
                    Resolution::Rejected(SyncError::CommandTimeout),
                ));
                return false;
            }
            cmd.deferrals += 1;
            if cmd.deferrals >= retry_cycles {
                info!(
                    command_id = %cmd.command_id,
                    kind = %cmd.kind,
                    deferrals = cmd.deferrals,
                    "server state wins over pending command"
                );
                outcomes.push(CommandOutcome::new(
                    cmd,
                    Resolution::Rejected(SyncError::CommandRejected(format!(
                        "superseded by server state after {} update(s)",
                        cmd.deferrals
                    ))),
                ));
                return false;
            }
            debug!(
                command_id = %cmd.command_id,
                kind = %cmd.kind,
                deferrals = cmd.deferrals,
                "deferring conflicting server value"
            );
            true
        });

        self.baseline = next;
        self.publish(store, outcomes)
    }

    pub fn apply_ack(
        &mut self,
        store: &mut StateStore,
        command_id: &str,
        success: bool,
        reason: Option<String>,
    ) -> Reconciled {
        let Some(cmd) = self.pending.remove(command_id) else {
            debug!(command_id, "ack for unknown or already resolved command ignored");
            return Reconciled::default();
        };

        let resolution = if success {
            // The server applied it; fold the intent into the baseline so later
            // reverts of other commands replay on top of it.
            if let Some(patch) = &cmd.optimistic_patch {
                self.baseline = patch.apply(&self.baseline, &self.limits);
            }
            debug!(command_id, kind = %cmd.kind, "command acknowledged");
            Resolution::Confirmed
        } else {
            let reason = reason.unwrap_or_else(|| "rejected by server".to_string());
            info!(command_id, kind = %cmd.kind, %reason, "command rejected by server");
            Resolution::Rejected(SyncError::CommandRejected(reason))
        };
        self.publish(store, vec![CommandOutcome::new(&cmd, resolution)])
    }

    pub fn expire(&mut self, store: &mut StateStore, now: Instant) -> Reconciled {
        let expired = self.pending.take_expired(now);
        if expired.is_empty() {
            return Reconciled::default();
        }
        let outcomes = expired
            .iter()
            .map(|cmd| {
                info!(command_id = %cmd.command_id, kind = %cmd.kind, "command timed out");
                CommandOutcome::new(cmd, Resolution::Rejected(SyncError::CommandTimeout))
            })
            .collect();
        self.publish(store, outcomes)
    }

    pub fn fail_all(&mut self, store: &mut StateStore, error: SyncError) -> Reconciled {
        let failed = self.pending.drain();
        if failed.is_empty() {
            return Reconciled::default();
        }
        let outcomes = failed
            .iter()
            .map(|cmd| CommandOutcome::new(cmd, Resolution::Rejected(error.clone())))
            .collect();
        self.publish(store, outcomes)
    }

    /// Drops the command locally; a late ack or timeout for it is ignored.
    pub fn cancel(
        &mut self,
        store: &mut StateStore,
        command_id: &str,
    ) -> Result<Reconciled, SyncError> {
        let cmd = self.pending.remove(command_id).ok_or_else(|| {
            SyncError::invalid(format!("no pending command {command_id}"))
        })?;
        debug!(command_id, kind = %cmd.kind, "command cancelled");
        Ok(self.publish(store, vec![CommandOutcome::new(&cmd, Resolution::Cancelled)]))
    }

    /// Removes a command that never made it onto the wire. No outcome is
    /// reported; the caller already has the error.
    pub fn withdraw(&mut self, store: &mut StateStore, command_id: &str) -> Reconciled {
        if self.pending.remove(command_id).is_none() {
            return Reconciled::default();
        }
        self.publish(store, Vec::new())
    }

    /// Forgets everything. Pending commands fail with `reason`.
    pub fn reset(&mut self, reason: SyncError) -> Vec<CommandOutcome> {
        self.baseline = DashboardState::default();
        self.pending
            .drain()
            .iter()
            .map(|cmd| CommandOutcome::new(cmd, Resolution::Rejected(reason.clone())))
            .collect()
    }

    fn publish(&self, store: &mut StateStore, outcomes: Vec<CommandOutcome>) -> Reconciled {
        let fault = store
            .commit(&Patch::Restore(Box::new(self.view())))
            .err();
        Reconciled { outcomes, fault }
    }
}
