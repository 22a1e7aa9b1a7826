//! The single owner of the dashboard state.
//!
//! Transport bytes, link changes, user intents and cancellations all arrive
//! on one channel and are handled one at a time; timeouts are checked between
//! messages. Nothing else holds a mutable reference to the store, so no patch
//! is ever interleaved with another.

use crate::codec::{self, encode_frame, FrameDecoder};
use crate::config::{Framing, SyncConfig, TransportKind};
use crate::dispatcher::{Dispatcher, Intent};
use crate::error::SyncError;
use crate::patch::Patch;
use crate::protocol::{CommandId, InboundMsg, OutboundMsg, ServerMessage};
use crate::reconcile::{CommandOutcome, Reconciled, Reconciler, Resolution};
use crate::store::{Limits, Snapshot, StateStore};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Receives every new snapshot. Rendering is someone else's problem.
pub trait Presenter {
    fn present(&self, snapshot: &Arc<Snapshot>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub frames_received: u64,
    pub malformed_frames: u64,
    pub updates_applied: u64,
    pub commands_sent: u64,
    pub commands_confirmed: u64,
    pub commands_rejected: u64,
    pub commands_timed_out: u64,
    pub commands_cancelled: u64,
    pub link_drops: u64,
    pub rebuilds: u64,
}

pub struct Engine {
    inbound_rx: Receiver<InboundMsg>,
    outbound_tx: Sender<OutboundMsg>,
    outcome_tx: Sender<CommandOutcome>,

    framing: Framing,
    decoder: FrameDecoder,
    store: StateStore,
    reconciler: Reconciler,
    dispatcher: Dispatcher,

    link: LinkStatus,
    stats: EngineStats,
    last_presented: u64,
}

impl Engine {
    pub fn new(
        config: &SyncConfig,
        inbound_rx: Receiver<InboundMsg>,
        outbound_tx: Sender<OutboundMsg>,
        outcome_tx: Sender<CommandOutcome>,
    ) -> Self {
        let limits = Limits::from_config(config);
        Self {
            inbound_rx,
            outbound_tx,
            outcome_tx,
            framing: config.framing,
            decoder: FrameDecoder::new(config.framing, config.max_frame_bytes),
            store: StateStore::new(limits),
            reconciler: Reconciler::new(limits, config.reconciliation_retry_cycles),
            dispatcher: Dispatcher::new(config.command_timeout(), config.max_queue_size),
            link: LinkStatus::Disconnected,
            stats: EngineStats::default(),
            last_presented: 0,
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.snapshot()
    }

    pub fn link_status(&self) -> LinkStatus {
        self.link
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn pending_count(&self) -> usize {
        self.reconciler.pending().len()
    }

    pub fn tick(&mut self, presenter: &dyn Presenter) {
        self.tick_at(Instant::now(), presenter);
    }

    /// Handles everything queued on the intake, then expires overdue
    /// commands. The presenter sees each new revision as it is produced.
    pub fn tick_at(&mut self, now: Instant, presenter: &dyn Presenter) {
        loop {
            match self.inbound_rx.try_recv() {
                Ok(msg) => {
                    self.handle(msg, now);
                    self.present(presenter);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        self.expire(now);
        self.present(presenter);
    }

    /// Blocks on the intake until `shutdown` is set or every sender is gone.
    pub fn run(&mut self, presenter: &dyn Presenter, shutdown: &AtomicBool) {
        self.present(presenter);
        while !shutdown.load(Ordering::Relaxed) {
            let now = Instant::now();
            let wait = self
                .reconciler
                .pending()
                .next_deadline()
                .map(|d| d.saturating_duration_since(now).min(IDLE_WAIT))
                .unwrap_or(IDLE_WAIT);
            match self.inbound_rx.recv_timeout(wait) {
                Ok(msg) => {
                    self.handle(msg, Instant::now());
                    self.present(presenter);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.tick_at(Instant::now(), presenter);
        }
    }

    /// Validates the intent, shows it optimistically and puts it on the wire.
    pub fn dispatch(&mut self, intent: Intent, now: Instant) -> Result<CommandId, SyncError> {
        if self.link == LinkStatus::Disconnected {
            return Err(SyncError::LinkLost);
        }
        let prepared = self.dispatcher.prepare(
            intent,
            self.store.state(),
            self.reconciler.pending(),
            now,
        )?;
        let frame = encode_frame(self.framing, &prepared.wire)?;
        let command_id = prepared.pending.command_id.clone();
        let kind = prepared.pending.kind;

        let step = self.reconciler.track(&mut self.store, prepared.pending);
        if !self.settle(step) {
            return Err(SyncError::InvariantViolation(format!(
                "optimistic patch for {command_id} broke the store"
            )));
        }

        if self.outbound_tx.try_send(OutboundMsg::Send { frame }).is_err() {
            warn!(command_id = %command_id, %kind, "outbound queue unavailable; withdrawing command");
            let step = self.reconciler.withdraw(&mut self.store, &command_id);
            self.settle(step);
            return Err(SyncError::LinkLost);
        }
        self.stats.commands_sent += 1;
        debug!(command_id = %command_id, %kind, "command dispatched");
        Ok(command_id)
    }

    pub fn cancel(&mut self, command_id: &str) -> Result<(), SyncError> {
        let step = self.reconciler.cancel(&mut self.store, command_id)?;
        self.settle(step);
        Ok(())
    }

    /// Drops all state and fails every pending command with
    /// `InvariantViolation`, exactly as when the store refuses a patch. For
    /// collaborators that find the displayed state corrupt.
    pub fn rebuild(&mut self, reason: &str) {
        self.recover(SyncError::InvariantViolation(reason.to_string()));
    }

    fn handle(&mut self, msg: InboundMsg, now: Instant) {
        match msg {
            InboundMsg::LinkUp { kind, peer } => self.link_up(kind, &peer),
            InboundMsg::LinkDown => self.link_down(),
            InboundMsg::Bytes(bytes) => self.ingest(&bytes, now),
            InboundMsg::Intent { intent, reply } => {
                let result = self.dispatch(intent, now);
                let _ = reply.try_send(result);
            }
            InboundMsg::Cancel { command_id, reply } => {
                let result = self.cancel(&command_id);
                let _ = reply.try_send(result);
            }
        }
    }

    fn link_up(&mut self, kind: TransportKind, peer: &str) {
        info!(?kind, peer, "link up");
        self.decoder.reset();
        self.link = LinkStatus::Connected;
    }

    fn link_down(&mut self) {
        if self.link == LinkStatus::Disconnected {
            return;
        }
        info!(pending = self.reconciler.pending().len(), "link down");
        self.stats.link_drops += 1;
        self.decoder.reset();
        let step = self.reconciler.fail_all(&mut self.store, SyncError::LinkLost);
        self.settle(step);
        self.link = LinkStatus::Disconnected;
    }

    fn ingest(&mut self, bytes: &[u8], now: Instant) {
        if self.link == LinkStatus::Disconnected {
            debug!(len = bytes.len(), "bytes while disconnected dropped");
            return;
        }
        for frame in self.decoder.push(bytes) {
            self.stats.frames_received += 1;
            let msg = frame.and_then(|f| codec::decode_server_message(&f));
            match msg {
                Ok(msg) => self.apply_server(msg, now),
                Err(e) => {
                    self.stats.malformed_frames += 1;
                    warn!(error = %e, "malformed frame dropped");
                }
            }
        }
    }

    fn apply_server(&mut self, msg: ServerMessage, now: Instant) {
        let step = match msg {
            ServerMessage::CommandAck {
                command_id,
                success,
                reason,
            } => self
                .reconciler
                .apply_ack(&mut self.store, &command_id, success, reason),
            update => {
                let Some(patch) = Patch::from_server(update) else {
                    return;
                };
                self.stats.updates_applied += 1;
                self.reconciler
                    .apply_server_update(&mut self.store, patch, now)
            }
        };
        self.settle(step);
    }

    fn expire(&mut self, now: Instant) {
        let step = self.reconciler.expire(&mut self.store, now);
        self.settle(step);
    }

    /// Reports outcomes and rebuilds on a store fault. Returns false if the
    /// engine had to rebuild.
    fn settle(&mut self, step: Reconciled) -> bool {
        self.report(step.outcomes);
        match step.fault {
            None => true,
            Some(fault) => {
                self.recover(fault);
                false
            }
        }
    }

    fn recover(&mut self, fault: SyncError) {
        error!(error = %fault, "state invariant violated; rebuilding empty snapshot");
        let reason = match fault {
            SyncError::InvariantViolation(msg) => SyncError::InvariantViolation(msg),
            other => SyncError::InvariantViolation(other.to_string()),
        };
        let outcomes = self.reconciler.reset(reason);
        self.decoder.reset();
        let revision = self.store.rebuild();
        self.stats.rebuilds += 1;
        info!(revision, "engine rebuilt");
        self.report(outcomes);
    }

    fn report(&mut self, outcomes: Vec<CommandOutcome>) {
        for outcome in outcomes {
            match &outcome.resolution {
                Resolution::Confirmed => self.stats.commands_confirmed += 1,
                Resolution::Cancelled => self.stats.commands_cancelled += 1,
                Resolution::Rejected(SyncError::CommandTimeout) => {
                    self.stats.commands_timed_out += 1
                }
                Resolution::Rejected(_) => self.stats.commands_rejected += 1,
            }
            if let Err(e) = self.outcome_tx.try_send(outcome) {
                let outcome = e.into_inner();
                warn!(
                    command_id = %outcome.command_id,
                    kind = %outcome.kind,
                    resolution = ?outcome.resolution,
                    "outcome channel unavailable; outcome dropped"
                );
            }
        }
    }

    fn present(&mut self, presenter: &dyn Presenter) {
        let revision = self.store.revision();
        if revision == self.last_presented {
            return;
        }
        self.last_presented = revision;
        presenter.present(&self.store.snapshot());
    }
}

/// Lets other threads feed intents into a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: Sender<InboundMsg>,
}

impl EngineHandle {
    pub fn new(tx: Sender<InboundMsg>) -> Self {
        Self { tx }
    }

    /// Blocks until the engine has validated and sent the command.
    pub fn submit(&self, intent: Intent) -> Result<CommandId, SyncError> {
        let (reply, rx) = bounded(1);
        self.tx
            .send(InboundMsg::Intent { intent, reply })
            .map_err(|_| stopped())?;
        rx.recv().map_err(|_| stopped())?
    }

    pub fn cancel(&self, command_id: &str) -> Result<(), SyncError> {
        let (reply, rx) = bounded(1);
        self.tx
            .send(InboundMsg::Cancel {
                command_id: command_id.to_string(),
                reply,
            })
            .map_err(|_| stopped())?;
        rx.recv().map_err(|_| stopped())?
    }
}

fn stopped() -> SyncError {
    SyncError::invalid("engine is not running")
}
