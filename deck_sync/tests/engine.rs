use crossbeam_channel::{bounded, Receiver, Sender};
use deck_sync::codec::{decode_message, encode_frame};
use deck_sync::protocol::{
    CommandId, CommandKind, DeviceCommand, Participant, Playback, PresenceStatus, ProcessInfo,
    ServerMessage, Track,
};
use deck_sync::{
    CommandOutcome, DashboardState, Engine, ErrorKind, Framing, InboundMsg, Intent, LinkStatus, OutboundMsg,
    Presenter, Resolution, Snapshot, SyncConfig, SyncError, TransportKind,
};
use std::cell::RefCell;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Recorder {
    seen: RefCell<Vec<Arc<Snapshot>>>,
}

impl Presenter for Recorder {
    fn present(&self, snapshot: &Arc<Snapshot>) {
        self.seen.borrow_mut().push(Arc::clone(snapshot));
    }
}

struct Rig {
    engine: Engine,
    in_tx: Sender<InboundMsg>,
    out_rx: Receiver<OutboundMsg>,
    outcome_rx: Receiver<CommandOutcome>,
    presenter: Recorder,
    t0: Instant,
}

impl Rig {
    fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    fn with_config(config: SyncConfig) -> Self {
        Self::with_capacities(config, 64, 64)
    }

    fn with_capacities(config: SyncConfig, outbound: usize, outcomes: usize) -> Self {
        let (in_tx, in_rx) = bounded(64);
        let (out_tx, out_rx) = bounded(outbound);
        let (outcome_tx, outcome_rx) = bounded(outcomes);
        let engine = Engine::new(&config, in_rx, out_tx, outcome_tx);
        let mut rig = Self {
            engine,
            in_tx,
            out_rx,
            outcome_rx,
            presenter: Recorder::default(),
            t0: Instant::now(),
        };
        rig.feed(InboundMsg::LinkUp {
            kind: TransportKind::Wifi,
            peer: "test".to_string(),
        });
        rig
    }

    fn at(&self, ms: u64) -> Instant {
        self.t0 + Duration::from_millis(ms)
    }

    fn feed_at(&mut self, msg: InboundMsg, now: Instant) {
        self.in_tx.send(msg).expect("intake open");
        self.engine.tick_at(now, &self.presenter);
    }

    fn feed(&mut self, msg: InboundMsg) {
        let now = self.t0;
        self.feed_at(msg, now);
    }

    fn push_at(&mut self, msg: &ServerMessage, now: Instant) {
        let frame = encode_frame(Framing::Newline, msg).expect("encode");
        self.feed_at(InboundMsg::Bytes(frame), now);
    }

    fn push(&mut self, msg: &ServerMessage) {
        let now = self.t0;
        self.push_at(msg, now);
    }

    fn intent(&mut self, intent: Intent) -> Result<CommandId, SyncError> {
        let (reply, rx) = bounded(1);
        self.feed(InboundMsg::Intent { intent, reply });
        rx.try_recv().expect("engine replied")
    }

    fn cancel(&mut self, command_id: &str) -> Result<(), SyncError> {
        let (reply, rx) = bounded(1);
        self.feed(InboundMsg::Cancel {
            command_id: command_id.to_string(),
            reply,
        });
        rx.try_recv().expect("engine replied")
    }

    fn ack(&mut self, command_id: &str, success: bool, reason: Option<&str>) {
        self.push(&ServerMessage::CommandAck {
            command_id: command_id.to_string(),
            success,
            reason: reason.map(str::to_string),
        });
    }

    fn sent(&self) -> Vec<DeviceCommand> {
        self.out_rx
            .try_iter()
            .map(|OutboundMsg::Send { frame }| decode_message(&frame).expect("device command"))
            .collect()
    }

    fn outcomes(&self) -> Vec<CommandOutcome> {
        self.outcome_rx.try_iter().collect()
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.engine.snapshot()
    }

    fn presented(&self) -> Vec<Arc<Snapshot>> {
        self.presenter.seen.borrow().clone()
    }
}

fn track(id: &str) -> Track {
    Track {
        id: id.to_string(),
        title: id.to_uppercase(),
        artist: "artist".to_string(),
        album: String::new(),
        artwork_ref: None,
    }
}

fn queue_update(ids: &[&str]) -> ServerMessage {
    ServerMessage::QueueUpdate {
        tracks: ids.iter().map(|id| track(id)).collect(),
    }
}

fn process_update(pids: &[u32]) -> ServerMessage {
    ServerMessage::ProcessListUpdate {
        processes: pids
            .iter()
            .map(|pid| ProcessInfo {
                pid: *pid,
                name: format!("proc{pid}"),
                mem_bytes: 1024,
                cpu_percent: 1.0,
            })
            .collect(),
        stats: None,
    }
}

fn presence_update(self_muted: bool, users: &[&str]) -> ServerMessage {
    ServerMessage::PresenceUpdate {
        in_call: true,
        channel_name: Some("lobby".to_string()),
        self_muted,
        self_deafened: false,
        participants: users
            .iter()
            .map(|id| Participant {
                user_id: id.to_string(),
                display_name: id.to_string(),
                avatar_ref: None,
                speaking: false,
                muted: false,
                deafened: false,
                status: PresenceStatus::Online,
            })
            .collect(),
    }
}

fn music_update(now_playing: &str, is_playing: bool) -> ServerMessage {
    ServerMessage::MusicUpdate {
        now_playing: Some(track(now_playing)),
        playback: Playback {
            position_secs: 10,
            duration_secs: 200,
            is_playing,
            source: None,
        },
    }
}

fn pids(snapshot: &Snapshot) -> Vec<u32> {
    snapshot.processes.processes.iter().map(|p| p.pid).collect()
}

fn single(outcomes: Vec<CommandOutcome>) -> CommandOutcome {
    assert_eq!(outcomes.len(), 1, "expected one outcome, got {outcomes:?}");
    outcomes.into_iter().next().expect("one outcome")
}

#[test]
fn insert_round_trip_confirms_without_flicker() {
    let mut rig = Rig::new();
    rig.push(&queue_update(&["a", "b"]));
    let before = rig.presented().len();

    let id = rig
        .intent(Intent::QueueInsert {
            track_id: "x".to_string(),
            at_position: 1,
        })
        .expect("dispatch");
    assert_eq!(rig.snapshot().queue_ids(), vec!["a", "x", "b"]);
    assert_eq!(
        rig.sent(),
        vec![DeviceCommand::QueueInsert {
            command_id: id.clone(),
            track_id: "x".to_string(),
            at_position: 1,
        }]
    );

    rig.push(&queue_update(&["a", "x", "b"]));
    let outcome = single(rig.outcomes());
    assert_eq!(outcome.command_id, id);
    assert_eq!(outcome.resolution, Resolution::Confirmed);
    assert_eq!(rig.engine.pending_count(), 0);

    for snap in &rig.presented()[before..] {
        assert_eq!(snap.queue_ids(), vec!["a", "x", "b"]);
    }
    assert_eq!(rig.snapshot().music.track("x").map(|t| t.title.as_str()), Some("X"));

    // The ack arrives after the update already confirmed it.
    let rev = rig.snapshot().revision();
    rig.ack(&id, true, None);
    assert_eq!(rig.snapshot().revision(), rev);
    assert!(rig.outcomes().is_empty());
}

#[test]
fn kill_without_ack_times_out_and_restores_pid() {
    let mut rig = Rig::new();
    rig.push(&process_update(&[42, 7]));

    let id = rig
        .intent(Intent::ProcessKill { pid: 42 })
        .expect("dispatch");
    assert_eq!(pids(&rig.snapshot()), vec![7]);

    let just_before = rig.at(2999);
    rig.engine.tick_at(just_before, &rig.presenter);
    assert!(rig.outcomes().is_empty());

    let deadline = rig.at(3000);
    rig.engine.tick_at(deadline, &rig.presenter);
    let outcome = single(rig.outcomes());
    assert_eq!(outcome.command_id, id);
    assert_eq!(outcome.kind, CommandKind::ProcessKill);
    assert_eq!(outcome.resolution, Resolution::Rejected(SyncError::CommandTimeout));
    assert_eq!(pids(&rig.snapshot()), vec![42, 7]);

    let rev = rig.snapshot().revision();
    rig.ack(&id, true, None);
    assert_eq!(rig.snapshot().revision(), rev);
    assert!(rig.outcomes().is_empty());
    assert_eq!(rig.engine.stats().commands_timed_out, 1);
}

#[test]
fn conflicting_reorder_loses_after_retry_cycles() {
    let mut rig = Rig::new();
    rig.push(&queue_update(&["c", "b", "a"]));

    let id = rig
        .intent(Intent::QueueReorder {
            ordered_track_ids: vec!["a".into(), "b".into(), "c".into()],
        })
        .expect("dispatch");
    assert_eq!(rig.snapshot().queue_ids(), vec!["a", "b", "c"]);

    let conflicting = [["a", "c", "b"], ["b", "a", "c"]];
    for (cycle, order) in (1..).zip(conflicting) {
        rig.push_at(&queue_update(&order), rig.at(cycle * 10));
        assert!(rig.outcomes().is_empty(), "cycle {cycle}");
        assert_eq!(rig.snapshot().queue_ids(), vec!["a", "b", "c"]);
    }

    rig.push_at(&queue_update(&["b", "c", "a"]), rig.at(30));
    let outcome = single(rig.outcomes());
    assert_eq!(outcome.command_id, id);
    assert_eq!(outcome.error().map(SyncError::kind), Some(ErrorKind::CommandRejected));
    assert_eq!(rig.snapshot().queue_ids(), vec!["b", "c", "a"]);
    assert_eq!(rig.engine.pending_count(), 0);
}

#[test]
fn mismatching_update_after_deadline_resolves_as_timeout() {
    let mut rig = Rig::new();
    rig.push(&queue_update(&["c", "b", "a"]));
    rig.intent(Intent::QueueReorder {
        ordered_track_ids: vec!["a".into(), "b".into(), "c".into()],
    })
    .expect("dispatch");

    rig.push_at(&queue_update(&["b", "c", "a"]), rig.at(5000));
    let outcome = single(rig.outcomes());
    assert_eq!(outcome.resolution, Resolution::Rejected(SyncError::CommandTimeout));
    assert_eq!(rig.snapshot().queue_ids(), vec!["b", "c", "a"]);
}

#[test]
fn disconnect_fails_pending_and_freezes_dispatch() {
    let mut rig = Rig::new();
    rig.push(&presence_update(false, &["u1"]));

    let id = rig.intent(Intent::MuteToggle).expect("dispatch");
    assert!(rig.snapshot().presence.self_muted);

    rig.feed(InboundMsg::LinkDown);
    assert_eq!(rig.engine.link_status(), LinkStatus::Disconnected);
    let outcome = single(rig.outcomes());
    assert_eq!(outcome.command_id, id);
    assert_eq!(outcome.resolution, Resolution::Rejected(SyncError::LinkLost));
    assert!(!rig.snapshot().presence.self_muted);

    let rev = rig.snapshot().revision();
    let err = rig.intent(Intent::MuteToggle).expect_err("frozen");
    assert_eq!(err, SyncError::LinkLost);
    assert_eq!(rig.snapshot().revision(), rev);

    rig.feed(InboundMsg::LinkUp {
        kind: TransportKind::Wifi,
        peer: "test".to_string(),
    });
    rig.intent(Intent::MuteToggle).expect("dispatch after reconnect");
    assert!(rig.snapshot().presence.self_muted);
    assert_eq!(rig.engine.stats().link_drops, 1);
}

#[test]
fn dispatch_before_first_link_up_is_refused() {
    let (_in_tx, in_rx) = bounded(4);
    let (out_tx, out_rx) = bounded(4);
    let (outcome_tx, _outcome_rx) = bounded(4);
    let mut engine = Engine::new(&SyncConfig::default(), in_rx, out_tx, outcome_tx);
    assert_eq!(engine.link_status(), LinkStatus::Disconnected);
    let err = engine
        .dispatch(Intent::SkipNext, Instant::now())
        .expect_err("no link");
    assert_eq!(err.kind(), ErrorKind::LinkLost);
    assert!(out_rx.try_recv().is_err());
}

#[test]
fn nack_reverts_to_server_value() {
    let mut rig = Rig::new();
    rig.push(&process_update(&[7, 8]));

    let id = rig.intent(Intent::ProcessKill { pid: 7 }).expect("dispatch");
    assert_eq!(pids(&rig.snapshot()), vec![8]);

    rig.ack(&id, false, Some("access denied"));
    let outcome = single(rig.outcomes());
    assert_eq!(
        outcome.resolution,
        Resolution::Rejected(SyncError::CommandRejected("access denied".to_string()))
    );
    assert_eq!(pids(&rig.snapshot()), vec![7, 8]);
}

#[test]
fn duplicate_ack_is_a_no_op() {
    let mut rig = Rig::new();
    rig.push(&presence_update(false, &[]));
    let id = rig.intent(Intent::MuteToggle).expect("dispatch");

    rig.ack(&id, true, None);
    assert_eq!(single(rig.outcomes()).resolution, Resolution::Confirmed);
    assert!(rig.snapshot().presence.self_muted);
    let rev = rig.snapshot().revision();

    rig.ack(&id, true, None);
    rig.ack("never-issued", false, None);
    assert!(rig.outcomes().is_empty());
    assert_eq!(rig.snapshot().revision(), rev);
    assert!(rig.snapshot().presence.self_muted);
}

#[test]
fn acked_command_survives_revert_of_a_later_one() {
    let mut rig = Rig::new();
    rig.push(&queue_update(&["a", "b"]));

    let first = rig
        .intent(Intent::QueueInsert {
            track_id: "x".into(),
            at_position: 0,
        })
        .expect("first");
    let second = rig
        .intent(Intent::QueueRemove {
            track_id: "b".into(),
        })
        .expect("second");
    assert_eq!(rig.snapshot().queue_ids(), vec!["x", "a"]);

    rig.ack(&first, true, None);
    rig.ack(&second, false, None);
    assert_eq!(rig.snapshot().queue_ids(), vec!["x", "a", "b"]);
    let outcomes = rig.outcomes();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].resolution, Resolution::Confirmed);
    assert_eq!(outcomes[1].error().map(SyncError::kind), Some(ErrorKind::CommandRejected));
}

#[test]
fn cancel_reverts_and_ignores_late_ack() {
    let mut rig = Rig::new();
    rig.push(&queue_update(&["a"]));
    let id = rig
        .intent(Intent::QueueInsert {
            track_id: "x".into(),
            at_position: 1,
        })
        .expect("dispatch");
    rig.sent();

    rig.cancel(&id).expect("cancel");
    assert_eq!(rig.snapshot().queue_ids(), vec!["a"]);
    assert_eq!(single(rig.outcomes()).resolution, Resolution::Cancelled);
    assert!(rig.sent().is_empty(), "cancel puts nothing on the wire");

    let rev = rig.snapshot().revision();
    rig.ack(&id, true, None);
    assert_eq!(rig.snapshot().revision(), rev);
    assert!(rig.outcomes().is_empty());

    let err = rig.cancel(&id).expect_err("already resolved");
    assert_eq!(err.kind(), ErrorKind::InvalidLocalState);
}

#[test]
fn second_reorder_while_first_pending_is_rejected_locally() {
    let mut rig = Rig::new();
    rig.push(&queue_update(&["a", "b", "c"]));
    rig.intent(Intent::QueueReorder {
        ordered_track_ids: vec!["c".into(), "b".into(), "a".into()],
    })
    .expect("first");
    assert_eq!(rig.sent().len(), 1);
    let rev = rig.snapshot().revision();

    let err = rig
        .intent(Intent::QueueReorder {
            ordered_track_ids: vec!["b".into(), "c".into(), "a".into()],
        })
        .expect_err("second");
    assert_eq!(err.kind(), ErrorKind::InvalidLocalState);
    assert!(rig.sent().is_empty());
    assert_eq!(rig.snapshot().revision(), rev);
}

#[test]
fn insert_into_full_queue_is_rejected_locally() {
    let mut config = SyncConfig::default();
    config.max_queue_size = 2;
    let mut rig = Rig::with_config(config);
    rig.push(&queue_update(&["a", "b"]));
    let rev = rig.snapshot().revision();

    let err = rig
        .intent(Intent::QueueInsert {
            track_id: "c".into(),
            at_position: 0,
        })
        .expect_err("full");
    assert_eq!(err.kind(), ErrorKind::InvalidLocalState);
    assert!(rig.sent().is_empty());
    assert_eq!(rig.snapshot().revision(), rev);
}

#[test]
fn local_preconditions_are_checked_before_sending() {
    let mut rig = Rig::new();
    rig.push(&process_update(&[1]));
    rig.push(&queue_update(&["a", "b"]));

    let rejected = [
        Intent::ProcessKill { pid: 999 },
        Intent::QueueRemove {
            track_id: "zz".into(),
        },
        Intent::QueueInsert {
            track_id: "a".into(),
            at_position: 0,
        },
        Intent::QueueInsert {
            track_id: "c".into(),
            at_position: 5,
        },
        Intent::QueueReorder {
            ordered_track_ids: vec!["a".into(), "b".into()],
        },
        Intent::QueueReorder {
            ordered_track_ids: vec!["b".into()],
        },
        Intent::MuteToggle,
        Intent::PlayPause,
        Intent::SkipNext,
    ];
    for intent in rejected {
        let err = rig.intent(intent.clone()).expect_err("precondition");
        assert_eq!(err.kind(), ErrorKind::InvalidLocalState, "{intent:?}");
    }
    assert!(rig.sent().is_empty());
    assert_eq!(rig.engine.stats().commands_sent, 0);
}

#[test]
fn updates_create_unknown_entities() {
    let mut rig = Rig::new();
    rig.push(&queue_update(&["a"]));
    rig.push(&queue_update(&["a", "new"]));
    assert_eq!(rig.snapshot().queue_ids(), vec!["a", "new"]);
    assert!(rig.snapshot().music.track("new").is_some());

    rig.push(&presence_update(false, &["u1"]));
    rig.push(&presence_update(false, &["u1", "u2"]));
    assert_eq!(rig.snapshot().presence.participants.len(), 2);
}

#[test]
fn kill_confirmed_by_list_then_ack_for_absent_pid_is_no_op() {
    let mut rig = Rig::new();
    rig.push(&process_update(&[42, 7]));
    let id = rig.intent(Intent::ProcessKill { pid: 42 }).expect("dispatch");

    rig.push(&process_update(&[7, 9]));
    assert_eq!(single(rig.outcomes()).resolution, Resolution::Confirmed);
    assert_eq!(pids(&rig.snapshot()), vec![7, 9]);

    let rev = rig.snapshot().revision();
    rig.ack(&id, true, None);
    assert_eq!(rig.snapshot().revision(), rev);
    assert_eq!(pids(&rig.snapshot()), vec![7, 9]);
}

#[test]
fn unrelated_family_updates_do_not_touch_pending_commands() {
    let mut rig = Rig::new();
    rig.push(&process_update(&[42]));
    rig.push(&presence_update(false, &[]));
    rig.intent(Intent::ProcessKill { pid: 42 }).expect("dispatch");

    for i in 0..5 {
        rig.push_at(&presence_update(i % 2 == 0, &[]), rig.at(i * 10));
    }
    assert!(rig.outcomes().is_empty());
    assert_eq!(rig.engine.pending_count(), 1);
    assert!(pids(&rig.snapshot()).is_empty());
}

#[test]
fn malformed_frames_are_dropped() {
    let mut rig = Rig::new();
    let rev = rig.snapshot().revision();
    rig.feed(InboundMsg::Bytes(b"{\"type\":\"queueUpdate\"}\nnot json\n".to_vec()));
    assert_eq!(rig.snapshot().revision(), rev);
    assert_eq!(rig.engine.stats().malformed_frames, 2);

    rig.push(&queue_update(&["a"]));
    assert_eq!(rig.snapshot().queue_ids(), vec!["a"]);
    assert_eq!(rig.engine.stats().frames_received, 3);
}

#[test]
fn repeated_process_update_does_not_churn_revision() {
    let mut rig = Rig::new();
    let update = process_update(&[3, 3, 4]);
    rig.push(&update);
    let rev = rig.snapshot().revision();
    let snap = rig.snapshot();
    rig.push(&update);
    assert_eq!(rig.snapshot().revision(), rev);
    assert_eq!(*rig.snapshot(), *snap);
    assert_eq!(pids(&rig.snapshot()), vec![3, 4]);
}

#[test]
fn repeated_process_update_keeps_pending_kill() {
    let mut rig = Rig::new();
    rig.push(&process_update(&[42, 7]));
    let id = rig.intent(Intent::ProcessKill { pid: 42 }).expect("dispatch");
    assert_eq!(pids(&rig.snapshot()), vec![7]);

    rig.push_at(&process_update(&[42, 7]), rig.at(10));
    rig.push_at(&process_update(&[42, 7, 8]), rig.at(20));
    let first = rig.snapshot();
    assert_eq!(pids(&first), vec![7, 8]);

    for ms in [30, 40, 50] {
        rig.push_at(&process_update(&[42, 7, 8]), rig.at(ms));
        assert_eq!(rig.snapshot().revision(), first.revision());
        assert_eq!(*rig.snapshot(), *first);
    }
    assert!(rig.outcomes().is_empty());
    assert_eq!(rig.engine.pending_count(), 1);

    rig.ack(&id, true, None);
    assert_eq!(single(rig.outcomes()).resolution, Resolution::Confirmed);
    assert_eq!(pids(&rig.snapshot()), vec![7, 8]);
}

#[test]
fn full_outbound_queue_withdraws_the_command() {
    let mut rig = Rig::with_capacities(SyncConfig::default(), 0, 64);
    rig.push(&process_update(&[42, 7]));
    let rev = rig.snapshot().revision();

    let err = rig
        .intent(Intent::ProcessKill { pid: 42 })
        .expect_err("nowhere to send");
    assert_eq!(err.kind(), ErrorKind::LinkLost);
    assert_eq!(pids(&rig.snapshot()), vec![42, 7]);
    assert_eq!(rig.snapshot().revision(), rev + 2);
    assert_eq!(rig.engine.pending_count(), 0);
    assert_eq!(rig.engine.stats().commands_sent, 0);
    assert!(rig.outcomes().is_empty());
    assert!(rig.sent().is_empty());

    let last = rig.presented().last().cloned().expect("presented");
    assert_eq!(pids(&last), vec![42, 7]);
}

#[test]
fn full_outcome_channel_does_not_stall_resolution() {
    let mut rig = Rig::with_capacities(SyncConfig::default(), 64, 1);
    rig.push(&process_update(&[1, 2, 3]));
    for pid in [1, 2, 3] {
        rig.intent(Intent::ProcessKill { pid }).expect("dispatch");
    }
    assert!(pids(&rig.snapshot()).is_empty());

    let deadline = rig.at(3000);
    rig.engine.tick_at(deadline, &rig.presenter);
    assert_eq!(rig.outcomes().len(), 1);
    assert_eq!(rig.engine.stats().commands_timed_out, 3);
    assert_eq!(rig.engine.pending_count(), 0);
    assert_eq!(pids(&rig.snapshot()), vec![1, 2, 3]);
}

#[test]
fn rebuild_fails_pending_and_starts_from_empty_state() {
    let mut rig = Rig::new();
    rig.push(&queue_update(&["a", "b"]));
    rig.push(&process_update(&[42]));
    let kill = rig.intent(Intent::ProcessKill { pid: 42 }).expect("kill");
    let remove = rig
        .intent(Intent::QueueRemove {
            track_id: "a".into(),
        })
        .expect("remove");
    rig.feed(InboundMsg::Bytes(b"{\"type\":\"queueUp".to_vec()));
    let rev = rig.snapshot().revision();

    rig.engine.rebuild("corrupt queue positions");

    let outcomes = rig.outcomes();
    assert_eq!(outcomes.len(), 2, "{outcomes:?}");
    for id in [&kill, &remove] {
        let outcome = outcomes
            .iter()
            .find(|o| &o.command_id == id)
            .expect("outcome per pending command");
        assert_eq!(
            outcome.error().map(SyncError::kind),
            Some(ErrorKind::InvariantViolation)
        );
    }
    assert!(rig.snapshot().revision() > rev);
    assert_eq!(*rig.snapshot().state(), DashboardState::default());
    assert_eq!(rig.engine.pending_count(), 0);
    assert_eq!(rig.engine.stats().rebuilds, 1);
    assert_eq!(rig.engine.stats().commands_rejected, 2);

    let rebuilt = rig.snapshot().revision();
    rig.ack(&kill, true, None);
    assert!(rig.outcomes().is_empty());
    assert_eq!(rig.snapshot().revision(), rebuilt);

    // The partial frame from before the rebuild is gone.
    rig.push(&queue_update(&["c"]));
    assert_eq!(rig.snapshot().queue_ids(), vec!["c"]);
    assert_eq!(rig.snapshot().revision(), rebuilt + 1);
    assert_eq!(rig.engine.stats().malformed_frames, 0);

    let revisions: Vec<u64> = rig.presented().iter().map(|s| s.revision()).collect();
    assert!(revisions.windows(2).all(|w| w[0] < w[1]), "{revisions:?}");
}

#[test]
fn play_pause_and_skip_follow_music_updates() {
    let mut rig = Rig::new();
    rig.push(&music_update("t1", true));

    let play = rig.intent(Intent::PlayPause).expect("play/pause");
    assert!(!rig.snapshot().music.playback.is_playing);
    let skip = rig.intent(Intent::SkipNext).expect("skip");
    let rev = rig.snapshot().revision();

    rig.push(&music_update("t2", false));
    let outcomes = rig.outcomes();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|o| o.resolution == Resolution::Confirmed));
    assert!(outcomes.iter().any(|o| o.command_id == play));
    assert!(outcomes.iter().any(|o| o.command_id == skip));
    assert!(rig.snapshot().revision() > rev);
    assert_eq!(rig.snapshot().music.now_playing.as_deref(), Some("t2"));
    assert!(rig.snapshot().music.track("t1").is_none());
}

#[test]
fn presented_revisions_strictly_increase() {
    let mut rig = Rig::new();
    rig.push(&queue_update(&["a", "b"]));
    rig.push(&process_update(&[1, 2]));
    let id = rig.intent(Intent::ProcessKill { pid: 1 }).expect("dispatch");
    rig.ack(&id, false, None);
    rig.intent(Intent::QueueRemove {
        track_id: "a".into(),
    })
    .expect("dispatch");
    rig.feed(InboundMsg::LinkDown);

    let revisions: Vec<u64> = rig.presented().iter().map(|s| s.revision()).collect();
    assert!(!revisions.is_empty());
    assert!(revisions.windows(2).all(|w| w[1] == w[0] + 1), "{revisions:?}");
}

#[test]
fn snapshot_serializes_for_presenters() {
    let mut rig = Rig::new();
    rig.push(&queue_update(&["a"]));
    rig.push(&presence_update(true, &["u1"]));
    let json = serde_json::to_value(rig.snapshot().as_ref()).expect("serialize");
    assert_eq!(json["revision"], 2);
    assert_eq!(json["queue"][0]["trackId"], "a");
    assert_eq!(json["presence"]["selfMuted"], true);
    assert_eq!(json["music"]["tracks"]["a"]["title"], "A");
}
