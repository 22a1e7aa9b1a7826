//! Lives in its own test binary: it counts the process's link reader threads.
#![cfg(target_os = "linux")]

use crossbeam_channel::{bounded, Receiver};
use deck_sync::{Endpoint, InboundMsg, LinkThread, OutboundMsg, TransportKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

fn reader_threads() -> Vec<String> {
    let mut tids = Vec::new();
    let Ok(tasks) = std::fs::read_dir("/proc/self/task") else {
        return tids;
    };
    for task in tasks.flatten() {
        let comm = std::fs::read_to_string(task.path().join("comm")).unwrap_or_default();
        if comm.trim() == "deck-link-rx" {
            tids.push(task.file_name().to_string_lossy().into_owned());
        }
    }
    tids.sort();
    tids
}

fn wait_for(in_rx: &Receiver<InboundMsg>, what: &str, want: impl Fn(&InboundMsg) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match in_rx.recv_timeout(left) {
            Ok(msg) if want(&msg) => return,
            Ok(_) => {}
            Err(_) => panic!("timeout waiting for {what}"),
        }
    }
}

#[test]
fn uart_write_failure_keeps_the_same_reader() {
    // Reads never block and every write fails with ENOSPC.
    let device = Path::new("/dev/full");
    if !device.exists() {
        return;
    }

    let (in_tx, in_rx) = bounded(8);
    let (out_tx, out_rx) = bounded(8);
    let link = LinkThread::spawn(Endpoint::Uart(PathBuf::from(device)), in_tx, out_rx)
        .expect("spawn link");

    wait_for(&in_rx, "first link up", |m| {
        matches!(m, InboundMsg::LinkUp { kind: TransportKind::Uart, .. })
    });
    let readers = reader_threads();
    assert_eq!(readers.len(), 1, "{readers:?}");

    for cycle in 0..3 {
        out_tx
            .send(OutboundMsg::Send {
                frame: b"{}\n".to_vec(),
            })
            .expect("outbound open");
        wait_for(&in_rx, "link down", |m| matches!(m, InboundMsg::LinkDown));
        wait_for(&in_rx, "link back up", |m| matches!(m, InboundMsg::LinkUp { .. }));
        assert_eq!(reader_threads(), readers, "cycle {cycle}");
    }

    drop(in_rx);
    link.shutdown();
}
