use anyhow::{anyhow, bail, Context};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver};
use deck_sync::{
    CommandOutcome, Endpoint, Engine, EngineHandle, Intent, LinkThread, Presenter, Resolution,
    Snapshot, SyncConfig, INBOUND_CAP, OUTBOUND_CAP, OUTCOME_CAP,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Runs the sync engine against a live link and reads intents from stdin.
#[derive(Parser, Debug)]
#[command(name = "deckd")]
struct Args {
    /// JSON config file; environment and flags override it.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[arg(long)]
    transport: Option<String>,

    #[arg(long)]
    uart_path: Option<String>,

    #[arg(long)]
    wifi_addr: Option<String>,

    #[arg(long)]
    framing: Option<String>,

    #[arg(long)]
    command_timeout_ms: Option<u64>,

    /// Exit after this many milliseconds.
    #[arg(long)]
    run_for_ms: Option<u64>,

    /// Log every snapshot as JSON at info level.
    #[arg(long, default_value_t = false)]
    dump_snapshots: bool,
}

impl Args {
    fn flag_for(&self, key: &str) -> Option<String> {
        match key {
            "DECK_TRANSPORT" => self.transport.clone(),
            "DECK_UART_PATH" => self.uart_path.clone(),
            "DECK_WIFI_ADDR" => self.wifi_addr.clone(),
            "DECK_FRAMING" => self.framing.clone(),
            "DECK_COMMAND_TIMEOUT_MS" => self.command_timeout_ms.map(|v| v.to_string()),
            _ => None,
        }
    }
}

struct LogPresenter {
    dump: bool,
}

impl Presenter for LogPresenter {
    fn present(&self, snapshot: &Arc<Snapshot>) {
        info!(
            revision = snapshot.revision(),
            now_playing = snapshot.music.now_playing.as_deref().unwrap_or("-"),
            queued = snapshot.queue.len(),
            processes = snapshot.processes.processes.len(),
            participants = snapshot.presence.participants.len(),
            "snapshot"
        );
        if self.dump {
            match serde_json::to_string(snapshot.as_ref()) {
                Ok(json) => info!(%json, "snapshot json"),
                Err(e) => warn!(error = %e, "snapshot serialization failed"),
            }
        }
    }
}

fn parse_intent(line: &str) -> anyhow::Result<Option<Intent>> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };
    let intent = match verb {
        "insert" => {
            let track_id = parts.next().ok_or_else(|| anyhow!("usage: insert <track> [pos]"))?;
            let at_position = match parts.next() {
                Some(p) => p.parse::<usize>().context("position must be a number")?,
                None => 0,
            };
            Intent::QueueInsert {
                track_id: track_id.to_string(),
                at_position,
            }
        }
        "remove" => Intent::QueueRemove {
            track_id: parts
                .next()
                .ok_or_else(|| anyhow!("usage: remove <track>"))?
                .to_string(),
        },
        "reorder" => Intent::QueueReorder {
            ordered_track_ids: parts
                .next()
                .ok_or_else(|| anyhow!("usage: reorder <a,b,c>"))?
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        },
        "kill" => Intent::ProcessKill {
            pid: parts
                .next()
                .ok_or_else(|| anyhow!("usage: kill <pid>"))?
                .parse::<u32>()
                .context("pid must be a number")?,
        },
        "mute" => Intent::MuteToggle,
        "deafen" => Intent::DeafenToggle,
        "play" | "pause" => Intent::PlayPause,
        "next" => Intent::SkipNext,
        "prev" => Intent::SkipPrevious,
        other => bail!("unknown command: {other}"),
    };
    Ok(Some(intent))
}

fn spawn_stdin(handle: EngineHandle) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("deckd-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                let line = line.trim();
                if let Some(id) = line.strip_prefix("cancel ") {
                    match handle.cancel(id.trim()) {
                        Ok(()) => info!(command_id = id.trim(), "cancel accepted"),
                        Err(e) => warn!(error = %e, "cancel failed"),
                    }
                    continue;
                }
                match parse_intent(line) {
                    Ok(Some(intent)) => match handle.submit(intent) {
                        Ok(command_id) => info!(%command_id, "command sent"),
                        Err(e) => warn!(error = %e, kind = ?e.kind(), "command refused"),
                    },
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "bad input"),
                }
            }
            debug!("stdin closed");
        })?;
    Ok(())
}

fn spawn_outcome_log(outcomes: Receiver<CommandOutcome>) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("deckd-outcomes".to_string())
        .spawn(move || {
            for outcome in outcomes {
                match &outcome.resolution {
                    Resolution::Confirmed => {
                        info!(command_id = %outcome.command_id, kind = %outcome.kind, "confirmed")
                    }
                    Resolution::Cancelled => {
                        info!(command_id = %outcome.command_id, kind = %outcome.kind, "cancelled")
                    }
                    Resolution::Rejected(e) => {
                        warn!(command_id = %outcome.command_id, kind = %outcome.kind, error = %e, "rejected")
                    }
                }
            }
        })?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut config = SyncConfig::load(args.config.as_deref())?;
    config.apply_overrides(|key| args.flag_for(key))?;
    config.validate()?;
    info!(?config, "config loaded");

    let (in_tx, in_rx) = bounded(INBOUND_CAP);
    let (out_tx, out_rx) = bounded(OUTBOUND_CAP);
    let (outcome_tx, outcome_rx) = bounded(OUTCOME_CAP);

    let link = LinkThread::spawn(Endpoint::from_config(&config), in_tx.clone(), out_rx)?;
    spawn_stdin(EngineHandle::new(in_tx))?;
    spawn_outcome_log(outcome_rx)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    if let Some(ms) = args.run_for_ms {
        let flag = Arc::clone(&shutdown);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(ms));
            flag.store(true, Ordering::Relaxed);
        });
    }

    let mut engine = Engine::new(&config, in_rx, out_tx, outcome_tx);
    let presenter = LogPresenter {
        dump: args.dump_snapshots,
    };
    engine.run(&presenter, &shutdown);

    info!(stats = ?engine.stats(), "engine stopped");
    link.shutdown();
    Ok(())
}
