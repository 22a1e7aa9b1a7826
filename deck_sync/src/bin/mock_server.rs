use deck_protocol::{
    DeviceCommand, Participant, Playback, PresenceStatus, ProcessInfo, ServerMessage,
    SystemStats, Track,
};
use deck_sync::codec::{decode_message, encode_frame, FrameDecoder};
use deck_sync::Framing;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "127.0.0.1:5555";
const PUSH_INTERVAL: Duration = Duration::from_secs(2);
const MAX_FRAME: usize = 256 * 1024;

/// Desktop-side stand-in: pushes a small scripted dashboard and applies
/// whatever the device asks for.
struct World {
    catalog: Vec<Track>,
    queue: Vec<String>,
    now_playing: usize,
    playing: bool,
    processes: Vec<ProcessInfo>,
    self_muted: bool,
    self_deafened: bool,
    /// Every Nth command is refused so the device sees nacks too.
    reject_every: Option<u64>,
    handled: u64,
}

impl World {
    fn new(reject_every: Option<u64>) -> Self {
        let catalog = (1..=8)
            .map(|i| Track {
                id: format!("t{i}"),
                title: format!("Track {i}"),
                artist: "Mock Artist".to_string(),
                album: "Mock Album".to_string(),
                artwork_ref: Some(format!("art/t{i}")),
            })
            .collect();
        let processes = [(42, "chrome"), (77, "code"), (1203, "discord"), (2048, "game")]
            .into_iter()
            .map(|(pid, name)| ProcessInfo {
                pid,
                name: name.to_string(),
                mem_bytes: u64::from(pid) * 1024 * 1024,
                cpu_percent: (pid % 13) as f32,
            })
            .collect();
        Self {
            catalog,
            queue: vec!["t2".into(), "t3".into(), "t4".into()],
            now_playing: 0,
            playing: true,
            processes,
            self_muted: false,
            self_deafened: false,
            reject_every,
            handled: 0,
        }
    }

    fn track(&self, id: &str) -> Option<Track> {
        self.catalog.iter().find(|t| t.id == id).cloned()
    }

    fn music(&self) -> ServerMessage {
        ServerMessage::MusicUpdate {
            now_playing: self.catalog.get(self.now_playing).cloned(),
            playback: Playback {
                position_secs: 0,
                duration_secs: 180,
                is_playing: self.playing,
                source: Some("mock".to_string()),
            },
        }
    }

    fn queue(&self) -> ServerMessage {
        ServerMessage::QueueUpdate {
            tracks: self.queue.iter().filter_map(|id| self.track(id)).collect(),
        }
    }

    fn processes(&self) -> ServerMessage {
        ServerMessage::ProcessListUpdate {
            processes: self.processes.clone(),
            stats: Some(SystemStats {
                cpu_percent_total: 23.5,
                mem_percent: 61.0,
                gpu_percent: Some(12.0),
                battery_percent: None,
                power_plugged: Some(true),
            }),
        }
    }

    fn presence(&self) -> ServerMessage {
        ServerMessage::PresenceUpdate {
            in_call: true,
            channel_name: Some("general".to_string()),
            self_muted: self.self_muted,
            self_deafened: self.self_deafened,
            participants: vec![Participant {
                user_id: "u1".to_string(),
                display_name: "friend".to_string(),
                avatar_ref: None,
                speaking: false,
                muted: false,
                deafened: false,
                status: PresenceStatus::Online,
            }],
        }
    }

    fn full_push(&self) -> Vec<ServerMessage> {
        vec![self.music(), self.queue(), self.processes(), self.presence()]
    }

    /// Returns the ack followed by whatever update the command produced.
    fn handle(&mut self, cmd: DeviceCommand) -> Vec<ServerMessage> {
        self.handled += 1;
        let command_id = cmd.command_id().to_string();
        if self.reject_every.is_some_and(|n| n > 0 && self.handled % n == 0) {
            return vec![ServerMessage::CommandAck {
                command_id,
                success: false,
                reason: Some("mock server refused".to_string()),
            }];
        }

        let update = match cmd {
            DeviceCommand::QueueInsert {
                track_id,
                at_position,
                ..
            } => {
                let at = (at_position as usize).min(self.queue.len());
                self.queue.insert(at, track_id);
                self.queue()
            }
            DeviceCommand::QueueRemove { track_id, .. } => {
                self.queue.retain(|id| *id != track_id);
                self.queue()
            }
            DeviceCommand::QueueReorder {
                ordered_track_ids, ..
            } => {
                self.queue = ordered_track_ids;
                self.queue()
            }
            DeviceCommand::ProcessKill { pid, .. } => {
                self.processes.retain(|p| p.pid != pid);
                self.processes()
            }
            DeviceCommand::MuteToggle { .. } => {
                self.self_muted = !self.self_muted;
                self.presence()
            }
            DeviceCommand::DeafenToggle { .. } => {
                self.self_deafened = !self.self_deafened;
                self.presence()
            }
            DeviceCommand::PlayPause { .. } => {
                self.playing = !self.playing;
                self.music()
            }
            DeviceCommand::SkipNext { .. } => {
                self.now_playing = (self.now_playing + 1) % self.catalog.len();
                self.music()
            }
            DeviceCommand::SkipPrevious { .. } => {
                self.now_playing = (self.now_playing + self.catalog.len() - 1) % self.catalog.len();
                self.music()
            }
        };
        vec![
            ServerMessage::CommandAck {
                command_id,
                success: true,
                reason: None,
            },
            update,
        ]
    }
}

fn parse_arg_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn send_all(stream: &mut TcpStream, framing: Framing, msgs: &[ServerMessage]) -> bool {
    for msg in msgs {
        let frame = match encode_frame(framing, msg) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "encode failed");
                continue;
            }
        };
        if stream.write_all(&frame).is_err() {
            return false;
        }
    }
    true
}

fn serve_client(mut stream: TcpStream, framing: Framing, world: &mut World, deadline: Option<Instant>) {
    let _ = stream.set_nodelay(true);
    let _ = stream.set_read_timeout(Some(Duration::from_millis(50)));
    let mut decoder = FrameDecoder::new(framing, MAX_FRAME);
    let mut buf = [0u8; 4096];
    let mut last_push = Instant::now();

    if !send_all(&mut stream, framing, &world.full_push()) {
        return;
    }

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return;
        }
        match stream.read(&mut buf) {
            Ok(0) => {
                info!("device disconnected");
                return;
            }
            Ok(n) => {
                for frame in decoder.push(&buf[..n]) {
                    let cmd = frame.and_then(|f| decode_message::<DeviceCommand>(&f));
                    match cmd {
                        Ok(cmd) => {
                            info!(command_id = cmd.command_id(), kind = %cmd.kind(), "command");
                            let replies = world.handle(cmd);
                            if !send_all(&mut stream, framing, &replies) {
                                return;
                            }
                        }
                        Err(e) => warn!(error = %e, "bad frame from device"),
                    }
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                warn!(error = %e, "read failed");
                return;
            }
        }
        if last_push.elapsed() >= PUSH_INTERVAL {
            last_push = Instant::now();
            if !send_all(&mut stream, framing, &[world.processes()]) {
                return;
            }
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args: Vec<String> = std::env::args().collect();

    let addr = parse_arg_value(&args, "--addr")
        .or_else(|| std::env::var("DECK_WIFI_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let framing = parse_arg_value(&args, "--framing")
        .and_then(|s| s.parse::<Framing>().ok())
        .unwrap_or(Framing::Newline);
    let reject_every = parse_arg_value(&args, "--reject-every").and_then(|s| s.parse().ok());
    let deadline = parse_arg_value(&args, "--run-for-ms")
        .and_then(|s| s.parse::<u64>().ok())
        .map(|ms| Instant::now() + Duration::from_millis(ms));

    let listener = match TcpListener::bind(&addr) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("bind failed on {addr}: {e}");
            std::process::exit(1);
        }
    };
    let _ = listener.set_nonblocking(true);
    info!(%addr, ?framing, "mock_server listening");

    let mut world = World::new(reject_every);
    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let _ = stream.set_nonblocking(false);
                info!(%peer, "device connected");
                serve_client(stream, framing, &mut world, deadline);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(Duration::from_millis(25)),
            Err(e) => {
                warn!(error = %e, "accept failed");
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}
