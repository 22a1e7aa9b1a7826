use crate::config::{SyncConfig, TransportKind};
use crate::error::LinkError;
use crate::protocol::{InboundMsg, OutboundMsg};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_millis(100);
const WRITE_TIMEOUT: Duration = Duration::from_millis(500);
const POLL: Duration = Duration::from_millis(25);
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Uart(PathBuf),
    Wifi(String),
}

impl Endpoint {
    pub fn from_config(config: &SyncConfig) -> Self {
        match config.transport_kind {
            TransportKind::Uart => Endpoint::Uart(config.uart_path.clone()),
            TransportKind::Wifi => Endpoint::Wifi(config.wifi_addr.clone()),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Endpoint::Uart(_) => TransportKind::Uart,
            Endpoint::Wifi(_) => TransportKind::Wifi,
        }
    }

    fn open(&self) -> Result<LinkStream, LinkError> {
        match self {
            Endpoint::Uart(path) => {
                // Baud rate and line discipline are whatever the OS has set.
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                Ok(LinkStream::Uart(file))
            }
            Endpoint::Wifi(addr) => {
                let mut last_err = None;
                for sock in addr.to_socket_addrs()? {
                    match TcpStream::connect_timeout(&sock, CONNECT_TIMEOUT) {
                        Ok(stream) => {
                            let _ = stream.set_nodelay(true);
                            stream.set_read_timeout(Some(READ_TIMEOUT))?;
                            stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
                            return Ok(LinkStream::Tcp(stream));
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(LinkError::Io(last_err.unwrap_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, format!("{addr} did not resolve"))
                })))
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Uart(path) => write!(f, "uart:{}", path.display()),
            Endpoint::Wifi(addr) => write!(f, "wifi:{addr}"),
        }
    }
}

enum LinkStream {
    Tcp(TcpStream),
    Uart(File),
}

impl LinkStream {
    fn try_clone(&self) -> io::Result<LinkStream> {
        match self {
            LinkStream::Tcp(s) => s.try_clone().map(LinkStream::Tcp),
            LinkStream::Uart(f) => f.try_clone().map(LinkStream::Uart),
        }
    }

    fn close(&self) {
        if let LinkStream::Tcp(s) = self {
            let _ = s.shutdown(Shutdown::Both);
        }
    }
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            LinkStream::Tcp(s) => s.read(buf),
            LinkStream::Uart(f) => f.read(buf),
        }
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LinkStream::Tcp(s) => s.write(buf),
            LinkStream::Uart(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LinkStream::Tcp(s) => s.flush(),
            LinkStream::Uart(f) => f.flush(),
        }
    }
}

/// Owns the physical link: connects, pumps bytes both ways, reports
/// `LinkUp`/`LinkDown`, and reconnects with backoff.
pub struct LinkThread {
    shutdown: Arc<AtomicBool>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl LinkThread {
    pub fn spawn(
        endpoint: Endpoint,
        in_tx: Sender<InboundMsg>,
        out_rx: Receiver<OutboundMsg>,
    ) -> Result<Self, LinkError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_for_thread = Arc::clone(&shutdown);

        let join_handle = thread::Builder::new()
            .name("deck-link".to_string())
            .spawn(move || run_link(endpoint, in_tx, out_rx, shutdown_for_thread))
            .map_err(|e| LinkError::Spawn(e.to_string()))?;

        Ok(Self {
            shutdown,
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Ok(mut h) = self.join_handle.lock() {
            if let Some(h) = h.take() {
                let _ = h.join();
            }
        }
    }
}

impl Drop for LinkThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Exit {
    Shutdown,
    EngineGone,
    ReadEnded,
    WriteFailed(String),
}

/// Detached reader thread for one opened device. A blocked uart read cannot
/// be interrupted, so a uart reader outlives write failures and is handed to
/// the next connection instead of racing a second reader on the same tty.
struct Reader {
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl Reader {
    fn spawn(stream: LinkStream, in_tx: Sender<InboundMsg>) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let thread_stop = Arc::clone(&stop);
        let thread_running = Arc::clone(&running);
        thread::Builder::new()
            .name("deck-link-rx".to_string())
            .spawn(move || read_loop(stream, in_tx, thread_stop, thread_running))?;
        Ok(Self { stop, running })
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn run_link(
    endpoint: Endpoint,
    in_tx: Sender<InboundMsg>,
    out_rx: Receiver<OutboundMsg>,
    shutdown: Arc<AtomicBool>,
) {
    let mut backoff = Backoff::default();
    let mut carried: Option<Reader> = None;

    while !shutdown.load(Ordering::Relaxed) {
        let mut stream = match endpoint.open() {
            Ok(s) => {
                backoff.reset();
                s
            }
            Err(e) => {
                let retry = backoff.next_delay();
                debug!(%endpoint, error = %e, retry_ms = retry.as_millis() as u64, "link connect failed");
                sleep_unless(&shutdown, retry);
                continue;
            }
        };

        let reader = match carried.take().filter(Reader::is_running) {
            Some(reader) => {
                debug!(%endpoint, "reusing reader across reconnect");
                reader
            }
            None => match stream
                .try_clone()
                .and_then(|r| Reader::spawn(r, in_tx.clone()))
            {
                Ok(reader) => reader,
                Err(e) => {
                    warn!(%endpoint, error = %e, "link reader failed to start");
                    stream.close();
                    sleep_unless(&shutdown, backoff.next_delay());
                    continue;
                }
            },
        };

        // Frames queued for the previous connection are not replayed.
        let stale = out_rx.try_iter().count();
        if stale > 0 {
            debug!(stale, "discarded frames queued before reconnect");
        }

        let up = InboundMsg::LinkUp {
            kind: endpoint.kind(),
            peer: endpoint.to_string(),
        };
        if in_tx.send(up).is_err() {
            reader.stop();
            stream.close();
            return;
        }
        info!(%endpoint, "link connected");

        let exit = serve(&mut stream, &reader, &out_rx, &shutdown);
        let _ = in_tx.send(InboundMsg::LinkDown);
        match exit {
            Exit::Shutdown | Exit::EngineGone => {
                reader.stop();
                stream.close();
                return;
            }
            Exit::WriteFailed(reason)
                if endpoint.kind() == TransportKind::Uart && reader.is_running() =>
            {
                warn!(%endpoint, %reason, "link write failed; reopening for writing");
                carried = Some(reader);
            }
            Exit::WriteFailed(reason) => {
                warn!(%endpoint, %reason, "link dropped");
                reader.stop();
                stream.close();
            }
            Exit::ReadEnded => {
                warn!(%endpoint, "link dropped; peer closed");
                reader.stop();
                stream.close();
            }
        }
        sleep_unless(&shutdown, backoff.next_delay());
    }

    if let Some(reader) = carried {
        reader.stop();
    }
}

fn serve(
    stream: &mut LinkStream,
    reader: &Reader,
    out_rx: &Receiver<OutboundMsg>,
    shutdown: &AtomicBool,
) -> Exit {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return Exit::Shutdown;
        }
        if !reader.is_running() {
            return Exit::ReadEnded;
        }
        match out_rx.recv_timeout(POLL) {
            Ok(OutboundMsg::Send { frame }) => {
                if let Err(e) = stream.write_all(&frame).and_then(|_| stream.flush()) {
                    return Exit::WriteFailed(e.to_string());
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Exit::EngineGone,
        }
    }
}

fn read_loop(
    mut stream: LinkStream,
    in_tx: Sender<InboundMsg>,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; READ_CHUNK];
    while !stop.load(Ordering::Relaxed) {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                if in_tx.send(InboundMsg::Bytes(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                debug!(error = %e, "link read failed");
                break;
            }
        }
    }
    running.store(false, Ordering::Relaxed);
}

fn sleep_unless(shutdown: &AtomicBool, total: Duration) {
    let mut left = total;
    while !left.is_zero() && !shutdown.load(Ordering::Relaxed) {
        let step = left.min(POLL);
        thread::sleep(step);
        left -= step;
    }
}

#[derive(Debug, Default)]
pub struct Backoff {
    idx: usize,
}

impl Backoff {
    const DELAYS_MS: [u64; 5] = [250, 500, 1000, 2000, 5000];

    pub fn reset(&mut self) {
        self.idx = 0;
    }

    pub fn next_delay(&mut self) -> Duration {
        let last = Self::DELAYS_MS[Self::DELAYS_MS.len() - 1];
        let ms = Self::DELAYS_MS.get(self.idx).copied().unwrap_or(last);
        self.idx = (self.idx + 1).min(Self::DELAYS_MS.len());
        Duration::from_millis(ms)
    }
}
