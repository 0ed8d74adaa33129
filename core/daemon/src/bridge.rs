//! Session event bridge: local stream socket, one JSON event per line.
//!
//! Up to `max_connections` emitters may be connected at once; further
//! connections are closed immediately and counted. Each connection gets its
//! own reader thread; decoded events go to the session hub. A bad line is logged and
//! skipped, the connection stays open. The server never writes back.
//!
//! The accept loop is non-blocking so `stop()` can end it promptly; reader
//! threads use a short read timeout for the same reason.

use std::io::{self, ErrorKind, Read};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use companion_bridge_protocol::{decode_line, ErrorInfo};
use companion_core::EventSource;

use crate::hub::HubSender;

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const READ_POLL: Duration = Duration::from_millis(200);
const READ_CHUNK_SIZE: usize = 8192;
const SOCKET_MODE: u32 = 0o600;
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub socket_path: PathBuf,
    pub max_line_bytes: usize,
    pub max_connections: usize,
}

#[derive(Debug, Default)]
struct BridgeCounters {
    accepted: AtomicU64,
    active: AtomicU64,
    refused: AtomicU64,
    events: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStatus {
    pub listening: bool,
    pub socket_path: Option<PathBuf>,
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub events_received: u64,
    pub lines_rejected: u64,
}

pub struct EventBridgeServer {
    socket_path: PathBuf,
    stop: Arc<AtomicBool>,
    counters: Arc<BridgeCounters>,
    accept_thread: Option<JoinHandle<()>>,
}

impl EventBridgeServer {
    pub fn start(config: BridgeConfig, hub: HubSender) -> io::Result<Self> {
        prepare_socket_dir(&config.socket_path)?;
        remove_stale_socket(&config.socket_path)?;

        let listener = UnixListener::bind(&config.socket_path)?;
        fs_err::set_permissions(
            &config.socket_path,
            std::fs::Permissions::from_mode(SOCKET_MODE),
        )?;
        listener.set_nonblocking(true)?;

        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(BridgeCounters::default());

        let accept_stop = Arc::clone(&stop);
        let accept_counters = Arc::clone(&counters);
        let limits = ConnectionLimits {
            max_line_bytes: config.max_line_bytes,
            max_connections: config.max_connections.max(1),
        };
        let accept_thread = thread::Builder::new()
            .name("bridge-accept".to_string())
            .spawn(move || accept_loop(listener, hub, accept_stop, accept_counters, limits))?;

        info!(path = %config.socket_path.display(), "Event bridge listening");

        Ok(Self {
            socket_path: config.socket_path,
            stop,
            counters,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            listening: self.accept_thread.is_some(),
            socket_path: Some(self.socket_path.clone()),
            connections_accepted: self.counters.accepted.load(Ordering::Relaxed),
            connections_active: self.counters.active.load(Ordering::Relaxed),
            connections_rejected: self.counters.refused.load(Ordering::Relaxed),
            events_received: self.counters.events.load(Ordering::Relaxed),
            lines_rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting, waits for reader threads, removes the socket file.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let Some(handle) = self.accept_thread.take() else {
            return;
        };
        let _ = handle.join();
        if let Err(err) = fs_err::remove_file(&self.socket_path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(error = %err, "Failed to remove bridge socket");
            }
        }
        info!("Event bridge stopped");
    }
}

impl Drop for EventBridgeServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn prepare_socket_dir(socket_path: &Path) -> io::Result<()> {
    match socket_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs_err::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// A socket file left by a crashed process is removed; one that still
/// accepts connections belongs to a live instance and is left alone.
fn remove_stale_socket(socket_path: &Path) -> io::Result<()> {
    if !socket_path.exists() {
        return Ok(());
    }
    if UnixStream::connect(socket_path).is_ok() {
        return Err(io::Error::new(
            ErrorKind::AddrInUse,
            format!("{} is in use by another process", socket_path.display()),
        ));
    }
    debug!(path = %socket_path.display(), "Removing stale bridge socket");
    fs_err::remove_file(socket_path)
}

#[derive(Debug, Clone, Copy)]
struct ConnectionLimits {
    max_line_bytes: usize,
    max_connections: usize,
}

fn accept_loop(
    listener: UnixListener,
    hub: HubSender,
    stop: Arc<AtomicBool>,
    counters: Arc<BridgeCounters>,
    limits: ConnectionLimits,
) {
    let mut readers: Vec<JoinHandle<()>> = Vec::new();
    let max_line_bytes = limits.max_line_bytes;

    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if counters.active.load(Ordering::Relaxed) >= limits.max_connections as u64 {
                    counters.refused.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        max_connections = limits.max_connections,
                        "Bridge connection limit reached; closing new connection"
                    );
                    drop(stream);
                    continue;
                }
                counters.accepted.fetch_add(1, Ordering::Relaxed);
                counters.active.fetch_add(1, Ordering::Relaxed);
                let hub = hub.clone();
                let stop = Arc::clone(&stop);
                let conn_counters = Arc::clone(&counters);
                let spawned = thread::Builder::new()
                    .name("bridge-conn".to_string())
                    .spawn(move || {
                        handle_connection(stream, &hub, &stop, &conn_counters, max_line_bytes);
                        conn_counters.active.fetch_sub(1, Ordering::Relaxed);
                    });
                match spawned {
                    Ok(handle) => readers.push(handle),
                    Err(err) => {
                        counters.active.fetch_sub(1, Ordering::Relaxed);
                        warn!(error = %err, "Failed to spawn bridge connection thread");
                    }
                }
                readers.retain(|handle| !handle.is_finished());
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(err) => {
                warn!(error = %err, "Failed to accept bridge connection");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }

    for handle in readers {
        let _ = handle.join();
    }
}

fn handle_connection(
    mut stream: UnixStream,
    hub: &HubSender,
    stop: &AtomicBool,
    counters: &BridgeCounters,
    max_line_bytes: usize,
) {
    if let Err(err) = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_read_timeout(Some(READ_POLL)))
    {
        warn!(error = %err, "Failed to configure bridge connection");
        return;
    }
    debug!("Bridge connection opened");

    let mut lines = LineBuffer::new(max_line_bytes);
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let mut completed = Vec::new();

    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match stream.read(&mut chunk) {
            Ok(0) => {
                lines.finish(&mut completed);
                process_lines(completed.drain(..), hub, counters);
                break;
            }
            Ok(n) => {
                lines.feed(&chunk[..n], &mut completed);
                process_lines(completed.drain(..), hub, counters);
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => {
                debug!(error = %err, "Bridge connection read failed");
                break;
            }
        }
    }
    debug!("Bridge connection closed");
}

fn process_lines<I>(lines: I, hub: &HubSender, counters: &BridgeCounters)
where
    I: IntoIterator<Item = Line>,
{
    for line in lines {
        match decode(line) {
            Ok(None) => {}
            Ok(Some(event)) => {
                counters.events.fetch_add(1, Ordering::Relaxed);
                if !hub.submit(EventSource::Bridge, event) {
                    debug!("Session hub stopped; dropping bridge event");
                }
            }
            Err(err) => {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(code = %err.code, message = %err.message, "Rejected bridge line");
            }
        }
    }
}

fn decode(line: Line) -> Result<Option<companion_core::SessionEvent>, ErrorInfo> {
    let bytes = match line {
        Line::TooLarge { limit } => {
            return Err(ErrorInfo::new(
                "line_too_large",
                format!("line exceeds {} bytes", limit),
            ))
        }
        Line::Complete(bytes) => bytes,
    };
    let text = String::from_utf8(bytes)
        .map_err(|_| ErrorInfo::new("invalid_utf8", "line is not valid UTF-8"))?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    decode_line(&text).map(Some)
}

#[derive(Debug, PartialEq, Eq)]
enum Line {
    Complete(Vec<u8>),
    TooLarge { limit: usize },
}

/// Splits a byte stream into newline-terminated lines without ever holding
/// more than `max` bytes of a single line.
struct LineBuffer {
    buf: Vec<u8>,
    max: usize,
    discarding: bool,
}

impl LineBuffer {
    fn new(max: usize) -> Self {
        Self {
            buf: Vec::new(),
            max: max.max(1),
            discarding: false,
        }
    }

    fn feed(&mut self, mut bytes: &[u8], out: &mut Vec<Line>) {
        while let Some(pos) = bytes.iter().position(|byte| *byte == b'\n') {
            self.push(&bytes[..pos]);
            out.push(self.take_line());
            bytes = &bytes[pos + 1..];
        }
        self.push(bytes);
    }

    /// Flushes an unterminated final line at end of stream.
    fn finish(&mut self, out: &mut Vec<Line>) {
        if self.discarding || !self.buf.is_empty() {
            out.push(self.take_line());
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        if self.discarding {
            return;
        }
        if self.buf.len() + bytes.len() > self.max {
            self.discarding = true;
            self.buf = Vec::new();
        } else {
            self.buf.extend_from_slice(bytes);
        }
    }

    fn take_line(&mut self) -> Line {
        if self.discarding {
            self.discarding = false;
            Line::TooLarge { limit: self.max }
        } else {
            Line::Complete(std::mem::take(&mut self.buf))
        }
    }
}
