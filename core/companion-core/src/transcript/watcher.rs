//! Recursive watch over the transcript directory.
//!
//! Files present at startup are tailed from their current end, so their
//! history is never replayed. The first record appended afterwards opens the
//! session with a synthesized SessionStart. Files created afterwards are read
//! from the beginning.
//!
//! Change notifications only mark a file dirty. Dirty files are read one
//! debounce window after the first change of a burst, so a chatty writer
//! costs one read per window instead of one per append and can never
//! postpone reads indefinitely.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use companion_bridge_protocol::SessionEvent;

use crate::error::{CompanionError, Result};

use super::record::TranscriptSession;
use super::tail::FileTail;

const IDLE_WAIT: Duration = Duration::from_secs(1);
const DEFAULT_DEBOUNCE_MS: u64 = 250;
const DEFAULT_MAX_BATCH_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptWatcherConfig {
    pub root: PathBuf,
    pub debounce: Duration,
    pub max_batch_bytes: usize,
}

impl TranscriptWatcherConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_max_batch_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_bytes = bytes.max(1);
        self
    }
}

enum WatchMessage {
    Fs(notify::Result<Event>),
    Stop,
}

struct TrackedFile {
    tail: FileTail,
    session: TranscriptSession,
}

pub struct TranscriptWatcher {
    tx: Sender<WatchMessage>,
    thread: Option<JoinHandle<()>>,
}

impl TranscriptWatcher {
    /// Starts watching `config.root`, which must exist. Every reconstructed
    /// event is passed to `sink` on the watcher thread.
    pub fn start<F>(config: TranscriptWatcherConfig, sink: F) -> Result<Self>
    where
        F: FnMut(SessionEvent) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let fs_tx = tx.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| {
                let _ = fs_tx.send(WatchMessage::Fs(res));
            })
            .map_err(|source| CompanionError::Watch {
                path: config.root.clone(),
                source,
            })?;
        watcher
            .watch(&config.root, RecursiveMode::Recursive)
            .map_err(|source| CompanionError::Watch {
                path: config.root.clone(),
                source,
            })?;

        let files = bootstrap(&config);
        info!(
            root = %config.root.display(),
            files = files.len(),
            "Transcript watcher started"
        );

        let thread = thread::Builder::new()
            .name("transcript-watcher".to_string())
            .spawn(move || run_loop(watcher, rx, config, files, sink))
            .map_err(|source| CompanionError::Spawn {
                name: "transcript-watcher".to_string(),
                source,
            })?;

        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.tx.send(WatchMessage::Stop);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TranscriptWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn bootstrap(config: &TranscriptWatcherConfig) -> HashMap<PathBuf, TrackedFile> {
    let mut files = HashMap::new();
    for entry in WalkDir::new(&config.root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_transcript(entry.path()))
    {
        let path = entry.into_path();
        match FileTail::at_end(&path, config.max_batch_bytes) {
            Ok(tail) => {
                let session = TranscriptSession::for_path(&path);
                files.insert(path, TrackedFile { tail, session });
            }
            Err(err) => debug!(path = %path.display(), error = %err, "Skipping transcript"),
        }
    }
    files
}

fn run_loop<F>(
    _watcher: RecommendedWatcher,
    rx: Receiver<WatchMessage>,
    config: TranscriptWatcherConfig,
    mut files: HashMap<PathBuf, TrackedFile>,
    mut sink: F,
) where
    F: FnMut(SessionEvent),
{
    let mut dirty: HashSet<PathBuf> = HashSet::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let timeout = deadline
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_WAIT);

        match rx.recv_timeout(timeout) {
            Ok(WatchMessage::Fs(Ok(event))) => {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    let before = dirty.len();
                    dirty.extend(event.paths.into_iter().filter(|p| is_transcript(p)));
                    if dirty.len() > before && deadline.is_none() {
                        deadline = Some(Instant::now() + config.debounce);
                    }
                }
            }
            Ok(WatchMessage::Fs(Err(err))) => warn!(error = %err, "Transcript watcher error"),
            Ok(WatchMessage::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if deadline.is_some_and(|at| Instant::now() >= at) {
            deadline = None;
            let pending: Vec<PathBuf> = dirty.drain().collect();
            for path in pending {
                if drain_file(&mut files, &path, &config, &mut sink) {
                    dirty.insert(path);
                }
            }
            if !dirty.is_empty() {
                deadline = Some(Instant::now());
            }
        }
    }
}

/// Reads one batch from `path`. Returns true when more data is waiting.
fn drain_file<F>(
    files: &mut HashMap<PathBuf, TrackedFile>,
    path: &Path,
    config: &TranscriptWatcherConfig,
    sink: &mut F,
) -> bool
where
    F: FnMut(SessionEvent),
{
    if !path.is_file() {
        if files.remove(path).is_some() {
            debug!(path = %path.display(), "Transcript removed");
        }
        return false;
    }

    let tracked = files.entry(path.to_path_buf()).or_insert_with(|| {
        debug!(path = %path.display(), "New transcript");
        TrackedFile {
            tail: FileTail::from_start(path, config.max_batch_bytes),
            session: TranscriptSession::for_path(path),
        }
    });

    match tracked.tail.read_batch() {
        Ok(read) => {
            for line in &read.lines {
                for event in tracked.session.events_from_line(line) {
                    sink(event);
                }
            }
            read.more
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Failed to read transcript");
            false
        }
    }
}

fn is_transcript(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_bridge_protocol::EventKind as SessionEventKind;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use tempfile::tempdir;

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("open");
        file.write_all(text.as_bytes()).expect("append");
    }

    fn collect_until(rx: &Receiver<SessionEvent>, count: usize) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while events.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        events
    }

    #[test]
    fn new_transcript_is_read_from_start() {
        let root = tempdir().expect("tempdir");
        let (tx, rx) = mpsc::channel();
        let config = TranscriptWatcherConfig::new(root.path()).with_debounce(Duration::from_millis(50));
        let watcher = TranscriptWatcher::start(config, move |event| {
            let _ = tx.send(event);
        })
        .expect("watcher");

        let path = root.path().join("ses_new.jsonl");
        append(
            &path,
            concat!(
                r#"{"type":"user","cwd":"/repo"}"#,
                "\n",
                r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}]}}"#,
                "\n"
            ),
        );

        let events = collect_until(&rx, 2);
        let kinds: Vec<_> = events.iter().map(SessionEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![SessionEventKind::SessionStart, SessionEventKind::PreToolUse]
        );
        assert_eq!(events[0].session_id(), "ses_new");
        watcher.stop();
    }

    #[test]
    fn existing_transcript_opens_on_first_new_record() {
        let root = tempdir().expect("tempdir");
        let nested = root.path().join("project");
        fs::create_dir(&nested).expect("mkdir");
        let path = nested.join("ses_old.jsonl");
        append(&path, "{\"type\":\"user\"}\n{\"type\":\"session_end\"}\n");

        let (tx, rx) = mpsc::channel();
        let config = TranscriptWatcherConfig::new(root.path()).with_debounce(Duration::from_millis(50));
        let watcher = TranscriptWatcher::start(config, move |event| {
            let _ = tx.send(event);
        })
        .expect("watcher");

        append(
            &path,
            "{\"message\":{\"content\":[{\"type\":\"tool_result\",\"tool_use_id\":\"x\"}]}}\n",
        );

        let events = collect_until(&rx, 2);
        let kinds: Vec<_> = events.iter().map(SessionEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![SessionEventKind::SessionStart, SessionEventKind::PostToolUse]
        );
        assert_eq!(events[0].session_id(), "ses_old");
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        watcher.stop();
    }

    #[test]
    fn missing_root_fails_to_start() {
        let root = tempdir().expect("tempdir");
        let config = TranscriptWatcherConfig::new(root.path().join("absent"));
        assert!(TranscriptWatcher::start(config, |_| {}).is_err());
    }
}
