//! Debounced reload of the effective configuration.
//!
//! Watches the parent directory of every candidate layer file (files that do
//! not exist yet can only be observed through their directory). Bursts of
//! events are coalesced; once the burst has been quiet for the debounce
//! window the configuration is resolved again and handed to the callback.
//! Directories that appear later (`.A/`) are picked up on the next reload.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::error::{CompanionError, Result};

use super::resolver::{ConfigResolver, ResolvedConfig};

const IDLE_WAIT: Duration = Duration::from_secs(1);

enum WatchMessage {
    Fs(notify::Result<Event>),
    Stop,
}

pub struct ConfigWatcher {
    tx: Sender<WatchMessage>,
    thread: Option<JoinHandle<()>>,
}

impl ConfigWatcher {
    pub fn start<F>(
        resolver: ConfigResolver,
        project_root: Option<PathBuf>,
        debounce: Duration,
        on_change: F,
    ) -> Result<Self>
    where
        F: FnMut(Option<ResolvedConfig>) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let fs_tx = tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = fs_tx.send(WatchMessage::Fs(res));
        })
        .map_err(|source| CompanionError::Watch {
            path: project_root.clone().unwrap_or_default(),
            source,
        })?;

        let candidates = resolver.watch_paths(project_root.as_deref());
        let mut watched = HashSet::new();
        watch_parents(&mut watcher, &candidates, &mut watched);

        let thread = thread::Builder::new()
            .name("config-watcher".to_string())
            .spawn(move || {
                run_loop(
                    watcher,
                    rx,
                    resolver,
                    project_root,
                    candidates,
                    watched,
                    debounce,
                    on_change,
                )
            })
            .map_err(|source| CompanionError::Spawn {
                name: "config-watcher".to_string(),
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

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[allow(clippy::too_many_arguments)]
fn run_loop<F>(
    mut watcher: RecommendedWatcher,
    rx: mpsc::Receiver<WatchMessage>,
    resolver: ConfigResolver,
    project_root: Option<PathBuf>,
    candidates: Vec<PathBuf>,
    mut watched: HashSet<PathBuf>,
    debounce: Duration,
    mut on_change: F,
) where
    F: FnMut(Option<ResolvedConfig>),
{
    let mut deadline: Option<Instant> = None;

    loop {
        let timeout = deadline
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_WAIT);

        match rx.recv_timeout(timeout) {
            Ok(WatchMessage::Fs(Ok(event))) => {
                if is_relevant(&event, &candidates) {
                    debug!(paths = ?event.paths, "Config change observed");
                    deadline = Some(Instant::now() + debounce);
                }
            }
            Ok(WatchMessage::Fs(Err(err))) => {
                warn!(error = %err, "Config watcher error");
            }
            Ok(WatchMessage::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if deadline.is_some_and(|at| Instant::now() >= at) {
            deadline = None;
            watch_parents(&mut watcher, &candidates, &mut watched);
            let resolved = resolver.resolve(project_root.as_deref());
            info!(
                layers = resolved.as_ref().map_or(0, |r| r.layers.len()),
                "Configuration reloaded"
            );
            on_change(resolved);
        }
    }
}

fn watch_parents(
    watcher: &mut RecommendedWatcher,
    candidates: &[PathBuf],
    watched: &mut HashSet<PathBuf>,
) {
    for dir in candidates.iter().filter_map(|path| path.parent()) {
        if watched.contains(dir) || !dir.is_dir() {
            continue;
        }
        match watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => {
                watched.insert(dir.to_path_buf());
            }
            Err(err) => warn!(path = %dir.display(), error = %err, "Failed to watch config dir"),
        }
    }
}

fn is_relevant(event: &Event, candidates: &[PathBuf]) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    event.paths.iter().any(|path| {
        candidates
            .iter()
            .any(|candidate| candidate == path || candidate.parent() == Some(path.as_path()))
            || candidates.iter().any(|candidate| same_file_name(candidate, path))
    })
}

// Some backends report canonicalized paths (/private/var vs /var on macOS).
fn same_file_name(candidate: &Path, observed: &Path) -> bool {
    candidate.file_name().is_some()
        && candidate.file_name() == observed.file_name()
        && candidate.parent().and_then(Path::file_name)
            == observed.parent().and_then(Path::file_name)
}
