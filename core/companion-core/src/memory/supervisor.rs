//! Polling loop that watches the agent's memory footprint.
//!
//! Each tick re-runs discovery (the agent may have restarted under a new
//! pid), samples memory, records it, reports the reading, and reports a
//! threshold transition only when the tier changed since the previous tick.
//!
//! Losing the target resets history and tier silently: a missing process is
//! a neutral state, not a memory emergency. A pid change is treated the same
//! way before the new process is tracked.
//!
//! [`MemorySupervisor::start`] moves the supervisor onto its own thread.
//! Callbacks run on a second dispatcher thread fed by an unbounded channel,
//! so a slow observer never delays the next sample. Stopping discards
//! notices the observer has not received yet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{CompanionError, Result};
use crate::process::{find_target, MemorySampler, ProcessEnumerator, ProcessRecord, TargetMatcher};

use super::history::{MemorySample, MemoryStats, SampleHistory};
use super::threshold::{ThresholdState, ThresholdTracker, ThresholdTransition, Thresholds};

const DEFAULT_INTERVAL_SECS: u64 = 5;
const DEFAULT_HISTORY_CAPACITY: usize = 720; // one hour at the default interval

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupervisorConfig {
    pub interval: Duration,
    pub thresholds: Thresholds,
    pub history_capacity: usize,
}

impl SupervisorConfig {
    pub fn new(interval_secs: f64, warning_mb: u64, critical_mb: u64) -> Result<Self> {
        let interval = Duration::try_from_secs_f64(interval_secs)
            .ok()
            .filter(|interval| !interval.is_zero())
            .ok_or_else(|| {
                CompanionError::InvalidSettings(format!(
                    "interval_secs must be a positive duration, got {}",
                    interval_secs
                ))
            })?;
        Ok(Self {
            interval,
            thresholds: Thresholds::new(warning_mb, critical_mb)?,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        })
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            thresholds: Thresholds::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// One tick's result, delivered to observers on every sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryReading {
    pub pid: u32,
    pub memory_mb: u64,
    /// False when the sampler returned 0 (exited, permission denied, ...).
    pub available: bool,
    pub timestamp: DateTime<Utc>,
    pub state: ThresholdState,
    pub stats: MemoryStats,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorNotice {
    TargetChanged(Option<ProcessRecord>),
    Sample(MemoryReading),
    Transition(ThresholdTransition),
}

pub trait SupervisorObserver: Send + 'static {
    fn on_sample(&self, reading: &MemoryReading);

    fn on_transition(&self, transition: &ThresholdTransition);

    fn on_target_changed(&self, _target: Option<&ProcessRecord>) {}
}

pub struct MemorySupervisor<E, S> {
    enumerator: E,
    sampler: S,
    matcher: TargetMatcher,
    config: SupervisorConfig,
    history: SampleHistory,
    tracker: ThresholdTracker,
    target: Option<ProcessRecord>,
}

impl<E: ProcessEnumerator, S: MemorySampler> MemorySupervisor<E, S> {
    pub fn new(
        enumerator: E,
        sampler: S,
        matcher: TargetMatcher,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            enumerator,
            sampler,
            matcher,
            history: SampleHistory::new(config.history_capacity),
            tracker: ThresholdTracker::new(),
            target: None,
            config,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn history(&self) -> &SampleHistory {
        &self.history
    }

    pub fn state(&self) -> ThresholdState {
        self.tracker.state()
    }

    pub fn target(&self) -> Option<&ProcessRecord> {
        self.target.as_ref()
    }

    /// Runs one discovery + sample + evaluate pass.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<SupervisorNotice> {
        let mut notices = Vec::new();

        let Some(target) = find_target(&self.enumerator, &self.matcher) else {
            if let Some(previous) = self.target.take() {
                info!(pid = previous.pid, "Agent process no longer running; memory history reset");
                self.reset();
                notices.push(SupervisorNotice::TargetChanged(None));
            }
            return notices;
        };

        let changed = self.target.as_ref().map(|current| current.pid) != Some(target.pid);
        if changed {
            if let Some(previous) = self.target.as_ref() {
                info!(
                    previous_pid = previous.pid,
                    pid = target.pid,
                    "Agent process restarted; memory history reset"
                );
                self.reset();
            } else {
                info!(pid = target.pid, name = %target.name, "Agent process found");
            }
            notices.push(SupervisorNotice::TargetChanged(Some(target.clone())));
        }

        let pid = target.pid;
        self.target = Some(target);

        let memory_mb = self.sampler.sample_mb(pid);
        let available = memory_mb > 0;
        let mut transition = None;

        if available {
            self.history.push(MemorySample {
                timestamp: now,
                memory_mb,
            });
            transition = self.tracker.observe(&self.config.thresholds, memory_mb);
        } else {
            debug!(pid, "Memory sample unavailable");
        }

        notices.push(SupervisorNotice::Sample(MemoryReading {
            pid,
            memory_mb,
            available,
            timestamp: now,
            state: self.tracker.state(),
            stats: self.history.stats(),
        }));

        if let Some((from, to)) = transition {
            log_transition(pid, from, to, memory_mb);
            notices.push(SupervisorNotice::Transition(ThresholdTransition {
                pid,
                from,
                to,
                memory_mb,
                at: now,
            }));
        }

        notices
    }

    fn reset(&mut self) {
        self.history.clear();
        self.tracker.reset();
    }
}

impl<E, S> MemorySupervisor<E, S>
where
    E: ProcessEnumerator + 'static,
    S: MemorySampler + 'static,
{
    /// Moves the supervisor onto a polling thread and returns its handle.
    pub fn start<O: SupervisorObserver>(mut self, observer: O) -> Result<SupervisorHandle> {
        let (notice_tx, notice_rx) = mpsc::channel::<SupervisorNotice>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let stopping = Arc::new(AtomicBool::new(false));

        let dispatch_stopping = Arc::clone(&stopping);
        let dispatcher = thread::Builder::new()
            .name("memory-dispatch".to_string())
            .spawn(move || {
                for notice in notice_rx {
                    if dispatch_stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    dispatch(&observer, &notice);
                }
            })
            .map_err(|source| CompanionError::Spawn {
                name: "memory-dispatch".to_string(),
                source,
            })?;

        let interval = self.config.interval;
        let poller = thread::Builder::new()
            .name("memory-supervisor".to_string())
            .spawn(move || loop {
                let next_tick = Instant::now() + interval;
                for notice in self.tick(Utc::now()) {
                    if notice_tx.send(notice).is_err() {
                        return;
                    }
                }
                let wait = next_tick.saturating_duration_since(Instant::now());
                match stop_rx.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            })
            .map_err(|source| CompanionError::Spawn {
                name: "memory-supervisor".to_string(),
                source,
            })?;

        info!(interval_ms = interval.as_millis() as u64, "Memory supervisor started");

        Ok(SupervisorHandle {
            stopping,
            stop_tx: Some(stop_tx),
            poller: Some(poller),
            dispatcher: Some(dispatcher),
        })
    }
}

fn dispatch<O: SupervisorObserver>(observer: &O, notice: &SupervisorNotice) {
    match notice {
        SupervisorNotice::TargetChanged(target) => observer.on_target_changed(target.as_ref()),
        SupervisorNotice::Sample(reading) => observer.on_sample(reading),
        SupervisorNotice::Transition(transition) => observer.on_transition(transition),
    }
}

fn log_transition(pid: u32, from: ThresholdState, to: ThresholdState, memory_mb: u64) {
    match to {
        ThresholdState::Critical => {
            error!(pid, memory_mb, from = from.as_str(), "Agent memory critical")
        }
        ThresholdState::Warning => {
            warn!(pid, memory_mb, from = from.as_str(), "Agent memory warning")
        }
        ThresholdState::Normal => {
            info!(pid, memory_mb, from = from.as_str(), "Agent memory back to normal")
        }
    }
}

/// Owns the supervisor threads. Dropping the handle stops them.
pub struct SupervisorHandle {
    stopping: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    poller: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl SupervisorHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(poller) = self.poller.take() {
            if poller.join().is_err() {
                warn!("Memory supervisor thread panicked");
            }
        }
        // At most the callback already in flight finishes; the backlog is dropped.
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                warn!("Memory dispatch thread panicked");
            }
        }
        debug!("Memory supervisor stopped");
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
