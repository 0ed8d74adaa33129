//! Single-writer owner of session state.
//!
//! Both transports submit into one channel; one thread applies events in
//! arrival order and periodically sweeps expired sessions. Readers take a
//! snapshot under the lock and never block the applier for long.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use companion_core::session::{StoreLimits, StoreStats};
use companion_core::{EventSource, SessionEvent, SessionState, SessionStateStore};

enum HubMessage {
    Event {
        source: EventSource,
        event: SessionEvent,
    },
    Stop,
}

/// Cloneable submission handle given to each transport.
#[derive(Clone)]
pub struct HubSender {
    tx: Sender<HubMessage>,
}

impl HubSender {
    /// Returns false once the hub has stopped.
    pub fn submit(&self, source: EventSource, event: SessionEvent) -> bool {
        self.tx.send(HubMessage::Event { source, event }).is_ok()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionsStatus {
    pub sessions: Vec<SessionState>,
    pub stats: StoreStats,
}

pub struct SessionHub {
    store: Arc<Mutex<SessionStateStore>>,
    tx: Sender<HubMessage>,
    thread: Option<JoinHandle<()>>,
}

impl SessionHub {
    pub fn start(limits: StoreLimits, sweep_interval: Duration) -> std::io::Result<Self> {
        let store = Arc::new(Mutex::new(SessionStateStore::new(limits)));
        let (tx, rx) = mpsc::channel::<HubMessage>();

        let applier_store = Arc::clone(&store);
        let thread = thread::Builder::new()
            .name("session-hub".to_string())
            .spawn(move || {
                let mut next_sweep = Instant::now() + sweep_interval;
                loop {
                    let wait = next_sweep.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(wait) {
                        Ok(HubMessage::Event { source, event }) => {
                            let outcome = lock(&applier_store).apply(source, &event, Utc::now());
                            debug!(
                                session_id = %event.session_id(),
                                event = event.kind().as_str(),
                                source = source.as_str(),
                                outcome = ?outcome,
                                "Session event applied"
                            );
                        }
                        Ok(HubMessage::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    if Instant::now() >= next_sweep {
                        lock(&applier_store).sweep(Utc::now());
                        next_sweep = Instant::now() + sweep_interval;
                    }
                }
                info!("Session hub stopped");
            })?;

        Ok(Self {
            store,
            tx,
            thread: Some(thread),
        })
    }

    pub fn sender(&self) -> HubSender {
        HubSender {
            tx: self.tx.clone(),
        }
    }

    pub fn snapshot(&self) -> SessionsStatus {
        let store = lock(&self.store);
        SessionsStatus {
            sessions: store.snapshot(),
            stats: store.stats(),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.tx.send(HubMessage::Stop);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SessionHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock(store: &Mutex<SessionStateStore>) -> MutexGuard<'_, SessionStateStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_core::SessionPhase;

    fn wait_for<F: Fn(&SessionsStatus) -> bool>(hub: &SessionHub, check: F) -> SessionsStatus {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let status = hub.snapshot();
            if check(&status) || Instant::now() >= deadline {
                return status;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn applies_events_from_any_sender_clone() {
        let hub = SessionHub::start(StoreLimits::default(), Duration::from_secs(60)).unwrap();
        let bridge = hub.sender();
        let transcript = hub.sender();

        assert!(bridge.submit(
            EventSource::Bridge,
            SessionEvent::SessionStart {
                session_id: "b".to_string(),
                cwd: None,
                pid: None,
                tty: None,
            },
        ));
        assert!(transcript.submit(
            EventSource::Transcript,
            SessionEvent::PreToolUse {
                session_id: "t".to_string(),
                cwd: None,
                tool_name: "Read".to_string(),
                tool_use_id: None,
                tool_input: None,
            },
        ));

        let status = wait_for(&hub, |status| status.sessions.len() == 2);
        assert_eq!(status.sessions.len(), 2);
        let t = status
            .sessions
            .iter()
            .find(|s| s.session_id == "t")
            .unwrap();
        assert_eq!(t.phase, SessionPhase::RunningTool);
        assert_eq!(t.source, EventSource::Transcript);
        hub.stop();
    }

    #[test]
    fn sweeper_evicts_ended_sessions() {
        let limits = StoreLimits::from_secs(0, 0, 8);
        let hub = SessionHub::start(limits, Duration::from_millis(20)).unwrap();
        hub.sender().submit(
            EventSource::Bridge,
            SessionEvent::SessionEnd {
                session_id: "gone".to_string(),
            },
        );

        let status = wait_for(&hub, |status| status.stats.evicted == 1);
        assert!(status.sessions.is_empty());
        assert_eq!(status.stats.evicted, 1);
    }

    #[test]
    fn submit_fails_after_stop() {
        let hub = SessionHub::start(StoreLimits::default(), Duration::from_secs(60)).unwrap();
        let sender = hub.sender();
        hub.stop();
        assert!(!sender.submit(
            EventSource::Bridge,
            SessionEvent::SessionEnd {
                session_id: "x".to_string(),
            },
        ));
    }
}
