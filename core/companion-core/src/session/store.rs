//! Owner of all live session records.
//!
//! Ended sessions stay in the map for a grace window so late tool events
//! from a slower transport are recognised and dropped instead of
//! resurrecting the session. Sessions that stop receiving events are
//! evicted after an inactivity timeout; the agent can die without sending
//! `SessionEnd`.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use companion_bridge_protocol::SessionEvent;

use super::reducer::{reduce_session, SessionUpdate, SkipReason};
use super::state::{EventSource, SessionState};

const DEFAULT_ENDED_GRACE_SECS: i64 = 60;
const DEFAULT_INACTIVITY_TIMEOUT_SECS: i64 = 30 * 60;
const DEFAULT_TOOL_HISTORY_LIMIT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub ended_grace: Duration,
    /// `None` keeps idle sessions until they end.
    pub inactivity_timeout: Option<Duration>,
    pub tool_history_limit: usize,
}

impl StoreLimits {
    pub fn from_secs(
        ended_grace_secs: u64,
        inactivity_timeout_secs: u64,
        tool_history_limit: usize,
    ) -> Self {
        let to_duration = |secs: u64| {
            Duration::from_std(StdDuration::from_secs(secs))
                .unwrap_or_else(|_| Duration::days(365))
        };
        Self {
            ended_grace: to_duration(ended_grace_secs),
            inactivity_timeout: (inactivity_timeout_secs > 0)
                .then(|| to_duration(inactivity_timeout_secs)),
            tool_history_limit: tool_history_limit.max(1),
        }
    }
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            ended_grace: Duration::seconds(DEFAULT_ENDED_GRACE_SECS),
            inactivity_timeout: Some(Duration::seconds(DEFAULT_INACTIVITY_TIMEOUT_SECS)),
            tool_history_limit: DEFAULT_TOOL_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub applied: u64,
    pub dropped_foreign: u64,
    pub dropped_ended: u64,
    pub dropped_unknown: u64,
    pub evicted: u64,
}

#[derive(Debug, Default)]
pub struct SessionStateStore {
    sessions: HashMap<String, SessionState>,
    limits: StoreLimits,
    stats: StoreStats,
}

impl SessionStateStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            sessions: HashMap::new(),
            limits,
            stats: StoreStats::default(),
        }
    }

    pub fn apply(
        &mut self,
        source: EventSource,
        event: &SessionEvent,
        now: DateTime<Utc>,
    ) -> ApplyOutcome {
        let session_id = event.session_id();
        if self
            .sessions
            .get(session_id)
            .is_some_and(|state| self.grace_expired(state, now))
        {
            self.sessions.remove(session_id);
        }

        let current = self.sessions.get(session_id);
        let existed = current.is_some();
        match reduce_session(current, event, source, now, self.limits.tool_history_limit) {
            SessionUpdate::Upsert(state) => {
                self.stats.applied += 1;
                if !existed {
                    info!(
                        session_id = %state.session_id,
                        source = source.as_str(),
                        "Session tracked"
                    );
                }
                self.sessions.insert(state.session_id.clone(), state);
                if existed {
                    ApplyOutcome::Updated
                } else {
                    ApplyOutcome::Created
                }
            }
            SessionUpdate::Skip(reason) => {
                match reason {
                    SkipReason::ForeignSource => self.stats.dropped_foreign += 1,
                    SkipReason::AlreadyEnded => self.stats.dropped_ended += 1,
                    SkipReason::UnknownEvent => self.stats.dropped_unknown += 1,
                }
                debug!(
                    session_id = %session_id,
                    source = source.as_str(),
                    event = event.kind().as_str(),
                    reason = ?reason,
                    "Event dropped"
                );
                ApplyOutcome::Skipped(reason)
            }
        }
    }

    /// Evicts ended sessions past their grace window and sessions idle past
    /// the inactivity timeout. Returns evicted ids.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let limits = self.limits;
        let mut evicted: Vec<String> = self
            .sessions
            .values()
            .filter(|state| {
                if state.is_ended() {
                    state
                        .ended_at
                        .is_some_and(|ended_at| now - ended_at >= limits.ended_grace)
                } else {
                    limits
                        .inactivity_timeout
                        .is_some_and(|timeout| now - state.last_updated >= timeout)
                }
            })
            .map(|state| state.session_id.clone())
            .collect();
        evicted.sort();

        for session_id in &evicted {
            self.sessions.remove(session_id);
            info!(session_id = %session_id, "Session evicted");
        }
        self.stats.evicted += evicted.len() as u64;
        evicted
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionState> {
        self.sessions.get(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// All tracked sessions, most recently updated first.
    pub fn snapshot(&self) -> Vec<SessionState> {
        let mut sessions: Vec<SessionState> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| {
            b.last_updated
                .cmp(&a.last_updated)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        sessions
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    fn grace_expired(&self, state: &SessionState, now: DateTime<Utc>) -> bool {
        state.is_ended()
            && state
                .ended_at
                .is_some_and(|ended_at| now - ended_at >= self.limits.ended_grace)
    }
}
