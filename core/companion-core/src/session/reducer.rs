//! Pure event fold: `(current state, event) -> update`.
//!
//! Events can be lost or reordered across transports, so every handler
//! tolerates a missing predecessor:
//!
//! - `PreToolUse` / `PostToolUse` for an unseen session synthesize it
//! - a second `SessionStart` refreshes cwd/pid/tty instead of resetting
//! - a `PostToolUse` whose id does not match the active tool still clears it
//! - `SessionEnd` always lands, even for a session never seen (the record
//!   then suppresses late tool events until the grace window expires)

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use companion_bridge_protocol::SessionEvent;

use super::state::{ActiveTool, EventSource, SessionPhase, SessionState, ToolInvocation};

const TARGET_MAX_CHARS: usize = 120;
const TARGET_KEYS: &[&str] = &["file_path", "path", "command", "url", "pattern", "query"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnknownEvent,
    /// The session belongs to the other transport.
    ForeignSource,
    /// Tool events after `SessionEnd`, or a repeated `SessionEnd`.
    AlreadyEnded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum SessionUpdate {
    Upsert(SessionState),
    Skip(SkipReason),
}

pub fn reduce_session(
    current: Option<&SessionState>,
    event: &SessionEvent,
    source: EventSource,
    now: DateTime<Utc>,
    tool_history_limit: usize,
) -> SessionUpdate {
    if let SessionEvent::Unknown { .. } = event {
        return SessionUpdate::Skip(SkipReason::UnknownEvent);
    }

    if let Some(current) = current {
        if current.source != source && !is_takeover(current, event, source) {
            return SessionUpdate::Skip(SkipReason::ForeignSource);
        }
        if current.is_ended() && !matches!(event, SessionEvent::SessionStart { .. }) {
            return SessionUpdate::Skip(SkipReason::AlreadyEnded);
        }
    }

    // An ended session that starts again is a fresh session with the same id.
    let current = current.filter(|state| !state.is_ended());
    let mut next = current
        .cloned()
        .unwrap_or_else(|| SessionState::new(event.session_id(), source, now));
    next.source = source;
    next.last_updated = now;
    next.last_event = event.kind().as_str().to_string();
    if let Some(cwd) = event.cwd() {
        next.cwd = Some(cwd.to_string());
    }

    match event {
        SessionEvent::SessionStart { pid, tty, .. } => {
            if pid.is_some() {
                next.pid = *pid;
            }
            if tty.is_some() {
                next.tty = tty.clone();
            }
        }
        SessionEvent::PreToolUse {
            tool_name,
            tool_use_id,
            tool_input,
            ..
        } => {
            next.phase = SessionPhase::RunningTool;
            next.active_tool = Some(ActiveTool {
                name: tool_name.clone(),
                tool_use_id: tool_use_id.clone(),
                target: tool_input.as_ref().and_then(summarize_target),
                started_at: now,
            });
            next.tool_history.push_back(ToolInvocation {
                name: tool_name.clone(),
                tool_use_id: tool_use_id.clone(),
                started_at: now,
                finished_at: None,
            });
            while next.tool_history.len() > tool_history_limit.max(1) {
                next.tool_history.pop_front();
            }
        }
        SessionEvent::PostToolUse {
            tool_name,
            tool_use_id,
            ..
        } => {
            if let Some(active) = &next.active_tool {
                if tool_use_id.is_some() && active.tool_use_id != *tool_use_id {
                    debug!(
                        session_id = %next.session_id,
                        active = ?active.tool_use_id,
                        finished = ?tool_use_id,
                        "PostToolUse does not match active tool; clearing anyway"
                    );
                }
            }
            finish_invocation(&mut next, tool_name, tool_use_id.as_deref(), now);
            next.phase = SessionPhase::Idle;
            next.active_tool = None;
        }
        SessionEvent::SessionEnd { .. } => {
            next.phase = SessionPhase::Ended;
            next.active_tool = None;
            next.ended_at = Some(now);
        }
        SessionEvent::Unknown { .. } => {}
    }

    SessionUpdate::Upsert(next)
}

/// A bridge `SessionStart` claims a session first seen in a transcript: the
/// push channel is authoritative once it shows up.
fn is_takeover(current: &SessionState, event: &SessionEvent, source: EventSource) -> bool {
    source == EventSource::Bridge
        && current.source == EventSource::Transcript
        && matches!(event, SessionEvent::SessionStart { .. })
}

fn finish_invocation(
    state: &mut SessionState,
    tool_name: &str,
    tool_use_id: Option<&str>,
    now: DateTime<Utc>,
) {
    let open = state.tool_history.iter_mut().rev().find(|invocation| {
        invocation.finished_at.is_none()
            && match tool_use_id {
                Some(id) => invocation.tool_use_id.as_deref() == Some(id),
                None => invocation.name == tool_name,
            }
    });
    if let Some(invocation) = open {
        invocation.finished_at = Some(now);
    }
}

fn summarize_target(input: &Value) -> Option<String> {
    let object = input.as_object()?;
    let text = TARGET_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))?;
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text.chars().count() <= TARGET_MAX_CHARS {
        return Some(text.to_string());
    }
    let truncated: String = text.chars().take(TARGET_MAX_CHARS - 1).collect();
    Some(format!("{}…", truncated))
}
