use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Starting,
    Idle,
    RunningTool,
    Ended,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Starting => "starting",
            SessionPhase::Idle => "idle",
            SessionPhase::RunningTool => "running_tool",
            SessionPhase::Ended => "ended",
        }
    }
}

/// Which transport delivered an event. A session is owned by the transport
/// that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Bridge,
    Transcript,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Bridge => "bridge",
            EventSource::Transcript => "transcript",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveTool {
    pub name: String,
    pub tool_use_id: Option<String>,
    /// Short human-readable target pulled from the tool input (a path, a
    /// command), when one is recognisable.
    pub target: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolInvocation {
    pub name: String,
    pub tool_use_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub session_id: String,
    pub phase: SessionPhase,
    pub source: EventSource,
    pub cwd: Option<String>,
    pub pid: Option<u32>,
    pub tty: Option<String>,
    pub active_tool: Option<ActiveTool>,
    /// Most recent invocations, oldest first.
    pub tool_history: VecDeque<ToolInvocation>,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_event: String,
}

impl SessionState {
    pub(crate) fn new(session_id: &str, source: EventSource, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            phase: SessionPhase::Starting,
            source,
            cwd: None,
            pid: None,
            tty: None,
            active_tool: None,
            tool_history: VecDeque::new(),
            started_at: now,
            last_updated: now,
            ended_at: None,
            last_event: String::new(),
        }
    }

    pub fn is_ended(&self) -> bool {
        self.phase == SessionPhase::Ended
    }
}
