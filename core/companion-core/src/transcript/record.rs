//! Transcript record decoding.
//!
//! Each line is one JSON record. The first readable record of a file opens
//! the session; `tool_use` and `tool_result` content blocks become
//! `PreToolUse` / `PostToolUse`; a `{"type":"session_end"}` record closes it.
//! Tool results only carry the invocation id, so names are remembered from
//! the matching `tool_use`.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use companion_bridge_protocol::{SessionEvent, UNKNOWN_TOOL};

const REMEMBERED_TOOL_NAMES: usize = 256;
const SESSION_ID_KEYS: &[&str] = &["sessionId", "session_id"];

/// Decoding state for one transcript file.
#[derive(Debug, Clone)]
pub struct TranscriptSession {
    fallback_id: String,
    session_id: Option<String>,
    started: bool,
    tool_names: HashMap<String, String>,
    tool_order: VecDeque<String>,
}

impl TranscriptSession {
    pub fn for_path(path: &Path) -> Self {
        let fallback_id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "transcript".to_string());
        Self::with_fallback_id(fallback_id)
    }

    pub fn with_fallback_id(fallback_id: impl Into<String>) -> Self {
        Self {
            fallback_id: fallback_id.into(),
            session_id: None,
            started: false,
            tool_names: HashMap::new(),
            tool_order: VecDeque::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        self.session_id.as_deref().unwrap_or(&self.fallback_id)
    }

    pub fn events_from_line(&mut self, line: &str) -> Vec<SessionEvent> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        let record: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                debug!(session_id = %self.session_id(), error = %err, "Skipping unreadable transcript line");
                return Vec::new();
            }
        };
        self.events_from_record(&record)
    }

    pub fn events_from_record(&mut self, record: &Value) -> Vec<SessionEvent> {
        if !record.is_object() {
            return Vec::new();
        }
        if let Some(id) = string_field(record, SESSION_ID_KEYS) {
            if self.session_id.as_deref() != Some(id) {
                self.session_id = Some(id.to_string());
            }
        }
        let session_id = self.session_id().to_string();
        let cwd = string_field(record, &["cwd"]).map(str::to_string);

        let mut events = Vec::new();
        if !self.started {
            self.started = true;
            events.push(SessionEvent::SessionStart {
                session_id: session_id.clone(),
                cwd: cwd.clone(),
                pid: None,
                tty: None,
            });
        }

        if record.get("type").and_then(Value::as_str) == Some("session_end") {
            events.push(SessionEvent::SessionEnd { session_id });
            return events;
        }

        let blocks = record
            .get("message")
            .and_then(|message| message.get("content"))
            .and_then(Value::as_array);
        for block in blocks.into_iter().flatten() {
            match block.get("type").and_then(Value::as_str) {
                Some("tool_use") => {
                    let tool_name = string_field(block, &["name"]).unwrap_or(UNKNOWN_TOOL);
                    let tool_use_id = string_field(block, &["id"]).map(str::to_string);
                    if let Some(id) = &tool_use_id {
                        self.remember_tool(id, tool_name);
                    }
                    events.push(SessionEvent::PreToolUse {
                        session_id: session_id.clone(),
                        cwd: cwd.clone(),
                        tool_name: tool_name.to_string(),
                        tool_use_id,
                        tool_input: block.get("input").cloned(),
                    });
                }
                Some("tool_result") => {
                    let tool_use_id = string_field(block, &["tool_use_id"]).map(str::to_string);
                    let tool_name = tool_use_id
                        .as_deref()
                        .and_then(|id| self.tool_names.get(id))
                        .cloned()
                        .unwrap_or_else(|| UNKNOWN_TOOL.to_string());
                    events.push(SessionEvent::PostToolUse {
                        session_id: session_id.clone(),
                        cwd: cwd.clone(),
                        tool_name,
                        tool_use_id,
                    });
                }
                _ => {}
            }
        }

        events
    }

    fn remember_tool(&mut self, id: &str, name: &str) {
        if self.tool_names.insert(id.to_string(), name.to_string()).is_none() {
            self.tool_order.push_back(id.to_string());
        }
        while self.tool_order.len() > REMEMBERED_TOOL_NAMES {
            if let Some(oldest) = self.tool_order.pop_front() {
                self.tool_names.remove(&oldest);
            }
        }
    }
}

fn string_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .filter(|text| !text.is_empty())
}
