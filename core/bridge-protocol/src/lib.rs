//! Wire protocol for the agent companion's session event bridge.
//!
//! This crate is shared by the bridge server and agent-side emitters to prevent
//! schema drift. Each lifecycle occurrence travels as one self-contained JSON
//! object terminated by `\n`. Field names are snake_case on the wire; decoding
//! turns them into the typed [`SessionEvent`] used in-process.
//!
//! There is no schema version field. The `event` string selects the variant and
//! values this build does not know decode to [`SessionEvent::Unknown`] so newer
//! emitters keep working against older servers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::fmt;
use std::path::PathBuf;

pub const SOCKET_NAME: &str = "agent-companion.sock";
pub const SOCKET_ENV: &str = "COMPANION_BRIDGE_SOCKET";
pub const MAX_LINE_BYTES: usize = 1024 * 1024; // 1MB

/// Rendezvous path for the bridge socket.
///
/// `COMPANION_BRIDGE_SOCKET` wins; otherwise the socket lives in the platform
/// temp directory so emitters can find it without any configuration.
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    env::temp_dir().join(SOCKET_NAME)
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorInfo {}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionStart,
    SessionEnd,
    PreToolUse,
    PostToolUse,
    Unknown(String),
}

impl EventKind {
    pub fn parse(value: &str) -> Self {
        match value {
            "SessionStart" => EventKind::SessionStart,
            "SessionEnd" => EventKind::SessionEnd,
            "PreToolUse" => EventKind::PreToolUse,
            "PostToolUse" => EventKind::PostToolUse,
            other => EventKind::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::SessionStart => "SessionStart",
            EventKind::SessionEnd => "SessionEnd",
            EventKind::PreToolUse => "PreToolUse",
            EventKind::PostToolUse => "PostToolUse",
            EventKind::Unknown(value) => value.as_str(),
        }
    }
}

/// One line on the wire, exactly as emitters write it.
///
/// Every field is optional at this layer so a partially valid message still
/// deserializes and [`WireMessage::into_event`] can report which required
/// field is missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
}

/// Typed lifecycle event reconstructed from a wire line or a transcript record.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SessionStart {
        session_id: String,
        cwd: Option<String>,
        pid: Option<u32>,
        tty: Option<String>,
    },
    SessionEnd {
        session_id: String,
    },
    PreToolUse {
        session_id: String,
        cwd: Option<String>,
        tool_name: String,
        tool_use_id: Option<String>,
        tool_input: Option<Value>,
    },
    PostToolUse {
        session_id: String,
        cwd: Option<String>,
        tool_name: String,
        tool_use_id: Option<String>,
    },
    Unknown {
        session_id: String,
        event: String,
    },
}

pub const UNKNOWN_TOOL: &str = "unknown";

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::SessionStart { session_id, .. }
            | SessionEvent::SessionEnd { session_id }
            | SessionEvent::PreToolUse { session_id, .. }
            | SessionEvent::PostToolUse { session_id, .. }
            | SessionEvent::Unknown { session_id, .. } => session_id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::SessionStart { .. } => EventKind::SessionStart,
            SessionEvent::SessionEnd { .. } => EventKind::SessionEnd,
            SessionEvent::PreToolUse { .. } => EventKind::PreToolUse,
            SessionEvent::PostToolUse { .. } => EventKind::PostToolUse,
            SessionEvent::Unknown { event, .. } => EventKind::Unknown(event.clone()),
        }
    }

    pub fn cwd(&self) -> Option<&str> {
        match self {
            SessionEvent::SessionStart { cwd, .. }
            | SessionEvent::PreToolUse { cwd, .. }
            | SessionEvent::PostToolUse { cwd, .. } => cwd.as_deref(),
            SessionEvent::SessionEnd { .. } | SessionEvent::Unknown { .. } => None,
        }
    }
}

impl WireMessage {
    pub fn into_event(self) -> Result<SessionEvent, ErrorInfo> {
        let session_id = require_string(self.session_id, "session_id")?;
        let event = require_string(self.event, "event")?;
        let cwd = non_empty(self.cwd);

        let decoded = match EventKind::parse(&event) {
            EventKind::SessionStart => SessionEvent::SessionStart {
                session_id,
                cwd,
                pid: self.pid.and_then(valid_pid),
                tty: non_empty(self.tty),
            },
            EventKind::SessionEnd => SessionEvent::SessionEnd { session_id },
            EventKind::PreToolUse => SessionEvent::PreToolUse {
                session_id,
                cwd,
                tool_name: tool_name_or_unknown(self.tool),
                tool_use_id: non_empty(self.tool_use_id),
                tool_input: self.tool_input,
            },
            EventKind::PostToolUse => SessionEvent::PostToolUse {
                session_id,
                cwd,
                tool_name: tool_name_or_unknown(self.tool),
                tool_use_id: non_empty(self.tool_use_id),
            },
            EventKind::Unknown(event) => SessionEvent::Unknown { session_id, event },
        };

        Ok(decoded)
    }
}

impl From<&SessionEvent> for WireMessage {
    fn from(event: &SessionEvent) -> Self {
        let mut message = WireMessage {
            session_id: Some(event.session_id().to_string()),
            cwd: event.cwd().map(str::to_string),
            event: Some(event.kind().as_str().to_string()),
            ..WireMessage::default()
        };

        match event {
            SessionEvent::SessionStart { pid, tty, .. } => {
                message.pid = pid.map(i64::from);
                message.tty = tty.clone();
            }
            SessionEvent::PreToolUse {
                tool_name,
                tool_use_id,
                tool_input,
                ..
            } => {
                message.tool = Some(tool_name.clone());
                message.tool_use_id = tool_use_id.clone();
                message.tool_input = tool_input.clone();
            }
            SessionEvent::PostToolUse {
                tool_name,
                tool_use_id,
                ..
            } => {
                message.tool = Some(tool_name.clone());
                message.tool_use_id = tool_use_id.clone();
            }
            SessionEvent::SessionEnd { .. } | SessionEvent::Unknown { .. } => {}
        }

        message
    }
}

/// Decodes a single wire line (without or with its trailing newline).
pub fn decode_line(line: &str) -> Result<SessionEvent, ErrorInfo> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ErrorInfo::new("empty_line", "line was empty"));
    }
    if trimmed.len() > MAX_LINE_BYTES {
        return Err(ErrorInfo::new(
            "line_too_large",
            "line exceeded maximum size",
        ));
    }

    let message: WireMessage = serde_json::from_str(trimmed).map_err(|err| {
        ErrorInfo::new("invalid_json", format!("line was not valid JSON: {}", err))
    })?;
    message.into_event()
}

/// Encodes an event as one newline-terminated wire line.
pub fn encode_line(event: &SessionEvent) -> Result<String, ErrorInfo> {
    let message = WireMessage::from(event);
    let mut line = serde_json::to_string(&message).map_err(|err| {
        ErrorInfo::new(
            "serialization_error",
            format!("failed to serialize event: {}", err),
        )
    })?;
    line.push('\n');
    Ok(line)
}

fn require_string(value: Option<String>, field: &str) -> Result<String, ErrorInfo> {
    match value {
        Some(candidate) if !candidate.trim().is_empty() => Ok(candidate),
        _ => Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        )),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|candidate| !candidate.trim().is_empty())
}

fn valid_pid(pid: i64) -> Option<u32> {
    u32::try_from(pid).ok().filter(|pid| *pid > 0)
}

fn tool_name_or_unknown(tool: Option<String>) -> String {
    non_empty(tool).unwrap_or_else(|| UNKNOWN_TOOL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_session_start() {
        let line = r#"{"session_id":"s-1","cwd":"/repo","event":"SessionStart","status":"ready","pid":4242,"tty":"/dev/ttys003"}"#;
        let event = decode_line(line).expect("decode");
        assert_eq!(
            event,
            SessionEvent::SessionStart {
                session_id: "s-1".to_string(),
                cwd: Some("/repo".to_string()),
                pid: Some(4242),
                tty: Some("/dev/ttys003".to_string()),
            }
        );
    }

    #[test]
    fn decodes_pre_tool_use_with_nested_input() {
        let line = r#"{"session_id":"s-1","event":"PreToolUse","tool":"Bash","tool_use_id":"toolu_1","tool_input":{"command":"ls","opts":{"all":true}}}"#;
        match decode_line(line).expect("decode") {
            SessionEvent::PreToolUse {
                tool_name,
                tool_use_id,
                tool_input,
                ..
            } => {
                assert_eq!(tool_name, "Bash");
                assert_eq!(tool_use_id.as_deref(), Some("toolu_1"));
                assert_eq!(
                    tool_input,
                    Some(json!({"command": "ls", "opts": {"all": true}}))
                );
            }
            other => panic!("expected PreToolUse, got {:?}", other),
        }
    }

    #[test]
    fn decodes_post_tool_use_without_tool_name() {
        let line = r#"{"session_id":"s-1","event":"PostToolUse","tool_use_id":"toolu_1"}"#;
        match decode_line(line).expect("decode") {
            SessionEvent::PostToolUse { tool_name, .. } => assert_eq!(tool_name, UNKNOWN_TOOL),
            other => panic!("expected PostToolUse, got {:?}", other),
        }
    }

    #[test]
    fn unknown_event_is_a_variant_not_an_error() {
        let line = r#"{"session_id":"s-1","event":"SubagentStop"}"#;
        let event = decode_line(line).expect("decode");
        assert_eq!(
            event,
            SessionEvent::Unknown {
                session_id: "s-1".to_string(),
                event: "SubagentStop".to_string(),
            }
        );
    }

    #[test]
    fn rejects_missing_session_id() {
        let err = decode_line(r#"{"event":"SessionEnd"}"#).expect_err("should fail");
        assert_eq!(err.code, "missing_field");
        assert!(err.message.contains("session_id"));
    }

    #[test]
    fn rejects_blank_event() {
        let err = decode_line(r#"{"session_id":"s-1","event":"  "}"#).expect_err("should fail");
        assert_eq!(err.code, "missing_field");
        assert!(err.message.contains("event"));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = decode_line("{not json").expect_err("should fail");
        assert_eq!(err.code, "invalid_json");
    }

    #[test]
    fn rejects_empty_line() {
        let err = decode_line("   \n").expect_err("should fail");
        assert_eq!(err.code, "empty_line");
    }

    #[test]
    fn ignores_non_positive_pid() {
        let line = r#"{"session_id":"s-1","event":"SessionStart","pid":-3}"#;
        match decode_line(line).expect("decode") {
            SessionEvent::SessionStart { pid, .. } => assert_eq!(pid, None),
            other => panic!("expected SessionStart, got {:?}", other),
        }
    }

    #[test]
    fn tolerates_unknown_fields() {
        let line = r#"{"session_id":"s-1","event":"SessionEnd","schema":"v9","extra":[1,2]}"#;
        assert!(decode_line(line).is_ok());
    }

    #[test]
    fn encode_uses_snake_case_and_newline() {
        let event = SessionEvent::PostToolUse {
            session_id: "s-1".to_string(),
            cwd: Some("/repo".to_string()),
            tool_name: "Edit".to_string(),
            tool_use_id: Some("toolu_9".to_string()),
        };
        let line = encode_line(&event).expect("encode");
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(line.trim_end()).expect("json");
        assert_eq!(value["tool_use_id"], "toolu_9");
        assert_eq!(value["event"], "PostToolUse");
        assert_eq!(decode_line(&line).expect("decode"), event);
    }

    #[test]
    fn socket_path_defaults_to_temp_dir() {
        if env::var(SOCKET_ENV).is_ok() {
            return;
        }
        let path = default_socket_path();
        assert!(path.starts_with(env::temp_dir()));
        assert!(path.ends_with(SOCKET_NAME));
    }
}
