//! Daemon settings (`companion.toml`).
//!
//! Every key is optional. A missing file means defaults; a malformed file is
//! an error the caller downgrades to a warning. Out-of-range values are
//! replaced by their defaults and reported, never fatal.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use companion_bridge_protocol::{default_socket_path, MAX_LINE_BYTES, SOCKET_ENV};
use companion_core::memory::Thresholds;
use companion_core::session::StoreLimits;
use companion_core::{SupervisorConfig, TargetMatcher, TranscriptWatcherConfig};

use crate::bridge::DEFAULT_MAX_CONNECTIONS;

pub const SETTINGS_ENV: &str = "COMPANION_SETTINGS";
const SETTINGS_DIR: &str = "agent-companion";
const SETTINGS_FILE: &str = "companion.toml";
const DEFAULT_STATUS_INTERVAL_SECS: u64 = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionSettings {
    pub agent: AgentSettings,
    pub memory: MemorySettings,
    pub config: ConfigWatchSettings,
    pub bridge: BridgeSettings,
    pub transcripts: TranscriptSettings,
    pub sessions: SessionSettings,
    pub status: StatusSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub name: String,
    pub process_names: Vec<String>,
    /// Defaults to `name`.
    pub command_token: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: "opencode".to_string(),
            process_names: ["opencode", "node", "bun", "deno"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
            command_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    pub enabled: bool,
    pub interval_secs: f64,
    pub warning_mb: u64,
    pub critical_mb: u64,
    pub history_capacity: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5.0,
            warning_mb: 2048,
            critical_mb: 4096,
            history_capacity: 720,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigWatchSettings {
    pub watch: bool,
    pub debounce_ms: u64,
}

impl Default for ConfigWatchSettings {
    fn default() -> Self {
        Self {
            watch: true,
            debounce_ms: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub enabled: bool,
    pub socket_path: Option<PathBuf>,
    pub max_line_bytes: usize,
    /// Connections beyond this many concurrent emitters are closed.
    pub max_connections: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            socket_path: None,
            max_line_bytes: MAX_LINE_BYTES,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptSettings {
    pub enabled: bool,
    pub root: Option<PathBuf>,
    pub debounce_ms: u64,
    pub max_batch_bytes: usize,
}

impl Default for TranscriptSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            root: None,
            debounce_ms: 250,
            max_batch_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub ended_grace_secs: u64,
    /// 0 disables inactivity eviction.
    pub inactivity_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub tool_history_limit: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ended_grace_secs: 60,
            inactivity_timeout_secs: 30 * 60,
            sweep_interval_secs: 15,
            tool_history_limit: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    pub path: Option<PathBuf>,
    pub interval_secs: f64,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            path: None,
            interval_secs: DEFAULT_STATUS_INTERVAL_SECS as f64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Daily-rotated log files are written here when set; stderr otherwise.
    pub directory: Option<PathBuf>,
}

pub fn default_settings_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(SETTINGS_ENV).filter(|value| !value.is_empty()) {
        return Some(expand_home(Path::new(&path)));
    }
    dirs::config_dir().map(|dir| dir.join(SETTINGS_DIR).join(SETTINGS_FILE))
}

pub fn load_settings(path: Option<&Path>) -> Result<CompanionSettings, String> {
    let Some(path) = path.map(Path::to_path_buf).or_else(default_settings_path) else {
        return Ok(CompanionSettings::default());
    };
    if !path.exists() {
        return Ok(CompanionSettings::default());
    }

    let content = fs_err::read_to_string(&path)
        .map_err(|err| format!("Failed to read settings {}: {}", path.display(), err))?;
    toml::from_str::<CompanionSettings>(&content)
        .map_err(|err| format!("Failed to parse settings {}: {}", path.display(), err))
}

impl CompanionSettings {
    /// Replaces invalid values with defaults. Returns one message per fix.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut fixes = Vec::new();
        let defaults = CompanionSettings::default();

        if self.agent.name.trim().is_empty() {
            fixes.push("agent.name is empty; using default".to_string());
            self.agent.name = defaults.agent.name.clone();
        }
        if !is_positive_duration(self.memory.interval_secs) {
            fixes.push(format!(
                "memory.interval_secs must be a positive duration (got {}); using default",
                self.memory.interval_secs
            ));
            self.memory.interval_secs = defaults.memory.interval_secs;
        }
        if Thresholds::new(self.memory.warning_mb, self.memory.critical_mb).is_err() {
            fixes.push(format!(
                "memory.critical_mb ({}) must exceed memory.warning_mb ({}); using defaults",
                self.memory.critical_mb, self.memory.warning_mb
            ));
            self.memory.warning_mb = defaults.memory.warning_mb;
            self.memory.critical_mb = defaults.memory.critical_mb;
        }
        if self.memory.history_capacity == 0 {
            fixes.push("memory.history_capacity must be positive; using default".to_string());
            self.memory.history_capacity = defaults.memory.history_capacity;
        }
        if self.bridge.max_line_bytes == 0 {
            fixes.push("bridge.max_line_bytes must be positive; using default".to_string());
            self.bridge.max_line_bytes = defaults.bridge.max_line_bytes;
        }
        if self.bridge.max_connections == 0 {
            fixes.push("bridge.max_connections must be positive; using default".to_string());
            self.bridge.max_connections = defaults.bridge.max_connections;
        }
        if self.transcripts.max_batch_bytes == 0 {
            fixes.push("transcripts.max_batch_bytes must be positive; using default".to_string());
            self.transcripts.max_batch_bytes = defaults.transcripts.max_batch_bytes;
        }
        if self.sessions.sweep_interval_secs == 0 {
            fixes.push("sessions.sweep_interval_secs must be positive; using default".to_string());
            self.sessions.sweep_interval_secs = defaults.sessions.sweep_interval_secs;
        }
        if self.sessions.tool_history_limit == 0 {
            fixes.push("sessions.tool_history_limit must be positive; using default".to_string());
            self.sessions.tool_history_limit = defaults.sessions.tool_history_limit;
        }
        if !is_positive_duration(self.status.interval_secs) {
            fixes.push(format!(
                "status.interval_secs must be a positive duration (got {}); using default",
                self.status.interval_secs
            ));
            self.status.interval_secs = defaults.status.interval_secs;
        }

        fixes
    }

    pub fn target_matcher(&self) -> TargetMatcher {
        let token = self
            .agent
            .command_token
            .clone()
            .filter(|token| !token.trim().is_empty())
            .unwrap_or_else(|| self.agent.name.clone());
        TargetMatcher::new(self.agent.process_names.clone(), token)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::new(
            self.memory.interval_secs,
            self.memory.warning_mb,
            self.memory.critical_mb,
        )
        .unwrap_or_default()
        .with_history_capacity(self.memory.history_capacity)
    }

    /// `COMPANION_BRIDGE_SOCKET` beats the settings file, which beats the
    /// temp-dir default.
    pub fn socket_path(&self) -> PathBuf {
        let from_env = std::env::var_os(SOCKET_ENV).filter(|value| !value.is_empty());
        match (from_env, &self.bridge.socket_path) {
            (Some(_), _) | (None, None) => default_socket_path(),
            (None, Some(path)) => expand_home(path),
        }
    }

    pub fn transcript_root(&self) -> Option<PathBuf> {
        self.transcripts.root.as_deref().map(expand_home).or_else(|| {
            dirs::data_local_dir().map(|dir| dir.join(&self.agent.name).join("transcripts"))
        })
    }

    pub fn transcript_watcher_config(&self, root: PathBuf) -> TranscriptWatcherConfig {
        TranscriptWatcherConfig::new(root)
            .with_debounce(Duration::from_millis(self.transcripts.debounce_ms))
            .with_max_batch_bytes(self.transcripts.max_batch_bytes)
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits::from_secs(
            self.sessions.ended_grace_secs,
            self.sessions.inactivity_timeout_secs,
            self.sessions.tool_history_limit,
        )
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.sweep_interval_secs.max(1))
    }

    pub fn status_path(&self) -> Option<PathBuf> {
        self.status.path.as_deref().map(expand_home).or_else(|| {
            dirs::state_dir()
                .or_else(dirs::data_local_dir)
                .map(|dir| dir.join(SETTINGS_DIR).join("status.json"))
        })
    }

    pub fn status_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.status.interval_secs)
            .ok()
            .filter(|interval| !interval.is_zero())
            .unwrap_or(Duration::from_secs(DEFAULT_STATUS_INTERVAL_SECS))
    }

    pub fn log_directory(&self) -> Option<PathBuf> {
        self.logging.directory.as_deref().map(expand_home)
    }
}

fn is_positive_duration(secs: f64) -> bool {
    Duration::try_from_secs_f64(secs).is_ok_and(|interval| !interval.is_zero())
}

/// Expands a leading `~` to the home directory. Other paths pass through.
fn expand_home(path: &Path) -> PathBuf {
    let Some(home) = dirs::home_dir() else {
        return path.to_path_buf();
    };
    if path == Path::new("~") {
        return home;
    }
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}
