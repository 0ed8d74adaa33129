//! Wires the engines together for `companion-daemon run`.
//!
//! Every component is optional at runtime: a disabled or failed component
//! is logged and the rest keep running.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use companion_core::config::ConfigWatcher;
use companion_core::{
    ConfigResolver, EventSource, MemorySupervisor, SupervisorHandle, SysinfoProcessSource,
    TranscriptWatcher,
};

use crate::bridge::{BridgeConfig, EventBridgeServer};
use crate::hub::{SessionHub, SessionsStatus};
use crate::monitor::{ConfigMonitor, MemoryMonitor};
use crate::settings::CompanionSettings;
use crate::status::{CompanionStatus, TranscriptStatus};

pub struct Companion {
    agent: String,
    memory: MemoryMonitor,
    config: ConfigMonitor,
    hub: Option<SessionHub>,
    bridge: Option<EventBridgeServer>,
    transcripts: Option<TranscriptWatcher>,
    transcript_root: Option<PathBuf>,
    transcripts_enabled: bool,
    supervisor: Option<SupervisorHandle>,
    config_watcher: Option<ConfigWatcher>,
}

impl Companion {
    pub fn start(
        settings: &CompanionSettings,
        project_root: Option<PathBuf>,
    ) -> Result<Self, String> {
        let hub = SessionHub::start(settings.store_limits(), settings.sweep_interval())
            .map_err(|err| format!("Failed to start session hub: {}", err))?;

        let bridge = if settings.bridge.enabled {
            let config = BridgeConfig {
                socket_path: settings.socket_path(),
                max_line_bytes: settings.bridge.max_line_bytes,
                max_connections: settings.bridge.max_connections,
            };
            let path = config.socket_path.clone();
            match EventBridgeServer::start(config, hub.sender()) {
                Ok(server) => Some(server),
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "Event bridge unavailable");
                    None
                }
            }
        } else {
            info!("Event bridge disabled");
            None
        };

        let transcript_root = settings.transcript_root();
        let transcripts = match (&transcript_root, settings.transcripts.enabled) {
            (Some(root), true) if root.is_dir() => {
                let sender = hub.sender();
                match TranscriptWatcher::start(
                    settings.transcript_watcher_config(root.clone()),
                    move |event| {
                        sender.submit(EventSource::Transcript, event);
                    },
                ) {
                    Ok(watcher) => Some(watcher),
                    Err(err) => {
                        warn!(error = %err, "Transcript watcher unavailable");
                        None
                    }
                }
            }
            (Some(root), true) => {
                info!(root = %root.display(), "Transcript directory missing; fallback inactive");
                None
            }
            _ => None,
        };

        let memory = MemoryMonitor::new(settings.memory.enabled);
        let supervisor = if settings.memory.enabled {
            let source = Arc::new(SysinfoProcessSource::new());
            let supervisor = MemorySupervisor::new(
                Arc::clone(&source),
                source,
                settings.target_matcher(),
                settings.supervisor_config(),
            );
            match supervisor.start(memory.clone()) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!(error = %err, "Memory supervisor unavailable");
                    None
                }
            }
        } else {
            None
        };

        let resolver = ConfigResolver::for_agent(settings.agent.name.clone());
        let config = ConfigMonitor::new(project_root.clone());
        config.update(resolver.resolve(project_root.as_deref()));
        let config_watcher = if settings.config.watch {
            let monitor = config.clone();
            match ConfigWatcher::start(
                resolver,
                project_root,
                Duration::from_millis(settings.config.debounce_ms),
                move |resolved| monitor.update(resolved),
            ) {
                Ok(watcher) => Some(watcher),
                Err(err) => {
                    warn!(error = %err, "Config watcher unavailable");
                    None
                }
            }
        } else {
            None
        };

        info!(agent = %settings.agent.name, "Companion started");

        Ok(Self {
            agent: settings.agent.name.clone(),
            memory,
            config,
            hub: Some(hub),
            bridge,
            transcripts,
            transcript_root,
            transcripts_enabled: settings.transcripts.enabled,
            supervisor,
            config_watcher,
        })
    }

    pub fn status(&self) -> CompanionStatus {
        CompanionStatus {
            generated_at: Utc::now(),
            pid: std::process::id(),
            agent: self.agent.clone(),
            memory: self.memory.snapshot(),
            config: self.config.snapshot(),
            bridge: self
                .bridge
                .as_ref()
                .map(EventBridgeServer::status)
                .unwrap_or_default(),
            transcripts: TranscriptStatus {
                enabled: self.transcripts_enabled,
                root: self.transcript_root.clone(),
                watching: self.transcripts.is_some(),
            },
            sessions: self
                .hub
                .as_ref()
                .map(SessionHub::snapshot)
                .unwrap_or_else(|| SessionsStatus {
                    sessions: Vec::new(),
                    stats: Default::default(),
                }),
        }
    }

    /// Stops producers before the hub so no event is lost mid-shutdown.
    pub fn stop(mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.stop();
        }
        if let Some(watcher) = self.transcripts.take() {
            watcher.stop();
        }
        if let Some(watcher) = self.config_watcher.take() {
            watcher.stop();
        }
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.stop();
        }
        if let Some(hub) = self.hub.take() {
            hub.stop();
        }
        info!("Companion stopped");
    }
}
