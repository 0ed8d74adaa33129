//! Observers that publish engine output into shared status slots.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use companion_core::memory::ThresholdTransition;
use companion_core::{
    validate, MemoryReading, ProcessRecord, ResolvedConfig, SupervisorObserver, ThresholdState,
    ValidationReport,
};

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStatus {
    pub enabled: bool,
    pub target: Option<ProcessRecord>,
    pub latest: Option<MemoryReading>,
    pub state: ThresholdState,
    pub last_transition: Option<ThresholdTransition>,
    pub transitions: u64,
}

/// Feeds [`MemoryStatus`] from supervisor callbacks.
#[derive(Clone, Default)]
pub struct MemoryMonitor {
    status: Arc<Mutex<MemoryStatus>>,
}

impl MemoryMonitor {
    pub fn new(enabled: bool) -> Self {
        let monitor = Self::default();
        monitor.lock().enabled = enabled;
        monitor
    }

    pub fn snapshot(&self) -> MemoryStatus {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStatus> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SupervisorObserver for MemoryMonitor {
    fn on_sample(&self, reading: &MemoryReading) {
        let mut status = self.lock();
        status.state = reading.state;
        status.latest = Some(reading.clone());
    }

    fn on_transition(&self, transition: &ThresholdTransition) {
        let mut status = self.lock();
        status.state = transition.to;
        status.last_transition = Some(transition.clone());
        status.transitions += 1;
    }

    fn on_target_changed(&self, target: Option<&ProcessRecord>) {
        let mut status = self.lock();
        status.target = target.cloned();
        if target.is_none() {
            status.latest = None;
            status.state = ThresholdState::Normal;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigStatus {
    pub project_root: Option<PathBuf>,
    /// `None` when no configuration layer could be loaded. Credentials are
    /// masked; validation ran on the unmasked document.
    pub resolved: Option<ResolvedConfig>,
    pub validation: Option<ValidationReport>,
    pub loaded_at: Option<DateTime<Utc>>,
}

/// Holds the latest resolution; updated on startup and by the config watcher.
#[derive(Clone, Default)]
pub struct ConfigMonitor {
    status: Arc<Mutex<ConfigStatus>>,
}

impl ConfigMonitor {
    pub fn new(project_root: Option<PathBuf>) -> Self {
        let monitor = Self::default();
        monitor.lock().project_root = project_root;
        monitor
    }

    pub fn update(&self, resolved: Option<ResolvedConfig>) {
        let validation = resolved.as_ref().map(|config| validate(&config.document));
        if let Some(report) = validation.as_ref().filter(|report| !report.ok) {
            tracing::warn!(errors = ?report.errors, "Effective configuration has validation errors");
        }
        let resolved = resolved.map(|mut config| {
            config.document = config.document.redacted();
            config
        });
        let mut status = self.lock();
        status.resolved = resolved;
        status.validation = validation;
        status.loaded_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> ConfigStatus {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, ConfigStatus> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
