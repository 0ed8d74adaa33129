//! Process discovery and memory sampling.
//!
//! The two platform capabilities the supervisor depends on are traits:
//! [`ProcessEnumerator`] lists every process, [`MemorySampler`] reads one
//! pid's resident footprint. [`SysinfoProcessSource`] implements both on top of
//! `sysinfo`; tests inject fakes.
//!
//! # Target Matching
//!
//! The agent can run as its own binary or hosted in a generic runtime
//! (`node`, `bun`, ...). A process qualifies when:
//!
//! 1. its name exactly matches one of the candidate runtime names (tried in
//!    order) **and** its command line contains the distinguishing token, or
//! 2. no candidate matched and its command line contains the token anywhere.
//!
//! The first qualifying process in enumeration order wins. Enumeration is
//! sorted by pid, so "first" is stable for a fixed process table but can
//! change between calls when several qualifying processes exist.

use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, System, UpdateKind};

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub name: String,
    pub command_line: String,
    pub resident_memory_mb: u64,
}

/// Lists all processes visible to the current user.
pub trait ProcessEnumerator: Send + Sync {
    fn list_processes(&self) -> Vec<ProcessRecord>;
}

/// Reads the resident footprint of a pid in whole megabytes.
///
/// Returns 0 when the pid is gone or unreadable. Callers must read 0 as
/// "unknown", not "uses no memory".
pub trait MemorySampler: Send + Sync {
    fn sample_mb(&self, pid: u32) -> u64;
}

impl<T: ProcessEnumerator + ?Sized> ProcessEnumerator for std::sync::Arc<T> {
    fn list_processes(&self) -> Vec<ProcessRecord> {
        (**self).list_processes()
    }
}

impl<T: MemorySampler + ?Sized> MemorySampler for std::sync::Arc<T> {
    fn sample_mb(&self, pid: u32) -> u64 {
        (**self).sample_mb(pid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetMatcher {
    process_names: Vec<String>,
    command_token: String,
    exclude_pid: Option<u32>,
}

impl TargetMatcher {
    pub fn new(process_names: Vec<String>, command_token: impl Into<String>) -> Self {
        Self {
            process_names,
            command_token: command_token.into().to_lowercase(),
            exclude_pid: Some(std::process::id()),
        }
    }

    /// Allows matching the current process. Only useful in tests.
    pub fn including_self(mut self) -> Self {
        self.exclude_pid = None;
        self
    }

    pub fn command_token(&self) -> &str {
        &self.command_token
    }

    pub fn find(&self, processes: &[ProcessRecord]) -> Option<ProcessRecord> {
        let eligible = || {
            processes
                .iter()
                .filter(move |process| Some(process.pid) != self.exclude_pid)
        };

        for candidate in &self.process_names {
            let matched = eligible().find(|process| {
                normalize_name(&process.name) == candidate.as_str()
                    && self.command_line_matches(process)
            });
            if let Some(process) = matched {
                return Some(process.clone());
            }
        }

        if self.command_token.is_empty() {
            return None;
        }

        eligible()
            .find(|process| self.command_line_matches(process))
            .cloned()
    }

    fn command_line_matches(&self, process: &ProcessRecord) -> bool {
        process
            .command_line
            .to_lowercase()
            .contains(&self.command_token)
    }
}

fn normalize_name(name: &str) -> &str {
    name.strip_suffix(".exe").unwrap_or(name)
}

/// Runs one full discovery pass.
pub fn find_target<E: ProcessEnumerator + ?Sized>(
    enumerator: &E,
    matcher: &TargetMatcher,
) -> Option<ProcessRecord> {
    let processes = enumerator.list_processes();
    matcher.find(&processes)
}

/// `sysinfo`-backed implementation of both platform capabilities.
///
/// Enumeration refreshes the whole table; sampling refreshes only the
/// requested pid, which reads a couple of procfs/kernel counters and does
/// not block on other processes.
pub struct SysinfoProcessSource {
    system: Mutex<System>,
}

impl SysinfoProcessSource {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn system(&self) -> MutexGuard<'_, System> {
        self.system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SysinfoProcessSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessEnumerator for SysinfoProcessSource {
    fn list_processes(&self) -> Vec<ProcessRecord> {
        let mut sys = self.system();
        sys.refresh_processes_specifics(
            ProcessRefreshKind::new()
                .with_memory()
                .with_cmd(UpdateKind::OnlyIfNotSet),
        );

        let mut records: Vec<ProcessRecord> = sys
            .processes()
            .iter()
            .map(|(pid, process)| ProcessRecord {
                pid: pid.as_u32(),
                name: process.name().to_string(),
                command_line: process.cmd().join(" "),
                resident_memory_mb: process.memory() / BYTES_PER_MB,
            })
            .collect();
        records.sort_by_key(|record| record.pid);
        records
    }
}

impl MemorySampler for SysinfoProcessSource {
    fn sample_mb(&self, pid: u32) -> u64 {
        if pid == 0 {
            return 0;
        }
        let mut sys = self.system();
        let sysinfo_pid = Pid::from(pid as usize);
        if !sys.refresh_process_specifics(sysinfo_pid, ProcessRefreshKind::new().with_memory()) {
            return 0;
        }
        sys.process(sysinfo_pid)
            .map(|process| process.memory() / BYTES_PER_MB)
            .unwrap_or(0)
    }
}
