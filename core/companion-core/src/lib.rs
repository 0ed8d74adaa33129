//! # companion-core
//!
//! Engines behind the agent companion. Nothing here renders UI; clients (the
//! daemon, a menu-bar app) consume the published snapshots.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Long-running parts own plain threads.
//! - **Graceful degradation**: Missing processes, files and emitters are `None`/empty, not errors.
//! - **Injectable edges**: Process enumeration and memory sampling are traits so the
//!   supervisor can be driven by fakes in tests.
//!
//! ## Engines
//!
//! - [`memory`]: target discovery, sampling, bounded history, edge-triggered thresholds
//! - [`config`]: layered JSONC configuration discovery, merge and validation
//! - [`session`]: folds lifecycle events into per-session state
//! - [`transcript`]: fallback event source mined from append-only transcripts

pub mod config;
pub mod error;
pub mod memory;
pub mod patterns;
pub mod process;
pub mod session;
pub mod transcript;

pub use companion_bridge_protocol::{EventKind, SessionEvent};
pub use config::{
    merge, resolve_with, strip_comments, validate, ConfigDocument, ConfigResolver, ConfigSource,
    ResolvedConfig, ValidationReport,
};
pub use error::{CompanionError, Result};
pub use memory::{
    MemoryReading, MemoryStats, MemorySupervisor, SampleHistory, SupervisorConfig,
    SupervisorHandle, SupervisorObserver, ThresholdState, Thresholds,
};
pub use process::{
    MemorySampler, ProcessEnumerator, ProcessRecord, SysinfoProcessSource, TargetMatcher,
};
pub use session::{EventSource, SessionPhase, SessionState, SessionStateStore};
pub use transcript::{TranscriptWatcher, TranscriptWatcherConfig};
