//! Memory supervision for the agent process.
//!
//! ```text
//! ProcessEnumerator → find target → MemorySampler → SampleHistory → Thresholds
//!                                          │                            │
//!                                   on_sample (every tick)      on_transition (edges only)
//! ```
//!
//! - [`history`]: bounded ring buffer of samples plus min/max/avg/trend
//! - [`threshold`]: Normal/Warning/Critical classification and edge detection
//! - [`supervisor`]: the polling loop and its start/stop lifecycle

pub mod history;
pub mod supervisor;
pub mod threshold;

pub use history::{stats, trend_mb_per_hour, MemorySample, MemoryStats, SampleHistory};
pub use supervisor::{
    MemoryReading, MemorySupervisor, SupervisorConfig, SupervisorHandle, SupervisorNotice,
    SupervisorObserver,
};
pub use threshold::{ThresholdState, ThresholdTracker, ThresholdTransition, Thresholds};
