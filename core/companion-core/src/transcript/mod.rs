//! Transcript mining: the fallback event source.
//!
//! When the agent cannot push events over the bridge, lifecycle events are
//! reconstructed from the JSONL transcripts it appends to on disk.
//!
//! ```text
//! notify (recursive) → dirty set → debounce → FileTail (new bytes only)
//!                                                   │
//!                                     TranscriptSession (per file) → SessionEvent
//! ```
//!
//! - [`record`]: maps one transcript line to zero or more events
//! - [`tail`]: incremental, bounded reads with truncation detection
//! - [`watcher`]: filesystem watch, coalescing and lifecycle

pub mod record;
pub mod tail;
pub mod watcher;

pub use record::TranscriptSession;
pub use tail::{FileTail, TailRead};
pub use watcher::{TranscriptWatcher, TranscriptWatcherConfig};
