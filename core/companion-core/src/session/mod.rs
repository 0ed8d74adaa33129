//! Session state reconstruction.
//!
//! Lifecycle events from either transport are folded into one
//! [`SessionState`] per session id. The fold is a pure function
//! ([`reducer::reduce_session`]); [`SessionStateStore`] owns the map, the
//! ended-session grace window and inactivity eviction.
//!
//! Events must be applied from a single thread, in arrival order per
//! session. The daemon funnels both transports through one channel for this.

pub mod reducer;
pub mod state;
pub mod store;

pub use reducer::{reduce_session, SessionUpdate, SkipReason};
pub use state::{ActiveTool, EventSource, SessionPhase, SessionState, ToolInvocation};
pub use store::{ApplyOutcome, SessionStateStore, StoreLimits, StoreStats};
