//! Bounded sample history and window statistics.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemorySample {
    pub timestamp: DateTime<Utc>,
    pub memory_mb: u64,
}

/// Fixed-capacity window of samples, oldest evicted first.
///
/// Invariants: `len() <= capacity()` and timestamps strictly increase from
/// front to back. A sample that would break ordering is rejected.
#[derive(Debug, Clone)]
pub struct SampleHistory {
    samples: VecDeque<MemorySample>,
    capacity: usize,
}

impl SampleHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a sample, evicting the oldest on overflow.
    /// Returns false if the sample is not newer than the latest one.
    pub fn push(&mut self, sample: MemorySample) -> bool {
        if let Some(latest) = self.samples.back() {
            if sample.timestamp <= latest.timestamp {
                tracing::debug!(
                    latest = %latest.timestamp,
                    rejected = %sample.timestamp,
                    "Dropping out-of-order memory sample"
                );
                return false;
            }
        }

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn latest(&self) -> Option<&MemorySample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemorySample> {
        self.samples.iter()
    }

    pub fn to_vec(&self) -> Vec<MemorySample> {
        self.samples.iter().copied().collect()
    }

    pub fn stats(&self) -> MemoryStats {
        stats(self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub min_mb: u64,
    pub max_mb: u64,
    /// Integer mean, rounded down.
    pub avg_mb: u64,
    pub samples: usize,
}

/// Min/max/avg over the current window. Empty history yields all zeros.
pub fn stats(history: &SampleHistory) -> MemoryStats {
    if history.is_empty() {
        return MemoryStats::default();
    }

    let mut min_mb = u64::MAX;
    let mut max_mb = 0u64;
    let mut total: u128 = 0;
    for sample in history.iter() {
        min_mb = min_mb.min(sample.memory_mb);
        max_mb = max_mb.max(sample.memory_mb);
        total += u128::from(sample.memory_mb);
    }

    let count = history.len();
    MemoryStats {
        min_mb,
        max_mb,
        avg_mb: (total / count as u128) as u64,
        samples: count,
    }
}

/// Growth in MB per hour between the oldest and newest retained samples.
pub fn trend_mb_per_hour(history: &SampleHistory) -> Option<f64> {
    let first = history.samples.front()?;
    let last = history.samples.back()?;
    let elapsed_ms = last
        .timestamp
        .signed_duration_since(first.timestamp)
        .num_milliseconds();
    if elapsed_ms <= 0 {
        return None;
    }

    let delta = last.memory_mb as f64 - first.memory_mb as f64;
    Some(delta * 3_600_000.0 / elapsed_ms as f64)
}
