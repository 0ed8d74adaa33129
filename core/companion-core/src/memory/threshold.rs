//! Threshold classification with edge-triggered transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CompanionError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdState {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl ThresholdState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdState::Normal => "normal",
            ThresholdState::Warning => "warning",
            ThresholdState::Critical => "critical",
        }
    }
}

/// Two increasing cut points. A reading at or above a cut point is in that tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    warning_mb: u64,
    critical_mb: u64,
}

impl Thresholds {
    pub fn new(warning_mb: u64, critical_mb: u64) -> Result<Self> {
        if critical_mb <= warning_mb {
            return Err(CompanionError::InvalidSettings(format!(
                "critical_mb ({}) must be greater than warning_mb ({})",
                critical_mb, warning_mb
            )));
        }
        Ok(Self {
            warning_mb,
            critical_mb,
        })
    }

    pub fn warning_mb(&self) -> u64 {
        self.warning_mb
    }

    pub fn critical_mb(&self) -> u64 {
        self.critical_mb
    }

    /// Critical wins over Warning; the tiers are exclusive.
    pub fn classify(&self, memory_mb: u64) -> ThresholdState {
        if memory_mb >= self.critical_mb {
            ThresholdState::Critical
        } else if memory_mb >= self.warning_mb {
            ThresholdState::Warning
        } else {
            ThresholdState::Normal
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning_mb: 2048,
            critical_mb: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThresholdTransition {
    pub pid: u32,
    pub from: ThresholdState,
    pub to: ThresholdState,
    pub memory_mb: u64,
    pub at: DateTime<Utc>,
}

/// Remembers the previous tier so only changes are reported.
#[derive(Debug, Clone, Default)]
pub struct ThresholdTracker {
    state: ThresholdState,
}

impl ThresholdTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ThresholdState {
        self.state
    }

    /// Returns `(from, to)` when the tier changed.
    pub fn observe(
        &mut self,
        thresholds: &Thresholds,
        memory_mb: u64,
    ) -> Option<(ThresholdState, ThresholdState)> {
        let next = thresholds.classify(memory_mb);
        if next == self.state {
            return None;
        }
        let previous = std::mem::replace(&mut self.state, next);
        Some((previous, next))
    }

    pub fn reset(&mut self) {
        self.state = ThresholdState::Normal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_cut_points() {
        assert!(Thresholds::new(4096, 2048).is_err());
        assert!(Thresholds::new(2048, 2048).is_err());
        assert!(Thresholds::new(2048, 2049).is_ok());
    }

    #[test]
    fn critical_takes_precedence() {
        let thresholds = Thresholds::new(2048, 4096).unwrap();
        assert_eq!(thresholds.classify(0), ThresholdState::Normal);
        assert_eq!(thresholds.classify(2047), ThresholdState::Normal);
        assert_eq!(thresholds.classify(2048), ThresholdState::Warning);
        assert_eq!(thresholds.classify(4095), ThresholdState::Warning);
        assert_eq!(thresholds.classify(4096), ThresholdState::Critical);
        assert_eq!(thresholds.classify(u64::MAX), ThresholdState::Critical);
    }

    #[test]
    fn tracker_reports_edges_only() {
        let thresholds = Thresholds::default();
        let mut tracker = ThresholdTracker::new();
        let edges: Vec<_> = [500, 2500, 2500, 5000, 5000, 100]
            .into_iter()
            .filter_map(|mb| tracker.observe(&thresholds, mb))
            .collect();
        assert_eq!(
            edges,
            vec![
                (ThresholdState::Normal, ThresholdState::Warning),
                (ThresholdState::Warning, ThresholdState::Critical),
                (ThresholdState::Critical, ThresholdState::Normal),
            ]
        );
    }
}
