//! Integration tests for the memory supervisor driven by scripted processes.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};
use companion_core::memory::SupervisorNotice;
use companion_core::{
    MemorySampler, MemorySupervisor, ProcessEnumerator, ProcessRecord, SupervisorConfig,
    TargetMatcher, ThresholdState,
};

struct SingleAgent;

impl ProcessEnumerator for SingleAgent {
    fn list_processes(&self) -> Vec<ProcessRecord> {
        vec![ProcessRecord {
            pid: 777,
            name: "opencode".to_string(),
            command_line: "opencode --serve".to_string(),
            resident_memory_mb: 0,
        }]
    }
}

struct Script(Mutex<VecDeque<u64>>);

impl Script {
    fn new(values: &[u64]) -> Self {
        Self(Mutex::new(values.iter().copied().collect()))
    }
}

impl MemorySampler for Script {
    fn sample_mb(&self, _pid: u32) -> u64 {
        self.0.lock().unwrap().pop_front().unwrap_or(0)
    }
}

fn at(tick: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(tick * 5)
}

type Transitions = Vec<(ThresholdState, ThresholdState)>;

fn run(samples: &[u64], capacity: usize) -> (Transitions, MemorySupervisor<SingleAgent, Script>) {
    let config = SupervisorConfig::new(5.0, 2048, 4096)
        .unwrap()
        .with_history_capacity(capacity);
    let matcher = TargetMatcher::new(vec!["opencode".to_string()], "opencode");
    let mut supervisor =
        MemorySupervisor::new(SingleAgent, Script::new(samples), matcher, config);

    let mut transitions = Vec::new();
    for tick in 0..samples.len() as i64 {
        for notice in supervisor.tick(at(tick)) {
            if let SupervisorNotice::Transition(t) = notice {
                transitions.push((t.from, t.to));
            }
        }
    }
    (transitions, supervisor)
}

#[test]
fn test_steady_normal_usage_fires_nothing() {
    let (transitions, supervisor) = run(&[500, 500, 500], 10);
    assert!(transitions.is_empty());
    assert_eq!(supervisor.state(), ThresholdState::Normal);
}

#[test]
fn test_escalation_fires_once_per_edge() {
    let (transitions, supervisor) = run(&[500, 2500, 2500, 5000], 10);
    assert_eq!(
        transitions,
        vec![
            (ThresholdState::Normal, ThresholdState::Warning),
            (ThresholdState::Warning, ThresholdState::Critical),
        ]
    );
    assert_eq!(supervisor.state(), ThresholdState::Critical);
}

#[test]
fn test_recovery_fires_downward_transition() {
    let (transitions, _) = run(&[5000, 1000], 10);
    assert_eq!(
        transitions,
        vec![
            (ThresholdState::Normal, ThresholdState::Critical),
            (ThresholdState::Critical, ThresholdState::Normal),
        ]
    );
}

#[test]
fn test_history_never_exceeds_capacity() {
    let samples: Vec<u64> = (1..=50).map(|i| 100 + i).collect();
    let (_, supervisor) = run(&samples, 8);
    let history = supervisor.history();
    assert_eq!(history.len(), 8);
    let kept: Vec<u64> = history.iter().map(|s| s.memory_mb).collect();
    assert_eq!(kept, (143..=150).collect::<Vec<u64>>());

    let stats = history.stats();
    assert_eq!(stats.min_mb, 143);
    assert_eq!(stats.max_mb, 150);
}

#[test]
fn test_unavailable_sample_is_not_recorded() {
    let (transitions, supervisor) = run(&[3000, 0, 3000], 10);
    assert_eq!(
        transitions,
        vec![(ThresholdState::Normal, ThresholdState::Warning)]
    );
    assert_eq!(supervisor.history().len(), 2);
}
