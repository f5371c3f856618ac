//! Common helpers for run tests

use agent_runner::agent::{builtin_agents, AgentDefinition};
use agent_runner_sdk::{RunNotification, RunSnapshot, StageStatus};
use std::time::Duration;
use tokio::sync::broadcast;

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// The built-in Fetch / Analyze / Review / Apply agent
pub fn transfer_agent() -> AgentDefinition {
    builtin_agents()
        .unwrap()
        .into_iter()
        .find(|a| a.id == "ch-1")
        .unwrap()
}

/// Three stages, the middle one gated
pub fn gated_agent() -> AgentDefinition {
    AgentDefinition::from_yaml_str(
        r#"
id: abc
name: A-B-C
log_interval_ms: 100
stages:
  - id: a
    name: A
    work_ms: 500
    progress: [a1, a2]
  - id: b
    name: B
    requires_approval: true
    work_ms: 200
    progress: [b1]
    preview:
      - { setting: Mode, current_value: Old, new_value: New }
  - id: c
    name: C
    work_ms: 300
"#,
    )
    .unwrap()
}

/// Everything published so far
pub fn drain(rx: &mut broadcast::Receiver<RunNotification>) -> Vec<RunNotification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

/// (active stage, its status) for each notification, with consecutive repeats collapsed
pub fn active_trace(notifications: &[RunNotification]) -> Vec<(usize, StageStatus)> {
    let mut trace: Vec<(usize, StageStatus)> = Vec::new();
    for n in notifications {
        if let Some(index) = n.snapshot.active_stage {
            let entry = (index, n.snapshot.stages[index].status);
            if trace.last() != Some(&entry) {
                trace.push(entry);
            }
        }
    }
    trace
}

/// Structural rules every snapshot must satisfy
pub fn assert_invariants(snapshot: &RunSnapshot) {
    let active: Vec<usize> = snapshot
        .stages
        .iter()
        .enumerate()
        .filter(|(_, s)| s.status.is_active())
        .map(|(i, _)| i)
        .collect();
    assert!(active.len() <= 1, "more than one active stage: {:?}", snapshot.statuses());
    assert_eq!(active.first().copied(), snapshot.active_stage);

    // Nothing pending before the furthest stage that has been touched
    let furthest = snapshot
        .stages
        .iter()
        .rposition(|s| s.status != StageStatus::Pending);
    if let Some(furthest) = furthest {
        for (i, stage) in snapshot.stages[..furthest].iter().enumerate() {
            assert!(
                matches!(stage.status, StageStatus::Completed | StageStatus::Failed),
                "stage {} is {:?} before stage {}",
                i,
                stage.status,
                furthest
            );
        }
    }

    if snapshot.phase.is_terminal() {
        assert!(snapshot.active_stage.is_none());
        assert!(snapshot.ended_at.is_some());
    }
}
