//! Stage ordering through the approval gate

use super::common::*;
use agent_runner::controller::RunController;
use agent_runner_sdk::{ApprovalDecision, RunConfig, RunEvent, RunPhase, StageStatus};

use StageStatus::{AwaitingApproval, Completed, Pending, Running};

#[test]
fn transfer_agent_walks_every_stage() {
    let mut c = RunController::new(transfer_agent());
    c.start(RunConfig::new("john@co.com", "sasha@co.com")).unwrap();

    let snap = c.snapshot();
    assert_eq!(snap.phase, RunPhase::Running);
    assert_eq!(snap.statuses(), vec![Running, Pending, Pending, Pending]);

    c.advance_by(ms(3000));
    assert_eq!(c.snapshot().statuses(), vec![Completed, Running, Pending, Pending]);

    c.advance_by(ms(4000));
    let snap = c.snapshot();
    assert_eq!(snap.phase, RunPhase::AwaitingApproval);
    assert_eq!(snap.statuses(), vec![Completed, Completed, AwaitingApproval, Pending]);

    c.decide(ApprovalDecision::Approved).unwrap();
    let snap = c.snapshot();
    assert_eq!(snap.phase, RunPhase::Running);
    assert_eq!(snap.statuses(), vec![Completed, Completed, Completed, Running]);

    c.advance_by(ms(4000));
    let snap = c.snapshot();
    assert_eq!(snap.phase, RunPhase::Completed);
    assert_eq!(snap.statuses(), vec![Completed; 4]);
    assert!(snap.ended_at.is_some());
}

#[test]
fn gated_stage_runs_before_it_waits() {
    let mut c = RunController::new(gated_agent());
    let mut rx = c.subscribe();

    c.start(RunConfig::new("a", "b")).unwrap();
    c.advance_by(ms(500));
    c.advance_by(ms(200));
    c.decide(ApprovalDecision::Approved).unwrap();
    c.advance_by(ms(300));

    let notifications = drain(&mut rx);
    assert_eq!(
        active_trace(&notifications),
        vec![
            (0, Running),
            (1, Running),
            (1, AwaitingApproval),
            (2, Running),
        ]
    );
    assert_eq!(
        notifications.last().map(|n| n.snapshot.phase),
        Some(RunPhase::Completed)
    );
}

#[test]
fn nothing_moves_while_waiting_for_approval() {
    let mut c = RunController::new(gated_agent());
    c.start(RunConfig::new("a", "b")).unwrap();
    c.advance_by(ms(700));
    assert_eq!(c.phase(), RunPhase::AwaitingApproval);
    assert!(c.next_deadline().is_none());

    let mut rx = c.subscribe();
    c.advance_by(ms(3_600_000));
    assert!(drain(&mut rx).is_empty());
    assert_eq!(c.phase(), RunPhase::AwaitingApproval);
    assert!(c.approval_preview().is_some());
}

#[test]
fn preview_exposes_gate_rows() {
    let mut c = RunController::new(transfer_agent());
    c.start(RunConfig::new("a", "b")).unwrap();
    assert!(c.approval_preview().is_none());

    c.advance_by(ms(7000));
    let preview = c.approval_preview().unwrap();
    assert_eq!(preview.stage_name, "Review Changes");
    assert_eq!(preview.changes.len(), 6);
    assert_eq!(preview.changed_count(), 4);
    assert_eq!(preview.sensitive_count(), 1);
}

#[test]
fn log_lines_cycle_at_the_agent_interval() {
    let mut c = RunController::new(gated_agent());
    let mut rx = c.subscribe();
    c.start(RunConfig::new("a", "b")).unwrap();
    c.advance_by(ms(450));

    let lines: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|n| match n.event {
            RunEvent::StageLog { line, .. } => Some(line),
            _ => None,
        })
        .collect();
    assert_eq!(lines, vec!["a1", "a2", "a1", "a2", "a1"]);
    assert_eq!(c.snapshot().stages[0].current_log_line.as_deref(), Some("a1"));
}

#[test]
fn each_notification_carries_the_committed_state() {
    let mut c = RunController::new(gated_agent());
    let mut rx = c.subscribe();
    c.start(RunConfig::new("a", "b")).unwrap();

    let notifications = drain(&mut rx);
    assert!(matches!(notifications[0].event, RunEvent::RunStarted { .. }));
    for n in &notifications {
        assert_eq!(n.snapshot.phase, RunPhase::Running);
        assert_eq!(n.snapshot.active_stage, Some(0));
    }
}
