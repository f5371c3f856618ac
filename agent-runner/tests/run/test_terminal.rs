//! Terminal phases, rejection, cancellation and reset

use super::common::*;
use agent_runner::controller::RunController;
use agent_runner::history::RunOutcome;
use agent_runner_sdk::{
    ApprovalDecision, RunConfig, RunEvent, RunPhase, StageFailure, StageStatus,
};

fn at_gate() -> RunController {
    let mut c = RunController::new(transfer_agent());
    c.start(RunConfig::new("john@co.com", "sasha@co.com")).unwrap();
    c.advance_by(ms(7000));
    assert_eq!(c.phase(), RunPhase::AwaitingApproval);
    c
}

#[test]
fn rejection_fails_the_gate_and_stops() {
    let mut c = at_gate();
    c.decide(ApprovalDecision::Rejected).unwrap();

    let snap = c.snapshot();
    assert_eq!(snap.phase, RunPhase::Failed);
    assert_eq!(snap.stages[2].status, StageStatus::Failed);
    assert_eq!(snap.stages[2].failure, Some(StageFailure::Rejected));
    assert_eq!(snap.stages[3].status, StageStatus::Pending);
    assert!(snap.summary.is_none());

    c.advance_by(ms(60_000));
    assert_eq!(c.snapshot().stages[3].status, StageStatus::Pending);
}

fn finished(phase: RunPhase) -> RunController {
    let mut c = at_gate();
    match phase {
        RunPhase::Completed => {
            c.decide(ApprovalDecision::Approved).unwrap();
            c.advance_by(ms(4000));
        }
        RunPhase::Failed => c.decide(ApprovalDecision::Rejected).unwrap(),
        RunPhase::Cancelled => c.cancel().unwrap(),
        other => panic!("{:?} is not terminal", other),
    }
    assert_eq!(c.phase(), phase);
    c
}

#[test]
fn terminal_runs_refuse_decide_and_cancel() {
    for phase in [RunPhase::Completed, RunPhase::Failed, RunPhase::Cancelled] {
        let mut c = finished(phase);
        let before = c.snapshot();
        let mut rx = c.subscribe();

        for decision in [ApprovalDecision::Approved, ApprovalDecision::Rejected] {
            assert!(c.decide(decision).unwrap_err().is_invalid_state(), "{:?}", phase);
        }
        assert!(c.cancel().unwrap_err().is_invalid_state(), "{:?}", phase);
        assert!(c.start(RunConfig::new("a", "b")).unwrap_err().is_invalid_state());

        c.advance_by(ms(10_000));
        assert_eq!(c.snapshot(), before, "{:?}", phase);
        assert!(drain(&mut rx).is_empty(), "{:?}", phase);
    }
}

#[test]
fn cancel_while_running_fails_the_active_stage() {
    let mut c = RunController::new(transfer_agent());
    let mut rx = c.subscribe();
    c.start(RunConfig::new("a", "b")).unwrap();
    c.advance_by(ms(1200));
    c.cancel().unwrap();

    let snap = c.snapshot();
    assert_eq!(snap.phase, RunPhase::Cancelled);
    assert_eq!(snap.stages[0].status, StageStatus::Failed);
    assert_eq!(snap.stages[0].failure, Some(StageFailure::Cancelled));
    assert!(c.next_deadline().is_none());

    let events: Vec<RunEvent> = drain(&mut rx).into_iter().map(|n| n.event).collect();
    assert!(matches!(
        events.last(),
        Some(RunEvent::RunFinished {
            phase: RunPhase::Cancelled,
            ..
        })
    ));

    let lines = c.snapshot().stages[0].log_lines.len();
    c.advance_by(ms(10_000));
    assert_eq!(c.snapshot().stages[0].log_lines.len(), lines);
}

#[test]
fn cancel_at_the_gate_is_allowed() {
    let mut c = at_gate();
    c.cancel().unwrap();

    let snap = c.snapshot();
    assert_eq!(snap.phase, RunPhase::Cancelled);
    assert_eq!(snap.stages[2].failure, Some(StageFailure::Cancelled));
    assert!(c.approval_preview().is_none());
}

#[test]
fn cancel_before_start_is_invalid() {
    let mut c = RunController::new(transfer_agent());
    assert!(c.cancel().unwrap_err().is_invalid_state());
}

#[test]
fn reset_allows_a_fresh_run() {
    let mut c = at_gate();
    let first = c.run_id().unwrap();
    c.decide(ApprovalDecision::Rejected).unwrap();

    c.reset();
    assert_eq!(c.phase(), RunPhase::Idle);
    assert!(c.snapshot().stages.iter().all(|s| s.status == StageStatus::Pending));

    let second = c.start(RunConfig::new("a", "b")).unwrap();
    assert_ne!(first, second);
    assert_eq!(c.snapshot().stages[0].log_lines.len(), 1);
}

#[test]
fn reset_mid_run_drops_pending_work() {
    let mut c = RunController::new(transfer_agent());
    c.start(RunConfig::new("a", "b")).unwrap();
    c.advance_by(ms(2000));
    c.reset();

    let mut rx = c.subscribe();
    c.advance_by(ms(20_000));
    assert!(drain(&mut rx).is_empty());
    assert_eq!(c.phase(), RunPhase::Idle);
}

#[test]
fn history_records_each_outcome() {
    let mut c = at_gate();
    c.decide(ApprovalDecision::Approved).unwrap();
    c.advance_by(ms(4000));
    c.reset();

    c.start(RunConfig::new("a", "b")).unwrap();
    c.cancel().unwrap();

    let recent = c.history().recent(10);
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].outcome, RunOutcome::Cancelled);
    assert_eq!(recent[1].outcome, RunOutcome::Success);
    assert_eq!(recent[1].settings_updated, 4);

    let metrics = c.history().metrics("ch-1");
    assert_eq!(metrics.total_runs, 2);
    assert_eq!(metrics.success_rate, Some(50));
}
