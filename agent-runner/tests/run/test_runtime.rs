//! The run service under paused tokio time

use super::common::*;
use agent_runner::runtime::{RunService, ServiceOptions};
use agent_runner_sdk::{
    ApprovalDecision, RunConfig, RunEvent, RunPhase, RunRuntime, StageStatus,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

fn service(speed: f64) -> RunService {
    RunService::spawn(
        Arc::new(transfer_agent()),
        ServiceOptions {
            speed,
            ..ServiceOptions::default()
        },
    )
}

#[tokio::test(start_paused = true)]
async fn stages_advance_with_the_clock() {
    let service = service(1.0);
    service
        .start(RunConfig::new("john@co.com", "sasha@co.com"))
        .await
        .unwrap();

    tokio::time::sleep(ms(3100)).await;
    let snap = service.snapshot().await.unwrap();
    assert_eq!(snap.stages[0].status, StageStatus::Completed);
    assert_eq!(snap.stages[1].status, StageStatus::Running);

    tokio::time::sleep(ms(4000)).await;
    let snap = service.snapshot().await.unwrap();
    assert_eq!(snap.phase, RunPhase::AwaitingApproval);
    assert!(service.approval_preview().await.unwrap().is_some());

    service.decide(ApprovalDecision::Approved).await.unwrap();
    tokio::time::sleep(ms(4100)).await;

    let snap = service.snapshot().await.unwrap();
    assert_eq!(snap.phase, RunPhase::Completed);
    assert_eq!(snap.summary.unwrap().settings_updated, 4);
}

#[tokio::test(start_paused = true)]
async fn extreme_speeds_are_clamped() {
    for speed in [1e300, 1e-300] {
        let service = service(speed);
        service.start(RunConfig::new("a", "b")).await.unwrap();
        tokio::time::sleep(ms(10)).await;

        let snap = service.snapshot().await.unwrap();
        assert_ne!(snap.phase, RunPhase::Idle, "speed {}", speed);
        service.cancel().await.ok();
        assert!(service.metrics().await.is_ok());
    }
}

#[tokio::test(start_paused = true)]
async fn speed_factor_compresses_time() {
    let service = service(10.0);
    service.start(RunConfig::new("a", "b")).await.unwrap();

    tokio::time::sleep(ms(710)).await;
    assert_eq!(
        service.snapshot().await.unwrap().phase,
        RunPhase::AwaitingApproval
    );
}

#[tokio::test(start_paused = true)]
async fn subscriber_can_drive_the_gate() {
    let service = service(1.0);
    let mut rx = service.subscribe();
    service.start(RunConfig::new("a", "b")).await.unwrap();

    let mut completed = Vec::new();
    loop {
        let notification = rx.recv().await.unwrap();
        match notification.event {
            RunEvent::ApprovalRequested { changed, .. } => {
                assert_eq!(changed, 4);
                service.decide(ApprovalDecision::Approved).await.unwrap();
            }
            RunEvent::StageCompleted { name, .. } => completed.push(name),
            RunEvent::RunFinished { phase, .. } => {
                assert_eq!(phase, RunPhase::Completed);
                break;
            }
            _ => {}
        }
    }

    assert_eq!(
        completed,
        vec!["Fetch Profiles", "Analyze Settings", "Review Changes", "Apply Transfer"]
    );
    assert_eq!(service.metrics().await.unwrap().successful, 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_starts_are_serialized() {
    let service = service(1.0);
    let other = service.clone();

    let (a, b) = tokio::join!(
        service.start(RunConfig::new("a", "b")),
        other.start(RunConfig::new("c", "d")),
    );

    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    let err = a.err().or(b.err()).unwrap();
    assert!(err.is_invalid_state());
}

#[tokio::test(start_paused = true)]
async fn cancel_and_reset_through_the_service() {
    let service = service(1.0);
    service.start(RunConfig::new("a", "b")).await.unwrap();
    tokio::time::sleep(ms(500)).await;

    service.cancel().await.unwrap();
    assert_eq!(service.snapshot().await.unwrap().phase, RunPhase::Cancelled);
    assert!(service.cancel().await.unwrap_err().is_invalid_state());

    service.reset().await.unwrap();
    let snap = service.snapshot().await.unwrap();
    assert_eq!(snap.phase, RunPhase::Idle);
    assert!(snap.id.is_none());

    let history = service.history(5).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_last_handle_closes_the_stream() {
    let service = service(1.0);
    let mut rx = service.subscribe();
    service.start(RunConfig::new("a", "b")).await.unwrap();
    drop(service);

    loop {
        match rx.recv().await {
            Ok(_) => continue,
            Err(RecvError::Closed) => break,
            Err(RecvError::Lagged(_)) => continue,
        }
    }
}
