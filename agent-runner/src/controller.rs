//! Run controller: owns one run and walks it through its stages
//!
//! The controller is a synchronous state object on a virtual clock. Simulated work and
//! progress lines are timers in a [`TimerQueue`]; nothing happens until the owner moves
//! time forward with [`RunController::advance_by`] or [`RunController::advance_to`].
//!
//! Every committed transition is broadcast as a [`RunNotification`] carrying the snapshot
//! taken after the transition, so observers never see a half-applied state.

use agent_runner_sdk::{
    ApprovalDecision, ApprovalPreview, RunConfig, RunError, RunEvent, RunId, RunNotification,
    RunPhase, RunResult, RunSnapshot, RunSummary, StageFailure,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::agent::AgentDefinition;
use crate::approval::ApprovalGate;
use crate::history::{RunHistory, RunOutcome, RunRecord};
use crate::scheduler::{TimerId, TimerQueue};
use crate::stage::Stage;

/// Broadcast buffer size for run notifications
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    /// Simulated work of a stage is done
    WorkDone { stage: usize },
    /// Show the next progress line of a running stage
    RotateLog { stage: usize },
}

pub struct RunController {
    agent: Arc<AgentDefinition>,
    run_id: Option<RunId>,
    phase: RunPhase,
    stages: Vec<Stage>,
    active: Option<usize>,
    config: Option<RunConfig>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    /// Virtual time at which the current run started
    started_clock: Duration,
    summary: Option<RunSummary>,
    gate: Option<ApprovalGate>,
    timers: TimerQueue<Tick>,
    log_timer: Option<TimerId>,
    /// Events of the transition in progress, published together once it commits
    pending: Vec<RunEvent>,
    events: broadcast::Sender<RunNotification>,
    history: RunHistory,
}

impl RunController {
    pub fn new(agent: impl Into<Arc<AgentDefinition>>) -> Self {
        Self::with_event_capacity(agent, DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(agent: impl Into<Arc<AgentDefinition>>, capacity: usize) -> Self {
        let agent = agent.into();
        let (events, _) = broadcast::channel(capacity.max(1));
        let stages = Self::fresh_stages(&agent);

        Self {
            agent,
            run_id: None,
            phase: RunPhase::Idle,
            stages,
            active: None,
            config: None,
            started_at: None,
            ended_at: None,
            started_clock: Duration::ZERO,
            summary: None,
            gate: None,
            timers: TimerQueue::new(),
            log_timer: None,
            pending: Vec::new(),
            events,
            history: RunHistory::default(),
        }
    }

    fn fresh_stages(agent: &AgentDefinition) -> Vec<Stage> {
        agent.stages.iter().cloned().map(Stage::new).collect()
    }

    pub fn agent(&self) -> &AgentDefinition {
        &self.agent
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn run_id(&self) -> Option<RunId> {
        self.run_id
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.timers.now()
    }

    /// Virtual time of the next scheduled step, if anything is scheduled
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunNotification> {
        self.events.subscribe()
    }

    /// Sender half, for owners that hand out subscriptions without borrowing the controller
    pub fn event_sender(&self) -> broadcast::Sender<RunNotification> {
        self.events.clone()
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    /// Start a run from Idle.
    ///
    /// Validation happens before any state changes: both identifiers must be non-blank
    /// and every requested toggle must be declared by the agent.
    pub fn start(&mut self, config: RunConfig) -> RunResult<RunId> {
        if self.phase != RunPhase::Idle {
            return Err(RunError::InvalidState {
                operation: "start",
                phase: self.phase,
            });
        }

        let source = config.source.trim();
        let target = config.target.trim();
        if source.is_empty() {
            return Err(RunError::Validation(
                "source identifier is required".to_string(),
            ));
        }
        if target.is_empty() {
            return Err(RunError::Validation(
                "target identifier is required".to_string(),
            ));
        }
        let toggles = self.agent.resolve_toggles(&config.toggles)?;

        let config = RunConfig {
            source: source.to_string(),
            target: target.to_string(),
            toggles,
        };
        let run_id = RunId::new();

        self.run_id = Some(run_id);
        self.phase = RunPhase::Running;
        self.started_at = Some(Utc::now());
        self.ended_at = None;
        self.started_clock = self.timers.now();
        self.summary = None;

        info!(
            run_id = %run_id,
            agent = %self.agent.id,
            source = %config.source,
            target = %config.target,
            "Run started"
        );
        self.publish(RunEvent::RunStarted {
            run_id,
            agent_id: self.agent.id.clone(),
            source: config.source.clone(),
            target: config.target.clone(),
        });
        self.config = Some(config);

        self.enter_stage(run_id, 0);
        self.flush();
        Ok(run_id)
    }

    /// Resolve the open approval gate
    pub fn decide(&mut self, decision: ApprovalDecision) -> RunResult<()> {
        let run_id = match (self.phase, self.run_id) {
            (RunPhase::AwaitingApproval, Some(id)) => id,
            _ => {
                return Err(RunError::InvalidState {
                    operation: "decide",
                    phase: self.phase,
                })
            }
        };

        let index = {
            let gate = self.gate.as_mut().ok_or(RunError::InvalidState {
                operation: "decide",
                phase: self.phase,
            })?;
            gate.decide(decision)?;
            gate.stage_index()
        };

        info!(run_id = %run_id, stage = index, ?decision, "Approval decided");
        self.publish(RunEvent::ApprovalDecided {
            run_id,
            index,
            decision,
        });

        match decision {
            ApprovalDecision::Approved => {
                self.complete_stage(run_id, index);
                self.continue_after(run_id, index);
            }
            ApprovalDecision::Rejected => {
                self.fail_stage(run_id, index, StageFailure::Rejected);
                self.finish(run_id, RunPhase::Failed);
            }
        }

        self.flush();
        Ok(())
    }

    /// Abort the active stage.
    ///
    /// Allowed while Running and while AwaitingApproval; the approval wait has no timeout,
    /// so cancelling is the way out of it.
    pub fn cancel(&mut self) -> RunResult<()> {
        let run_id = match (self.phase, self.run_id) {
            (RunPhase::Running | RunPhase::AwaitingApproval, Some(id)) => id,
            _ => {
                return Err(RunError::InvalidState {
                    operation: "cancel",
                    phase: self.phase,
                })
            }
        };

        if let Some(index) = self.active {
            self.fail_stage(run_id, index, StageFailure::Cancelled);
        }
        self.finish(run_id, RunPhase::Cancelled);
        self.flush();
        Ok(())
    }

    /// Back to Idle with every stage Pending. Always succeeds.
    pub fn reset(&mut self) {
        self.timers.clear();
        self.log_timer = None;

        self.run_id = None;
        self.phase = RunPhase::Idle;
        self.stages = Self::fresh_stages(&self.agent);
        self.active = None;
        self.config = None;
        self.started_at = None;
        self.ended_at = None;
        self.summary = None;
        self.gate = None;

        debug!(agent = %self.agent.id, "Run reset");
        self.publish(RunEvent::RunReset);
        self.flush();
    }

    /// Move the virtual clock forward by `delta`, firing everything that comes due
    pub fn advance_by(&mut self, delta: Duration) {
        let target = self.timers.now().saturating_add(delta);
        self.advance_to(target);
    }

    /// Move the virtual clock to `target`, firing due timers in deadline order.
    ///
    /// Timers scheduled while firing are honored if they fall inside the window.
    pub fn advance_to(&mut self, target: Duration) {
        while let Some((_, tick)) = self.timers.pop_due(target) {
            self.on_tick(tick);
            self.flush();
        }
        self.timers.set_now(target);
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            id: self.run_id,
            agent_id: self.agent.id.clone(),
            agent_name: self.agent.name.clone(),
            phase: self.phase,
            active_stage: self.active,
            stages: self.stages.iter().map(Stage::snapshot).collect(),
            config: self.config.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            summary: self.summary.clone(),
        }
    }

    /// Comparison data of the gate the run is blocked on
    pub fn approval_preview(&self) -> Option<ApprovalPreview> {
        if self.phase != RunPhase::AwaitingApproval {
            return None;
        }
        self.gate
            .as_ref()
            .filter(|gate| gate.is_open())
            .map(ApprovalGate::preview)
    }

    fn on_tick(&mut self, tick: Tick) {
        let run_id = match self.run_id {
            Some(id) => id,
            None => return,
        };

        match tick {
            Tick::RotateLog { stage } => {
                self.log_timer = None;
                if self.active != Some(stage) {
                    return;
                }
                if let Some(line) = self.stages[stage].rotate_log() {
                    debug!(run_id = %run_id, stage, line = %line, "Stage progress");
                    self.publish(RunEvent::StageLog {
                        run_id,
                        index: stage,
                        line,
                    });
                    self.log_timer = Some(
                        self.timers
                            .schedule(self.agent.log_interval(), Tick::RotateLog { stage }),
                    );
                }
            }
            Tick::WorkDone { stage } => {
                        if self.active == Some(stage) && self.phase == RunPhase::Running {
                    self.advance(run_id, stage);
                }
            }
        }
    }

    /// The running stage finished its simulated work
    fn advance(&mut self, run_id: RunId, index: usize) {
        self.stop_log_timer();

        if !self.stages[index].definition().requires_approval {
            self.complete_stage(run_id, index);
            self.continue_after(run_id, index);
            return;
        }

        self.stages[index].await_approval();
        self.phase = RunPhase::AwaitingApproval;

        let name = self.stages[index].name().to_string();
        let gate = ApprovalGate::open(
            run_id,
            index,
            name.clone(),
            self.stages[index].definition().preview.clone(),
        );
        info!(
            run_id = %run_id,
            stage = %name,
            changed = gate.changed_count(),
            sensitive = gate.sensitive_count(),
            "Awaiting approval"
        );
        self.publish(RunEvent::ApprovalRequested {
            run_id,
            index,
            name,
            changed: gate.changed_count(),
            sensitive: gate.sensitive_count(),
        });
        self.gate = Some(gate);
    }

    fn enter_stage(&mut self, run_id: RunId, index: usize) {
        let now = self.timers.now();
        let stage = &mut self.stages[index];
        let first_line = stage.begin(now);
        let work = stage.definition().work();
        let has_progress = !stage.definition().progress.is_empty();
        let name = stage.name().to_string();

        self.active = Some(index);
        self.phase = RunPhase::Running;

        debug!(run_id = %run_id, stage = %name, "Stage started");
        self.publish(RunEvent::StageStarted {
            run_id,
            index,
            name,
        });
        if let Some(line) = first_line {
            self.publish(RunEvent::StageLog {
                run_id,
                index,
                line,
            });
        }

        self.timers.schedule(work, Tick::WorkDone { stage: index });
        if has_progress {
            self.log_timer = Some(
                self.timers
                    .schedule(self.agent.log_interval(), Tick::RotateLog { stage: index }),
            );
        }
    }

    fn complete_stage(&mut self, run_id: RunId, index: usize) {
        let now = self.timers.now();
        let stage = &mut self.stages[index];
        let elapsed = stage.complete(now);
        let name = stage.name().to_string();

        info!(run_id = %run_id, stage = %name, elapsed_ms = elapsed.as_millis() as u64, "Stage completed");
        self.publish(RunEvent::StageCompleted {
            run_id,
            index,
            name,
            duration_ms: elapsed.as_millis() as u64,
        });
    }

    fn fail_stage(&mut self, run_id: RunId, index: usize, reason: StageFailure) {
        self.stop_log_timer();
        let stage = &mut self.stages[index];
        stage.fail(reason);
        let name = stage.name().to_string();

        info!(run_id = %run_id, stage = %name, %reason, "Stage failed");
        self.publish(RunEvent::StageFailed {
            run_id,
            index,
            name,
            reason,
        });
    }

    /// Start the stage after `index`, or complete the run if it was the last one
    fn continue_after(&mut self, run_id: RunId, index: usize) {
        let next = index + 1;
        if next < self.stages.len() {
            self.enter_stage(run_id, next);
        } else {
            self.finish(run_id, RunPhase::Completed);
        }
    }

    fn finish(&mut self, run_id: RunId, phase: RunPhase) {
        debug_assert!(phase.is_terminal());
        self.timers.clear();
        self.log_timer = None;

        let ended_at = Utc::now();
        let elapsed = self.timers.now().saturating_sub(self.started_clock);
        let settings_updated = match &self.gate {
            Some(gate) if gate.decision() == Some(ApprovalDecision::Approved) => {
                gate.changed_count()
            }
            _ => 0,
        };

        self.phase = phase;
        self.active = None;
        self.ended_at = Some(ended_at);

        let (source, target) = self
            .config
            .as_ref()
            .map(|c| (c.source.clone(), c.target.clone()))
            .unwrap_or_default();

        if phase == RunPhase::Completed {
            self.summary = Some(RunSummary {
                source_name: display_name(&source).to_string(),
                target_name: display_name(&target).to_string(),
                settings_updated,
                duration: elapsed,
            });
        }

        if let Some(outcome) = RunOutcome::from_phase(phase) {
            self.history.record(RunRecord {
                run_id,
                agent_id: self.agent.id.clone(),
                source,
                target,
                outcome,
                started_at: self.started_at.unwrap_or(ended_at),
                ended_at,
                duration: elapsed,
                settings_updated,
            });
        }

        info!(run_id = %run_id, %phase, elapsed_ms = elapsed.as_millis() as u64, "Run finished");
        self.publish(RunEvent::RunFinished { run_id, phase });
    }

    fn stop_log_timer(&mut self) {
        if let Some(id) = self.log_timer.take() {
            self.timers.cancel(id);
        }
    }

    fn publish(&mut self, event: RunEvent) {
        self.pending.push(event);
    }

    /// Broadcast the events of the transition that just committed
    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for event in self.pending.drain(..) {
            // Nobody listening is fine
            let _ = self.events.send(RunNotification {
                event,
                snapshot: snapshot.clone(),
            });
        }
    }
}

/// `"John Doe (john@co.com)"` -> `"John Doe"`
pub fn display_name(identifier: &str) -> &str {
    identifier
        .split(" (")
        .next()
        .unwrap_or(identifier)
        .trim()
}
