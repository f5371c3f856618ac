//! Per-stage progress tracking

use agent_runner_sdk::{StageFailure, StageSnapshot, StageStatus};
use std::time::Duration;

use crate::agent::StageDefinition;

/// Runtime state of one stage. Only the run controller mutates it.
#[derive(Debug, Clone)]
pub struct Stage {
    definition: StageDefinition,
    status: StageStatus,
    log_lines: Vec<String>,
    /// Index into the definition's progress lines
    log_cursor: usize,
    started_at: Option<Duration>,
    duration: Option<Duration>,
    failure: Option<StageFailure>,
}

impl Stage {
    pub fn new(definition: StageDefinition) -> Self {
        Self {
            definition,
            status: StageStatus::Pending,
            log_lines: Vec::new(),
            log_cursor: 0,
            started_at: None,
            duration: None,
            failure: None,
        }
    }

    pub fn definition(&self) -> &StageDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn status(&self) -> StageStatus {
        self.status
    }

    pub fn log_lines(&self) -> &[String] {
        &self.log_lines
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn failure(&self) -> Option<StageFailure> {
        self.failure
    }

    /// Progress line on display; only a running stage has one
    pub fn current_log_line(&self) -> Option<&str> {
        if self.status != StageStatus::Running {
            return None;
        }
        self.definition
            .progress
            .get(self.log_cursor)
            .map(String::as_str)
    }

    /// Pending -> Running. Returns the first progress line, if the stage has any.
    pub(crate) fn begin(&mut self, now: Duration) -> Option<String> {
        debug_assert_eq!(self.status, StageStatus::Pending);
        self.status = StageStatus::Running;
        self.started_at = Some(now);
        self.log_cursor = 0;

        let first = self.definition.progress.first().cloned()?;
        self.log_lines.push(first.clone());
        Some(first)
    }

    /// Step to the next progress line, wrapping past the end
    pub(crate) fn rotate_log(&mut self) -> Option<String> {
        if self.status != StageStatus::Running || self.definition.progress.is_empty() {
            return None;
        }
        self.log_cursor = (self.log_cursor + 1) % self.definition.progress.len();
        let line = self.definition.progress[self.log_cursor].clone();
        self.log_lines.push(line.clone());
        Some(line)
    }

    /// Running -> AwaitingApproval
    pub(crate) fn await_approval(&mut self) {
        debug_assert_eq!(self.status, StageStatus::Running);
        self.status = StageStatus::AwaitingApproval;
    }

    /// Running | AwaitingApproval -> Completed, recording the elapsed time
    pub(crate) fn complete(&mut self, now: Duration) -> Duration {
        debug_assert!(self.status.is_active());
        let elapsed = now.saturating_sub(self.started_at.unwrap_or(now));
        self.status = StageStatus::Completed;
        self.duration = Some(elapsed);
        elapsed
    }

    pub(crate) fn fail(&mut self, reason: StageFailure) {
        debug_assert!(self.status.is_active());
        self.status = StageStatus::Failed;
        self.failure = Some(reason);
    }

    pub fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            name: self.definition.name.clone(),
            description: self.definition.description.clone(),
            requires_approval: self.definition.requires_approval,
            status: self.status,
            current_log_line: self.current_log_line().map(str::to_string),
            log_lines: self.log_lines.clone(),
            duration: self.duration,
            failure: self.failure,
        }
    }
}
