//! Human approval checkpoint between automated stages

use agent_runner_sdk::{ApprovalDecision, ApprovalPreview, RunError, RunId, RunResult, SettingChange};

/// One activation of an approval gate.
///
/// The controller opens a gate when a stage enters AwaitingApproval. The gate accepts a
/// single decision; the comparison rows are read-only data copied from the stage definition.
#[derive(Debug, Clone)]
pub struct ApprovalGate {
    run_id: RunId,
    stage_index: usize,
    stage_name: String,
    changes: Vec<SettingChange>,
    decision: Option<ApprovalDecision>,
}

impl ApprovalGate {
    pub fn open(
        run_id: RunId,
        stage_index: usize,
        stage_name: impl Into<String>,
        changes: Vec<SettingChange>,
    ) -> Self {
        Self {
            run_id,
            stage_index,
            stage_name: stage_name.into(),
            changes,
            decision: None,
        }
    }

    pub fn stage_index(&self) -> usize {
        self.stage_index
    }

    pub fn decision(&self) -> Option<ApprovalDecision> {
        self.decision
    }

    pub fn is_open(&self) -> bool {
        self.decision.is_none()
    }

    pub fn preview(&self) -> ApprovalPreview {
        ApprovalPreview {
            run_id: self.run_id,
            stage_index: self.stage_index,
            stage_name: self.stage_name.clone(),
            changes: self.changes.clone(),
        }
    }

    /// Number of rows whose value would change
    pub fn changed_count(&self) -> usize {
        self.changes.iter().filter(|c| c.is_changed()).count()
    }

    pub fn sensitive_count(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| c.is_changed() && c.sensitive)
            .count()
    }

    /// Record the decision. Fails if this gate was already decided.
    pub fn decide(&mut self, decision: ApprovalDecision) -> RunResult<ApprovalDecision> {
        if self.decision.is_some() {
            return Err(RunError::GateAlreadyDecided {
                stage: self.stage_index,
            });
        }
        self.decision = Some(decision);
        Ok(decision)
    }
}
