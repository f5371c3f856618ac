//! In-memory record of finished runs and per-agent health figures

use agent_runner_sdk::{RunId, RunPhase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Finished runs kept before the oldest are dropped
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Failed,
    Cancelled,
}

impl RunOutcome {
    /// Outcome for a terminal phase; `None` for phases a run can still leave
    pub fn from_phase(phase: RunPhase) -> Option<Self> {
        match phase {
            RunPhase::Completed => Some(RunOutcome::Success),
            RunPhase::Failed => Some(RunOutcome::Failed),
            RunPhase::Cancelled => Some(RunOutcome::Cancelled),
            RunPhase::Idle | RunPhase::Running | RunPhase::AwaitingApproval => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub agent_id: String,
    pub source: String,
    pub target: String,
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Virtual time from start to the terminal transition
    pub duration: Duration,
    /// Changed rows of an approved gate
    pub settings_updated: usize,
}

/// Aggregates over one agent's finished runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub total_runs: usize,
    pub successful: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Percentage of successful runs, rounded
    pub success_rate: Option<u8>,
    pub average_duration: Option<Duration>,
    pub last_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RunHistory {
    records: VecDeque<RunRecord>,
    capacity: usize,
}

impl Default for RunHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl RunHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&mut self, record: RunRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Most recent runs first
    pub fn recent(&self, limit: usize) -> Vec<&RunRecord> {
        self.records.iter().rev().take(limit).collect()
    }

    pub fn metrics(&self, agent_id: &str) -> AgentMetrics {
        let runs: Vec<&RunRecord> = self
            .records
            .iter()
            .filter(|r| r.agent_id == agent_id)
            .collect();

        if runs.is_empty() {
            return AgentMetrics::default();
        }

        let count = |outcome: RunOutcome| runs.iter().filter(|r| r.outcome == outcome).count();
        let total = runs.len();
        let successful = count(RunOutcome::Success);
        let total_time: Duration = runs.iter().map(|r| r.duration).sum();

        AgentMetrics {
            total_runs: total,
            successful,
            failed: count(RunOutcome::Failed),
            cancelled: count(RunOutcome::Cancelled),
            success_rate: Some(((successful as f64 / total as f64) * 100.0).round() as u8),
            average_duration: Some(total_time / total as u32),
            last_run_at: runs.iter().map(|r| r.ended_at).max(),
        }
    }
}

/// Relative age of the last run, e.g. `"5m ago"`
pub fn format_last_run(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(last) = last else {
        return "Never".to_string();
    };

    let minutes = (now - last).num_minutes().max(0);
    if minutes < 1 {
        return "Just now".to_string();
    }
    if minutes < 60 {
        return format!("{}m ago", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h ago", hours);
    }

    match hours / 24 {
        1 => "1 day ago".to_string(),
        days => format!("{} days ago", days),
    }
}

/// One-line health text for an agent listing
pub fn health_line(metrics: &AgentMetrics, now: DateTime<Utc>) -> String {
    match metrics.success_rate {
        None => "Not run yet".to_string(),
        Some(rate) => format!(
            "{} runs, {}% success, last {}",
            metrics.total_runs,
            rate,
            format_last_run(metrics.last_run_at, now)
        ),
    }
}
