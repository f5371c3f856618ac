//! Shared types for agent-runner consumers.
//!
//! Presentation layers, the chat assistant and the CLI all talk to a run through the
//! types in this crate: read-only [`RunSnapshot`]s, [`RunEvent`] notifications and the
//! [`RunRuntime`] command trait.

// Re-export async trait for convenience
pub use async_trait::async_trait;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Opaque run identifier, minted when a run starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Overall lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl RunPhase {
    /// Completed, Failed and Cancelled can only be left through a reset
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Completed | RunPhase::Failed | RunPhase::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Running => "running",
            RunPhase::AwaitingApproval => "awaiting approval",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
            RunPhase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    AwaitingApproval,
    Failed,
}

impl StageStatus {
    /// Running and AwaitingApproval hold the run's single active slot
    pub fn is_active(&self) -> bool {
        matches!(self, StageStatus::Running | StageStatus::AwaitingApproval)
    }
}

/// Decision supplied from outside to unblock an approval gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

/// Why a stage ended up Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageFailure {
    Cancelled,
    Rejected,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageFailure::Cancelled => f.write_str("cancelled"),
            StageFailure::Rejected => f.write_str("rejected"),
        }
    }
}

/// Input for starting a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Entity the agent reads from (e.g. the user whose settings are copied)
    pub source: String,
    /// Entity the agent writes to
    pub target: String,
    /// Feature toggles by name; missing entries take the agent's default
    #[serde(default)]
    pub toggles: BTreeMap<String, bool>,
}

impl RunConfig {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            toggles: BTreeMap::new(),
        }
    }

    pub fn with_toggle(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.toggles.insert(name.into(), enabled);
        self
    }
}

/// Boolean toggle an agent accepts in its [`RunConfig`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleSchema {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: bool,
}

/// Catalog entry for an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub stages: Vec<String>,
    pub toggles: Vec<ToggleSchema>,
}

/// One before/after row shown at an approval gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingChange {
    pub setting: String,
    pub current_value: String,
    pub new_value: String,
    #[serde(default)]
    pub sensitive: bool,
}

impl SettingChange {
    pub fn is_changed(&self) -> bool {
        self.current_value != self.new_value
    }
}

/// Comparison data of the gate the run is currently blocked on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPreview {
    pub run_id: RunId,
    pub stage_index: usize,
    pub stage_name: String,
    pub changes: Vec<SettingChange>,
}

impl ApprovalPreview {
    pub fn changed(&self) -> impl Iterator<Item = &SettingChange> {
        self.changes.iter().filter(|c| c.is_changed())
    }

    pub fn changed_count(&self) -> usize {
        self.changed().count()
    }

    /// Changed rows flagged sensitive
    pub fn sensitive_count(&self) -> usize {
        self.changed().filter(|c| c.sensitive).count()
    }
}

/// Read-only view of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub name: String,
    pub description: String,
    pub requires_approval: bool,
    pub status: StageStatus,
    /// Progress line shown while the stage is running
    pub current_log_line: Option<String>,
    /// Every progress line emitted so far, in order
    pub log_lines: Vec<String>,
    pub duration: Option<Duration>,
    pub failure: Option<StageFailure>,
}

/// Outcome figures of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub source_name: String,
    pub target_name: String,
    pub settings_updated: usize,
    pub duration: Duration,
}

/// Read-only view of a run, published after every committed transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub id: Option<RunId>,
    pub agent_id: String,
    pub agent_name: String,
    pub phase: RunPhase,
    pub active_stage: Option<usize>,
    pub stages: Vec<StageSnapshot>,
    pub config: Option<RunConfig>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: Option<RunSummary>,
}

impl RunSnapshot {
    pub fn active(&self) -> Option<&StageSnapshot> {
        self.active_stage.and_then(|i| self.stages.get(i))
    }

    pub fn statuses(&self) -> Vec<StageStatus> {
        self.stages.iter().map(|s| s.status).collect()
    }
}

/// Structured events emitted by a run controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        agent_id: String,
        source: String,
        target: String,
    },
    StageStarted {
        run_id: RunId,
        index: usize,
        name: String,
    },
    /// Progress line from a running stage
    StageLog {
        run_id: RunId,
        index: usize,
        line: String,
    },
    StageCompleted {
        run_id: RunId,
        index: usize,
        name: String,
        duration_ms: u64,
    },
    ApprovalRequested {
        run_id: RunId,
        index: usize,
        name: String,
        changed: usize,
        sensitive: usize,
    },
    ApprovalDecided {
        run_id: RunId,
        index: usize,
        decision: ApprovalDecision,
    },
    StageFailed {
        run_id: RunId,
        index: usize,
        name: String,
        reason: StageFailure,
    },
    /// Run reached a terminal phase
    RunFinished { run_id: RunId, phase: RunPhase },
    RunReset,
}

impl RunEvent {
    /// One-line description for message feeds
    pub fn message(&self) -> String {
        match self {
            RunEvent::RunStarted { source, target, .. } => {
                format!("Run started: {} -> {}", source, target)
            }
            RunEvent::StageStarted { name, .. } => format!("{}...", name),
            RunEvent::StageLog { line, .. } => line.clone(),
            RunEvent::StageCompleted {
                name, duration_ms, ..
            } => format!("{} complete [{}]", name, format_duration_ms(*duration_ms)),
            RunEvent::ApprovalRequested {
                name,
                changed,
                sensitive,
                ..
            } => format!(
                "{}: approval required ({} changes, {} sensitive)",
                name, changed, sensitive
            ),
            RunEvent::ApprovalDecided { decision, .. } => match decision {
                ApprovalDecision::Approved => "Changes approved".to_string(),
                ApprovalDecision::Rejected => "Changes rejected by user".to_string(),
            },
            RunEvent::StageFailed { name, reason, .. } => format!("{} {}", name, reason),
            RunEvent::RunFinished { phase, .. } => format!("Run {}", phase),
            RunEvent::RunReset => "Run reset".to_string(),
        }
    }
}

/// Renders `340` as `340ms` and `1200` as `1.2s`
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

/// Event plus the snapshot taken right after it was committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunNotification {
    pub event: RunEvent,
    pub snapshot: RunSnapshot,
}

/// Errors returned by run operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("cannot {operation} while run is {phase}")]
    InvalidState {
        operation: &'static str,
        phase: RunPhase,
    },

    #[error("approval gate for stage {stage} was already decided")]
    GateAlreadyDecided { stage: usize },

    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    #[error("run service is no longer available")]
    RuntimeClosed,
}

impl RunError {
    pub fn is_validation(&self) -> bool {
        matches!(self, RunError::Validation(_))
    }

    /// Contract violations: the caller asked for a transition the run does not permit
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            RunError::InvalidState { .. } | RunError::GateAlreadyDecided { .. }
        )
    }
}

/// Result type for run operations
pub type RunResult<T> = Result<T, RunError>;

// ============================================================================
// Console Logging Macros (for the CLI run view)
// ============================================================================

/// Logs the start of a stage with a header.
///
/// # Example
/// ```
/// use agent_runner_sdk::log_stage_start_console;
/// log_stage_start_console!(1, 4, "Fetch Profiles");
/// ```
///
/// Outputs:
/// ```text
/// ═══ STAGE 1/4: Fetch Profiles ═══
/// ```
#[macro_export]
macro_rules! log_stage_start_console {
    ($index:expr, $total:expr, $name:expr) => {
        println!("\x1b[1;36m═══ STAGE {}/{}: {} ═══\x1b[0m", $index, $total, $name);
    };
}

/// Logs the completion of a stage.
///
/// # Example
/// ```
/// use agent_runner_sdk::log_stage_complete_console;
/// log_stage_complete_console!("Fetch Profiles", "340ms");
/// ```
///
/// Outputs:
/// ```text
/// ✓ Fetch Profiles complete [340ms]
/// ```
#[macro_export]
macro_rules! log_stage_complete_console {
    ($name:expr, $duration:expr) => {
        println!("\x1b[32m✓ {} complete [{}]\x1b[0m", $name, $duration);
    };
}

/// Logs a progress line of a running stage.
#[macro_export]
macro_rules! log_stage_line {
    ($line:expr) => {
        println!("\x1b[2m  {}\x1b[0m", $line);
    };
}

/// Logs one row of an approval preview. Changed sensitive rows are red.
///
/// # Example
/// ```
/// use agent_runner_sdk::log_approval_row;
/// log_approval_row!("Voicemail PIN", "****", "Reset", true, true);
/// ```
#[macro_export]
macro_rules! log_approval_row {
    ($setting:expr, $current:expr, $new:expr, $changed:expr, $sensitive:expr) => {
        if $changed && $sensitive {
            println!(
                "\x1b[31m  ⚠ {:<22} {:<16} → {}\x1b[0m",
                $setting, $current, $new
            );
        } else if $changed {
            println!(
                "\x1b[33m  • {:<22} {:<16} → {}\x1b[0m",
                $setting, $current, $new
            );
        } else {
            println!("\x1b[2m    {:<22} {:<16}   {}\x1b[0m", $setting, $current, $new);
        }
    };
}

/// Logs an informational message.
///
/// # Example
/// ```
/// use agent_runner_sdk::log_info;
/// log_info!("Loading agent catalog...");
/// ```
///
/// Outputs:
/// ```text
/// ℹ Loading agent catalog...
/// ```
#[macro_export]
macro_rules! log_info {
    ($message:expr) => {
        println!("\x1b[36mℹ {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[36mℹ {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs a warning message.
#[macro_export]
macro_rules! log_warning {
    ($message:expr) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs a failure message.
#[macro_export]
macro_rules! log_failure {
    ($message:expr) => {
        println!("\x1b[31m✗ {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[31m✗ {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

// ============================================================================
// End of Console Logging Macros
// ============================================================================

/// Command surface of a run, shared by the CLI and any other presentation layer
#[async_trait]
pub trait RunRuntime: Send + Sync {
    /// Agent this runtime drives
    fn agent(&self) -> &AgentSummary;

    /// Start a run from Idle
    async fn start(&self, config: RunConfig) -> RunResult<RunId>;

    /// Resolve the approval gate the run is waiting on
    async fn decide(&self, decision: ApprovalDecision) -> RunResult<()>;

    /// Abort the active stage
    async fn cancel(&self) -> RunResult<()>;

    /// Return to Idle, discarding all stage progress
    async fn reset(&self) -> RunResult<()>;

    async fn snapshot(&self) -> RunResult<RunSnapshot>;

    /// Comparison data of the open approval gate, if any
    async fn approval_preview(&self) -> RunResult<Option<ApprovalPreview>>;

    /// Receive a notification after every committed transition
    fn subscribe(&self) -> broadcast::Receiver<RunNotification>;
}
