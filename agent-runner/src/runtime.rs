//! Run service: a tokio task that owns a [`RunController`] and drives its clock
//!
//! Commands arrive over an mpsc channel and are answered through oneshot replies, so every
//! mutation is applied by the one task that owns the controller. Between commands the task
//! sleeps until the controller's next deadline. Real time maps to virtual time as
//! `elapsed × speed`.

use agent_runner_sdk::{
    async_trait, AgentSummary, ApprovalDecision, ApprovalPreview, RunConfig, RunError, RunId,
    RunNotification, RunResult, RunRuntime, RunSnapshot,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

use crate::agent::AgentDefinition;
use crate::controller::{RunController, DEFAULT_EVENT_CAPACITY};
use crate::history::{AgentMetrics, RunRecord};

const COMMAND_BUFFER: usize = 32;

/// Slowest accepted speed factor
pub const MIN_SPEED: f64 = 0.001;
/// Fastest accepted speed factor
pub const MAX_SPEED: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceOptions {
    /// Virtual milliseconds per real millisecond
    pub speed: f64,
    pub event_capacity: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

enum Command {
    Start {
        config: RunConfig,
        reply: oneshot::Sender<RunResult<RunId>>,
    },
    Decide {
        decision: ApprovalDecision,
        reply: oneshot::Sender<RunResult<()>>,
    },
    Cancel {
        reply: oneshot::Sender<RunResult<()>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<RunSnapshot>,
    },
    Preview {
        reply: oneshot::Sender<Option<ApprovalPreview>>,
    },
    History {
        limit: usize,
        reply: oneshot::Sender<Vec<RunRecord>>,
    },
    Metrics {
        reply: oneshot::Sender<AgentMetrics>,
    },
}

/// Handle to a running run service. Dropping every handle stops the task.
#[derive(Clone)]
pub struct RunService {
    agent: AgentSummary,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<RunNotification>,
}

impl RunService {
    /// Spawn the service task on the current tokio runtime
    pub fn spawn(agent: Arc<AgentDefinition>, options: ServiceOptions) -> Self {
        let controller = RunController::with_event_capacity(agent, options.event_capacity);
        Self::spawn_controller(controller, options.speed)
    }

    pub fn spawn_controller(controller: RunController, speed: f64) -> Self {
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let service = Self {
            agent: controller.agent().summary(),
            commands,
            events: controller.event_sender(),
        };

        let speed = if speed.is_finite() && speed > 0.0 {
            speed.clamp(MIN_SPEED, MAX_SPEED)
        } else {
            1.0
        };
        tokio::spawn(drive(controller, receiver, speed));
        service
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> RunResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| RunError::RuntimeClosed)?;
        response.await.map_err(|_| RunError::RuntimeClosed)
    }

    /// Finished runs, most recent first
    pub async fn history(&self, limit: usize) -> RunResult<Vec<RunRecord>> {
        self.request(|reply| Command::History { limit, reply }).await
    }

    pub async fn metrics(&self) -> RunResult<AgentMetrics> {
        self.request(|reply| Command::Metrics { reply }).await
    }
}

#[async_trait]
impl RunRuntime for RunService {
    fn agent(&self) -> &AgentSummary {
        &self.agent
    }

    async fn start(&self, config: RunConfig) -> RunResult<RunId> {
        self.request(|reply| Command::Start { config, reply }).await?
    }

    async fn decide(&self, decision: ApprovalDecision) -> RunResult<()> {
        self.request(|reply| Command::Decide { decision, reply })
            .await?
    }

    async fn cancel(&self) -> RunResult<()> {
        self.request(|reply| Command::Cancel { reply }).await?
    }

    async fn reset(&self) -> RunResult<()> {
        self.request(|reply| Command::Reset { reply }).await
    }

    async fn snapshot(&self) -> RunResult<RunSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    async fn approval_preview(&self) -> RunResult<Option<ApprovalPreview>> {
        self.request(|reply| Command::Preview { reply }).await
    }

    fn subscribe(&self) -> broadcast::Receiver<RunNotification> {
        self.events.subscribe()
    }
}

fn scaled(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

fn virtual_elapsed(origin: Instant, speed: f64) -> Duration {
    scaled(origin.elapsed().as_secs_f64() * speed)
}

fn real_offset(virtual_time: Duration, speed: f64) -> Duration {
    scaled(virtual_time.as_secs_f64() / speed)
}

async fn drive(mut controller: RunController, mut commands: mpsc::Receiver<Command>, speed: f64) {
    let origin = Instant::now();
    debug!(agent = %controller.agent().id, speed, "Run service started");

    loop {
        let deadline = controller.next_deadline();
        let wake = async {
            match deadline {
                Some(due) => match origin.checked_add(real_offset(due, speed)) {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                },
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                // Catch up first so the command sees every step that is already due
                controller.advance_to(virtual_elapsed(origin, speed));
                handle(&mut controller, command);
            }
            _ = wake => {
                // Float rounding may land just short of the deadline
                let now = virtual_elapsed(origin, speed);
                controller.advance_to(deadline.map_or(now, |due| now.max(due)));
            }
        }
    }

    debug!(agent = %controller.agent().id, "Run service stopped");
}

fn handle(controller: &mut RunController, command: Command) {
    // A caller that stopped waiting for its reply is not an error
    match command {
        Command::Start { config, reply } => {
            let _ = reply.send(controller.start(config));
        }
        Command::Decide { decision, reply } => {
            let _ = reply.send(controller.decide(decision));
        }
        Command::Cancel { reply } => {
            let _ = reply.send(controller.cancel());
        }
        Command::Reset { reply } => {
            controller.reset();
            let _ = reply.send(());
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(controller.snapshot());
        }
        Command::Preview { reply } => {
            let _ = reply.send(controller.approval_preview());
        }
        Command::History { limit, reply } => {
            let records = controller
                .history()
                .recent(limit)
                .into_iter()
                .cloned()
                .collect();
            let _ = reply.send(records);
        }
        Command::Metrics { reply } => {
            let agent_id = controller.agent().id.clone();
            let _ = reply.send(controller.history().metrics(&agent_id));
        }
    }
}
