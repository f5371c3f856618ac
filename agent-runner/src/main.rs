use agent_runner::chat::{AskAiSession, ChatProxy, OpenAiClient, PromptContext, UserRef};
use agent_runner::cli::{AskArgs, Cli, Command, RunArgs};
use agent_runner::config::Config;
use agent_runner::discovery::AgentCatalog;
use agent_runner::history::health_line;
use agent_runner::runtime::{RunService, ServiceOptions};
use agent_runner_sdk::{
    format_duration_ms, log_approval_row, log_failure, log_info, log_stage_complete_console,
    log_stage_line, log_stage_start_console, log_warning, ApprovalDecision, RunEvent,
    RunNotification, RunPhase, RunRuntime,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, stdout carries the run view
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agent_runner=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let agents_dir = cli.agents_dir.clone().or_else(|| config.agents_dir.clone());
    let catalog = AgentCatalog::load(agents_dir.as_deref())?;

    match cli.command {
        Command::Agents => {
            list_agents(&catalog);
            Ok(())
        }
        Command::Run(args) => run_agent(&catalog, &config, args).await,
        Command::Ask(args) => ask_agent(&catalog, &config, args).await,
    }
}

fn list_agents(catalog: &AgentCatalog) {
    if catalog.is_empty() {
        log_warning!("No agents found");
        return;
    }

    for agent in catalog.summaries() {
        println!("\x1b[1m{}\x1b[0m  {} v{}", agent.id, agent.name, agent.version);
        if !agent.description.is_empty() {
            println!("  {}", agent.description);
        }
        println!("  Stages: {}", agent.stages.join(" → "));
        for toggle in &agent.toggles {
            println!(
                "  [{}] {} ({})",
                if toggle.default { "x" } else { " " },
                toggle.label,
                toggle.name
            );
        }
    }
}

async fn run_agent(catalog: &AgentCatalog, config: &Config, args: RunArgs) -> Result<()> {
    let agent = catalog.get(&args.agent)?;
    let total = agent.stages.len();
    let service = RunService::spawn(
        agent.clone(),
        ServiceOptions {
            speed: args.speed.unwrap_or(config.speed),
            event_capacity: config.event_capacity,
        },
    );

    let mut events = service.subscribe();
    let run_id = service
        .start(args.run_config())
        .await
        .context("Failed to start run")?;
    log_info!("{} started (run {})", agent.name, run_id);

    loop {
        let notification = tokio::select! {
            received = events.recv() => received,
            _ = tokio::signal::ctrl_c() => {
                log_warning!("Interrupted, cancelling run");
                if let Err(e) = service.cancel().await {
                    tracing::debug!(error = %e, "Cancel after interrupt");
                }
                continue;
            }
        };

        let notification = match notification {
            Ok(notification) => notification,
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Run view fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        print_event(&notification, total);

        match &notification.event {
            RunEvent::ApprovalRequested { .. } => {
                if let Some(preview) = service.approval_preview().await? {
                    println!();
                    for change in &preview.changes {
                        log_approval_row!(
                            change.setting,
                            change.current_value,
                            change.new_value,
                            change.is_changed(),
                            change.sensitive
                        );
                    }
                    println!();
                }

                let decision = match args.decision() {
                    Some(decision) => decision,
                    None => {
                        tokio::select! {
                            decision = prompt_decision() => decision?,
                            _ = tokio::signal::ctrl_c() => {
                                log_warning!("Interrupted, cancelling run");
                                service.cancel().await?;
                                continue;
                            }
                        }
                    }
                };
                service.decide(decision).await?;
            }
            RunEvent::RunFinished { .. } => break,
            _ => {}
        }
    }

    let metrics = service.metrics().await?;
    tracing::debug!(runs = metrics.total_runs, "Run history updated");
    log_info!(health_line(&metrics, chrono::Utc::now()));
    Ok(())
}

fn print_event(notification: &RunNotification, total: usize) {
    let event = &notification.event;
    match event {
        RunEvent::StageStarted { index, name, .. } => {
            log_stage_start_console!(index + 1, total, name);
        }
        RunEvent::StageLog { line, .. } => {
            log_stage_line!(line);
        }
        RunEvent::StageCompleted {
            name, duration_ms, ..
        } => {
            log_stage_complete_console!(name, format_duration_ms(*duration_ms));
        }
        RunEvent::ApprovalRequested { .. } => {
            log_warning!(event.message());
        }
        RunEvent::StageFailed { .. } => {
            log_failure!(event.message());
        }
        RunEvent::RunFinished { phase, .. } => match (phase, &notification.snapshot.summary) {
            (RunPhase::Completed, Some(summary)) => {
                log_info!(
                    "Transfer complete: {} settings moved from {} to {} in {}",
                    summary.settings_updated,
                    summary.source_name,
                    summary.target_name,
                    format_duration_ms(summary.duration.as_millis() as u64)
                );
            }
            _ => {
                log_failure!(event.message());
            }
        },
        RunEvent::RunStarted { .. } | RunEvent::ApprovalDecided { .. } => {
            log_info!(event.message());
        }
        RunEvent::RunReset => {}
    }
}

/// Ask on stdin until the answer is yes or no. End of input rejects.
async fn prompt_decision() -> Result<ApprovalDecision> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("Approve & apply these changes? [y/n] ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            return Ok(ApprovalDecision::Rejected);
        };
        match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => return Ok(ApprovalDecision::Approved),
            "n" | "no" => return Ok(ApprovalDecision::Rejected),
            _ => continue,
        }
    }
}

async fn ask_agent(catalog: &AgentCatalog, config: &Config, args: AskArgs) -> Result<()> {
    let agent = catalog.get(&args.agent)?;

    let mut context = PromptContext::for_agent(&agent);
    if let (Some(source), Some(target)) = (&args.source, &args.target) {
        context.source = Some(UserRef::parse(source));
        context.target = Some(UserRef::parse(target));
    }

    let client = Arc::new(OpenAiClient::new(config.api_url.clone()));
    let proxy = Arc::new(ChatProxy::from_config(client, config));
    let mut session = AskAiSession::new(proxy, context);

    let reply = session.ask(&args.message).await;
    println!("{}", reply.content);
    Ok(())
}
