//! CLI argument definitions for the agent runner.

use agent_runner_sdk::{ApprovalDecision, RunConfig};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::parse_speed;

/// Run staged AI agents with a human approval checkpoint
#[derive(Parser, Debug, Clone)]
#[command(name = "agent-runner")]
#[command(about = "Run staged AI agents with a human approval checkpoint")]
#[command(version)]
pub struct Cli {
    /// Directory with extra agent definitions (*.yaml)
    ///
    /// Overrides AGENT_RUNNER_AGENTS_DIR.
    #[arg(long, value_name = "DIR", global = true)]
    pub agents_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List available agents
    Agents,

    /// Run an agent and follow it stage by stage
    Run(RunArgs),

    /// Ask the assistant a question about an agent
    Ask(AskArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Agent id
    #[arg(long, default_value = "ch-1")]
    pub agent: String,

    /// Entity to read from, e.g. "John Doe (john@co.com)"
    #[arg(long)]
    pub source: String,

    /// Entity to write to
    #[arg(long)]
    pub target: String,

    /// Override a toggle, e.g. --toggle recording_agent_settings=true
    #[arg(long = "toggle", value_name = "NAME=BOOL", value_parser = parse_toggle)]
    pub toggles: Vec<(String, bool)>,

    /// Approve the review step without asking
    #[arg(long, conflicts_with = "reject")]
    pub approve: bool,

    /// Reject the review step without asking
    #[arg(long)]
    pub reject: bool,

    /// Simulation speed factor (2 = twice as fast)
    ///
    /// Overrides AGENT_RUNNER_SPEED.
    #[arg(long, value_parser = parse_speed_arg)]
    pub speed: Option<f64>,
}

impl RunArgs {
    /// Decision given on the command line, if any
    pub fn decision(&self) -> Option<ApprovalDecision> {
        if self.approve {
            Some(ApprovalDecision::Approved)
        } else if self.reject {
            Some(ApprovalDecision::Rejected)
        } else {
            None
        }
    }

    pub fn run_config(&self) -> RunConfig {
        self.toggles.iter().fold(
            RunConfig::new(self.source.clone(), self.target.clone()),
            |config, (name, enabled)| config.with_toggle(name.clone(), *enabled),
        )
    }
}

#[derive(Args, Debug, Clone)]
pub struct AskArgs {
    /// Agent id
    #[arg(long, default_value = "ch-1")]
    pub agent: String,

    /// Question for the assistant
    #[arg(short, long)]
    pub message: String,

    /// Source user to mention in the context
    #[arg(long)]
    pub source: Option<String>,

    /// Target user to mention in the context
    #[arg(long)]
    pub target: Option<String>,
}

/// `name=true` / `name=false` (also accepts on/off, yes/no, 1/0)
pub fn parse_toggle(value: &str) -> Result<(String, bool), String> {
    let (name, flag) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=BOOL, got '{}'", value))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("toggle name is empty".to_string());
    }

    let enabled = match flag.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => true,
        "false" | "off" | "no" | "0" => false,
        other => return Err(format!("'{}' is not a boolean", other)),
    };
    Ok((name.to_string(), enabled))
}

fn parse_speed_arg(value: &str) -> Result<f64, String> {
    parse_speed(value).map_err(|e| e.to_string())
}
