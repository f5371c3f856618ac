//! Environment-driven configuration

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

use crate::controller::DEFAULT_EVENT_CAPACITY;
use crate::runtime::{MAX_SPEED, MIN_SPEED};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Key for the upstream completions API; the chat proxy answers 500 without it
    pub api_key: Option<String>,
    pub model: String,
    pub api_url: String,
    /// Extra agent definitions are loaded from here
    pub agents_dir: Option<PathBuf>,
    /// Virtual milliseconds per real millisecond
    pub speed: f64,
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            agents_dir: default_agents_dir(),
            speed: 1.0,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Config {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Config::default();

        config.api_key = get("AI_AGENT_API_KEY");
        if let Some(model) = get("AI_AGENT_MODEL") {
            config.model = model;
        }
        if let Some(url) = get("AI_AGENT_API_URL") {
            config.api_url = url;
        }
        if let Some(dir) = get("AGENT_RUNNER_AGENTS_DIR") {
            config.agents_dir = Some(PathBuf::from(dir));
        }
        if let Some(speed) = get("AGENT_RUNNER_SPEED") {
            config.speed = parse_speed(&speed)
                .with_context(|| format!("Invalid AGENT_RUNNER_SPEED '{}'", speed))?;
        }
        if let Some(capacity) = get("AGENT_RUNNER_EVENT_CAPACITY") {
            config.event_capacity = capacity
                .parse::<usize>()
                .ok()
                .filter(|c| *c > 0)
                .with_context(|| format!("Invalid AGENT_RUNNER_EVENT_CAPACITY '{}'", capacity))?;
        }

        Ok(config)
    }
}

/// Speed factors must lie in `MIN_SPEED..=MAX_SPEED`
pub fn parse_speed(value: &str) -> Result<f64> {
    let speed: f64 = value.trim().parse().context("not a number")?;
    if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
        anyhow::bail!("speed must be between {} and {}", MIN_SPEED, MAX_SPEED);
    }
    Ok(speed)
}

/// `<data dir>/agents` for this application, when the platform has one
pub fn default_agents_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "agent-runner").map(|dirs| dirs.data_dir().join("agents"))
}
