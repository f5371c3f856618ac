//! System prompt for the Ask-AI assistant

use agent_runner_sdk::{RunSnapshot, SettingChange};
use serde::{Deserialize, Serialize};

use crate::agent::AgentDefinition;

/// Person named in a run identifier such as `"John Doe (john@co.com)"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserRef {
    pub fn parse(identifier: &str) -> Self {
        let identifier = identifier.trim();
        if let Some((name, rest)) = identifier.split_once(" (") {
            if let Some(email) = rest.strip_suffix(')') {
                return Self {
                    name: name.trim().to_string(),
                    email: Some(email.trim().to_string()),
                };
            }
        }
        Self {
            name: identifier.to_string(),
            email: None,
        }
    }

    fn describe(&self) -> String {
        match &self.email {
            Some(email) => format!("{} ({})", self.name, email),
            None => self.name.clone(),
        }
    }
}

/// Run status as the assistant sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings_changed_count: Option<usize>,
}

/// Everything the prompt is built from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptContext {
    pub agent_name: String,
    pub agent_description: String,
    pub source: Option<UserRef>,
    pub target: Option<UserRef>,
    pub run: Option<RunContext>,
    /// Comparison rows of the agent's approval stages
    pub changes: Vec<SettingChange>,
}

impl PromptContext {
    pub fn for_agent(agent: &AgentDefinition) -> Self {
        Self {
            agent_name: agent.name.clone(),
            agent_description: agent.description.clone(),
            changes: agent
                .stages
                .iter()
                .filter(|s| s.requires_approval)
                .flat_map(|s| s.preview.iter().cloned())
                .collect(),
            ..Self::default()
        }
    }

    /// Fill in users and run status from a snapshot
    pub fn with_run(mut self, snapshot: &RunSnapshot) -> Self {
        if let Some(config) = &snapshot.config {
            self.source = Some(UserRef::parse(&config.source));
            self.target = Some(UserRef::parse(&config.target));
        }
        self.run = Some(RunContext {
            id: snapshot.id.map(|id| id.to_string()),
            status: snapshot.phase.to_string(),
            settings_changed_count: snapshot.summary.as_ref().map(|s| s.settings_updated),
        });
        self
    }
}

pub fn build_system_prompt(ctx: &PromptContext) -> String {
    let mut parts: Vec<String> = vec![
        "You are an AI assistant embedded in the agent console, helping IT administrators understand and safely use AI agents.".to_string(),
        format!("\nCurrent Agent: \"{}\"", ctx.agent_name),
    ];
    if !ctx.agent_description.is_empty() {
        parts.push(ctx.agent_description.clone());
    }

    if let (Some(source), Some(target)) = (&ctx.source, &ctx.target) {
        parts.push(format!("\nSource User: {}", source.describe()));
        parts.push(format!("Target User: {}", target.describe()));
    }

    if let Some(run) = &ctx.run {
        parts.push(format!("\nRun Status: {}", run.status));
        if let Some(id) = &run.id {
            parts.push(format!("Run ID: {}", id));
        }
        if let Some(count) = run.settings_changed_count {
            parts.push(format!("Settings Changed: {}", count));
        }
    }

    let changed: Vec<&SettingChange> = ctx.changes.iter().filter(|c| c.is_changed()).collect();
    if !changed.is_empty() {
        parts.push("\nSettings Changes Preview:".to_string());
        for change in &changed {
            let flag = if change.sensitive { " ⚠️ SENSITIVE" } else { "" };
            parts.push(format!(
                "  - {}: \"{}\" → \"{}\"{}",
                change.setting, change.current_value, change.new_value, flag
            ));
        }

        let sensitive = changed.iter().filter(|c| c.sensitive).count();
        if sensitive > 0 {
            parts.push(format!(
                "\n⚠️ {} sensitive setting(s) will be changed. Pay special attention to these.",
                sensitive
            ));
        }
    }

    parts.extend(
        [
            "\n\nYour Role:",
            "- Explain what this agent does and how it affects users",
            "- Help interpret the approval preview and the proposed changes",
            "- Answer questions about settings, transfers, and potential impacts",
            "- Provide guidance on when to approve or reject changes",
            "\n⚠️ CRITICAL LIMITATIONS:",
            "- You CANNOT execute, run, approve, or apply any changes",
            "- You CANNOT access real user data beyond what is shown in this context",
            "- Starting a run, approving and rejecting are done by the operator through the run controls",
            "- If the user asks you to run, approve, or apply changes, redirect them to the run controls instead",
            "\nAlways remind users that you are here for guidance and explanation only.",
        ]
        .map(str::to_string),
    );

    parts.join("\n")
}
