//! Agent definitions: the fixed stage list a run walks through
//!
//! Definitions are YAML documents. One ships with the binary; more can be dropped into the
//! agents directory (see [`crate::discovery`]).

use agent_runner_sdk::{AgentSummary, RunError, RunResult, SettingChange, ToggleSchema};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

const CALLING_SETTINGS_TRANSFER: &str = include_str!("../agents/calling_settings_transfer.yaml");

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_log_interval_ms() -> u64 {
    800
}

/// One step of an agent's pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Stage blocks on a human decision once its work is done
    #[serde(default)]
    pub requires_approval: bool,
    /// Simulated work time before the stage completes (or asks for approval)
    #[serde(default)]
    pub work_ms: u64,
    /// Progress lines cycled while the stage is running
    #[serde(default)]
    pub progress: Vec<String>,
    /// Before/after rows shown at the approval gate
    #[serde(default)]
    pub preview: Vec<SettingChange>,
}

impl StageDefinition {
    pub fn work(&self) -> Duration {
        Duration::from_millis(self.work_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_log_interval_ms")]
    pub log_interval_ms: u64,
    #[serde(default)]
    pub toggles: Vec<ToggleSchema>,
    pub stages: Vec<StageDefinition>,
}

impl AgentDefinition {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let agent: AgentDefinition =
            serde_yaml::from_str(yaml).context("Failed to parse agent definition YAML")?;
        agent.validate()?;
        Ok(agent)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read agent definition {}", path.display()))?;
        Self::from_yaml_str(&yaml).with_context(|| format!("Invalid agent {}", path.display()))
    }

    /// Structural checks a definition must pass before a run can use it
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            bail!("agent id must not be empty");
        }
        if self.stages.is_empty() {
            bail!("agent '{}' defines no stages", self.id);
        }
        if self.log_interval_ms == 0 {
            bail!("agent '{}' has a zero log interval", self.id);
        }

        let mut stage_ids = HashSet::new();
        for stage in &self.stages {
            if !stage_ids.insert(stage.id.as_str()) {
                bail!("agent '{}' repeats stage id '{}'", self.id, stage.id);
            }
        }

        let mut toggle_names = HashSet::new();
        for toggle in &self.toggles {
            if !toggle_names.insert(toggle.name.as_str()) {
                bail!("agent '{}' repeats toggle '{}'", self.id, toggle.name);
            }
        }

        Ok(())
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_interval_ms)
    }

    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            stages: self.stages.iter().map(|s| s.name.clone()).collect(),
            toggles: self.toggles.clone(),
        }
    }

    /// Merge requested toggles over the declared defaults.
    ///
    /// A name the agent does not declare is a validation error.
    pub fn resolve_toggles(
        &self,
        requested: &BTreeMap<String, bool>,
    ) -> RunResult<BTreeMap<String, bool>> {
        let mut resolved: BTreeMap<String, bool> = self
            .toggles
            .iter()
            .map(|t| (t.name.clone(), t.default))
            .collect();

        for (name, value) in requested {
            match resolved.get_mut(name) {
                Some(slot) => *slot = *value,
                None => {
                    return Err(RunError::Validation(format!(
                        "agent '{}' has no toggle named '{}'",
                        self.id, name
                    )))
                }
            }
        }

        Ok(resolved)
    }
}

/// Definitions compiled into the binary
pub fn builtin_agents() -> Result<Vec<AgentDefinition>> {
    Ok(vec![AgentDefinition::from_yaml_str(
        CALLING_SETTINGS_TRANSFER,
    )?])
}
