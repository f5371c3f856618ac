use agent_runner_sdk::{AgentSummary, RunError, RunResult};
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::agent::{builtin_agents, AgentDefinition};

/// Agent definition loaded from disk, with the file it came from
#[derive(Debug, Clone)]
pub struct DiscoveredAgent {
    pub definition: AgentDefinition,
    pub path: PathBuf,
}

/// Scan a directory for `*.yaml` / `*.yml` agent definitions.
///
/// Unreadable or invalid files are skipped with a warning; a missing directory yields nothing.
pub fn discover_agents(dir: &Path) -> Vec<DiscoveredAgent> {
    let mut agents = Vec::new();

    if !dir.exists() {
        return agents;
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot read agents directory");
            return agents;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();

        if !path.is_file() || !is_yaml(&path) {
            continue;
        }

        match AgentDefinition::from_file(&path) {
            Ok(definition) => {
                debug!(agent = %definition.id, path = %path.display(), "Discovered agent");
                agents.push(DiscoveredAgent { definition, path });
            }
            Err(e) => warn!(path = %path.display(), error = %format!("{:#}", e), "Skipping agent definition"),
        }
    }

    // read_dir order is platform dependent
    agents.sort_by(|a, b| a.path.cmp(&b.path));
    agents
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false)
}

/// Every agent a run can be started for, keyed by id
#[derive(Debug, Clone, Default)]
pub struct AgentCatalog {
    agents: BTreeMap<String, Arc<AgentDefinition>>,
}

impl AgentCatalog {
    /// Built-in agents, overridden by same-id definitions found in `dir`
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut catalog = Self::default();
        for agent in builtin_agents()? {
            catalog.insert(agent);
        }

        if let Some(dir) = dir {
            for found in discover_agents(dir) {
                catalog.insert(found.definition);
            }
        }

        Ok(catalog)
    }

    pub fn insert(&mut self, agent: AgentDefinition) {
        self.agents.insert(agent.id.clone(), Arc::new(agent));
    }

    pub fn get(&self, id: &str) -> RunResult<Arc<AgentDefinition>> {
        self.agents
            .get(id)
            .cloned()
            .ok_or_else(|| RunError::UnknownAgent(id.to_string()))
    }

    pub fn summaries(&self) -> Vec<AgentSummary> {
        self.agents.values().map(|a| a.summary()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
