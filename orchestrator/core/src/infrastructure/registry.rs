// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent Registry Implementations
//!
//! - **InMemoryAgentRegistry** - fixed table, used by tests and embedded setups
//! - **ConfigAgentRegistry** - backed by the `agents` section of a
//!   [`HiveConfig`] manifest; `reload()` re-reads the file

use crate::domain::agent::{AgentConfig, AgentRegistry, RegistryError};
use crate::domain::node_config::HiveConfig;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

fn index(agents: Vec<AgentConfig>) -> HashMap<String, AgentConfig> {
    agents.into_iter().map(|a| (a.name.clone(), a)).collect()
}

#[derive(Default)]
pub struct InMemoryAgentRegistry {
    agents: RwLock<HashMap<String, AgentConfig>>,
}

impl InMemoryAgentRegistry {
    pub fn new(agents: Vec<AgentConfig>) -> Self {
        Self {
            agents: RwLock::new(index(agents)),
        }
    }

    /// Registry of command-less agents with the given names.
    pub fn with_names(names: &[&str]) -> Self {
        Self::new(names.iter().map(|n| AgentConfig::named(*n)).collect())
    }

    pub fn register(&self, agent: AgentConfig) {
        self.agents.write().insert(agent.name.clone(), agent);
    }
}

#[async_trait]
impl AgentRegistry for InMemoryAgentRegistry {
    async fn get_agent_config(&self, name: &str) -> Result<AgentConfig, RegistryError> {
        self.agents
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownAgent(name.to_string()))
    }

    async fn validate_agent_exists(&self, name: &str) -> bool {
        self.agents.read().contains_key(name)
    }

    async fn reload(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn list_agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().keys().cloned().collect();
        names.sort();
        names
    }
}

pub struct ConfigAgentRegistry {
    source: Option<PathBuf>,
    agents: RwLock<HashMap<String, AgentConfig>>,
}

impl ConfigAgentRegistry {
    /// `source` is the manifest path re-read on reload; `None` makes reload a no-op.
    pub fn new(config: &HiveConfig, source: Option<PathBuf>) -> Self {
        Self {
            source,
            agents: RwLock::new(index(config.spec.agents.clone())),
        }
    }
}

#[async_trait]
impl AgentRegistry for ConfigAgentRegistry {
    async fn get_agent_config(&self, name: &str) -> Result<AgentConfig, RegistryError> {
        self.agents
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownAgent(name.to_string()))
    }

    async fn validate_agent_exists(&self, name: &str) -> bool {
        self.agents.read().contains_key(name)
    }

    async fn reload(&self) -> Result<(), RegistryError> {
        let Some(path) = &self.source else {
            return Ok(());
        };
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RegistryError::Load(format!("{}: {}", path.display(), e)))?;
        let config = HiveConfig::from_yaml_str(&content)
            .map_err(|e| RegistryError::Load(format!("{}: {}", path.display(), e)))?;
        config
            .validate()
            .map_err(|e| RegistryError::Load(e.to_string()))?;

        let agents = index(config.spec.agents);
        info!(path = %path.display(), count = agents.len(), "Agent registry reloaded");
        *self.agents.write() = agents;
        Ok(())
    }

    async fn list_agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_in_memory_registry() {
        let registry = InMemoryAgentRegistry::with_names(&["codex", "kimi"]);
        assert!(registry.validate_agent_exists("codex").await);
        assert!(!registry.validate_agent_exists("nobody").await);
        assert!(matches!(
            registry.get_agent_config("nobody").await,
            Err(RegistryError::UnknownAgent(_))
        ));
        assert_eq!(registry.list_agents().await, vec!["codex", "kimi"]);
    }

    #[tokio::test]
    async fn test_config_registry_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hive-config.yaml");
        let mut config = HiveConfig::default();
        config.spec.agents.push(AgentConfig::named("codex"));
        config.to_yaml_file(&path).unwrap();

        let registry = ConfigAgentRegistry::new(&config, Some(path.clone()));
        assert!(!registry.validate_agent_exists("kimi").await);

        config.spec.agents.push(AgentConfig::named("kimi"));
        config.to_yaml_file(&path).unwrap();
        registry.reload().await.unwrap();
        assert!(registry.validate_agent_exists("kimi").await);

        std::fs::write(&path, "not: [valid").unwrap();
        assert!(registry.reload().await.is_err());
        // previous table survives a failed reload
        assert!(registry.validate_agent_exists("kimi").await);
    }
}
