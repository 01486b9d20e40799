// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent registry contract.
//!
//! The orchestrator only ever asks two questions of the registry: does this
//! agent exist, and how is it launched. Where the answers come from (a YAML
//! manifest, a static table in tests) is an infrastructure concern.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    /// Executable launched by the command runner. `None` for agents that only
    /// take part in bus conversations.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl AgentConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            timeout_secs: None,
            capabilities: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Failed to load agent registry: {0}")]
    Load(String),
}

#[async_trait]
pub trait AgentRegistry: Send + Sync {
    async fn get_agent_config(&self, name: &str) -> Result<AgentConfig, RegistryError>;

    async fn validate_agent_exists(&self, name: &str) -> bool;

    /// Re-read the backing source. The previous table stays in effect on error.
    async fn reload(&self) -> Result<(), RegistryError>;

    async fn list_agents(&self) -> Vec<String>;
}
