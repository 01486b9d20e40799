// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::application::auto_acceptance::AutoAcceptanceProtocol;
use crate::application::consensus_engine::{ConsensusEngine, ConsensusEngineConfig};
use crate::application::orchestrator::Orchestrator;
use crate::application::state_engine::{StateEngine, StateEngineConfig};
use crate::domain::agent::AgentRegistry;
use crate::domain::memory::MemoryStore;
use crate::domain::node_config::HiveConfig;
use crate::domain::runtime::AgentRunner;
use crate::infrastructure::memory_store::InMemoryMemoryStore;
use crate::infrastructure::registry::ConfigAgentRegistry;
use crate::infrastructure::runtime::CommandAgentRunner;
use crate::infrastructure::synaptic_bus::{BusSettings, SynapticBus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Every long-lived component of a node, built once from its [`HiveConfig`]
/// and shared by `Arc`.
pub struct AppContext {
    pub config: HiveConfig,
    pub config_path: Option<PathBuf>,
    pub state: Arc<StateEngine>,
    pub bus: Arc<SynapticBus>,
    pub consensus: Arc<ConsensusEngine>,
    pub acceptance: Arc<AutoAcceptanceProtocol>,
    pub registry: Arc<dyn AgentRegistry>,
    pub runner: Arc<dyn AgentRunner>,
    pub memory: Arc<dyn MemoryStore>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppContext {
    /// Open the persistent engines under `storage.state_dir` and wire the
    /// default adapters: config-backed registry, command runner, in-memory
    /// memory store.
    pub fn build(config: HiveConfig, config_path: Option<PathBuf>) -> Self {
        let spec = &config.spec;
        let registry: Arc<dyn AgentRegistry> =
            Arc::new(ConfigAgentRegistry::new(&config, config_path.clone()));
        let runner: Arc<dyn AgentRunner> = Arc::new(CommandAgentRunner::new(
            registry.clone(),
            Duration::from_secs(spec.orchestrator.task_timeout_secs),
        ));
        Self::with_adapters(config, config_path, registry, runner, Arc::new(InMemoryMemoryStore::new()))
    }

    /// Like [`AppContext::build`] with caller-supplied collaborators.
    pub fn with_adapters(
        config: HiveConfig,
        config_path: Option<PathBuf>,
        registry: Arc<dyn AgentRegistry>,
        runner: Arc<dyn AgentRunner>,
        memory: Arc<dyn MemoryStore>,
    ) -> Self {
        let spec = &config.spec;
        let state = Arc::new(StateEngine::open(StateEngineConfig::from(&spec.storage)));
        let bus = Arc::new(SynapticBus::new(BusSettings::from(&spec.bus)));
        let consensus = Arc::new(ConsensusEngine::open(ConsensusEngineConfig::from_config(
            &spec.storage,
            &spec.consensus,
        )));
        let acceptance = Arc::new(AutoAcceptanceProtocol::open(spec.storage.acceptance_file()));
        let orchestrator = Arc::new(Orchestrator::new(
            spec.orchestrator.clone(),
            state.clone(),
            bus.clone(),
            registry.clone(),
            runner.clone(),
        ));

        info!(
            node = %spec.node.id,
            state_dir = %spec.storage.state_dir.display(),
            agents = spec.agents.len(),
            "Application context ready"
        );

        Self {
            config,
            config_path,
            state,
            bus,
            consensus,
            acceptance,
            registry,
            runner,
            memory,
            orchestrator,
        }
    }

    /// Background pruning of dead bus connections, stopped by `shutdown`.
    pub fn spawn_bus_maintenance(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.spec.bus.maintenance_interval_secs);
        self.bus.spawn_maintenance(interval, shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_build_opens_engines_under_state_dir() {
        let dir = TempDir::new().unwrap();
        let mut config = HiveConfig::default();
        config.spec.storage.state_dir = dir.path().to_path_buf();

        let context = AppContext::build(config, None);
        assert!(context.bus.is_connected("orchestrator"));
        assert!(context.state.active_tasks().is_empty());
        // seeded thresholds are written on first open
        assert!(dir.path().join("acceptance_thresholds.json").exists());
        assert!(!context.acceptance.thresholds().is_empty());
    }
}
