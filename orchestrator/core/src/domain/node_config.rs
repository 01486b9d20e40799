// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Hive Configuration Types
//
// Defines the configuration schema for a hive node, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - State storage layout and backup retention
// - Synaptic bus sizing and liveness
// - Orchestrator loop, consensus thresholds and the agent table

use crate::domain::agent::AgentConfig;
use crate::domain::consensus::{ConsensusRules, ConsensusStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "HiveConfig";

/// Top-level Kubernetes-style hive configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiveConfig {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "HiveConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: HiveConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiveConfigSpec {
    pub node: NodeIdentity,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Agents known to the registry
    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Stable node identifier (UUID recommended)
    pub id: String,

    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for task state, backups, proposals and thresholds
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Timestamped backups kept next to the task state file
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    /// Terminal tasks kept in the persisted history
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Backups tried, newest first, when the primary file is corrupt
    #[serde(default = "default_restore_attempts")]
    pub restore_attempts: usize,

    /// Decided proposals kept in memory (disk keeps them all)
    #[serde(default = "default_recent_decisions")]
    pub recent_decisions: usize,
}

impl StorageConfig {
    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("task_state.json")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.state_dir.join("backups")
    }

    pub fn consensus_dir(&self) -> PathBuf {
        self.state_dir.join("consensus")
    }

    pub fn acceptance_file(&self) -> PathBuf {
        self.state_dir.join("acceptance_thresholds.json")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            max_backups: default_max_backups(),
            history_limit: default_history_limit(),
            restore_attempts: default_restore_attempts(),
            recent_decisions: default_recent_decisions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-agent inbox bound; further messages are dropped and counted
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,

    /// Global replay ring size; oldest entries are evicted
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,

    /// An agent is live while its last heartbeat is younger than this
    #[serde(default = "default_liveness_window")]
    pub liveness_window_secs: u64,

    /// Period of the dead-connection sweep
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,

    #[serde(default = "default_message_ttl")]
    pub default_ttl_secs: u64,

    /// Receive slice used while a query waits for its correlated reply
    #[serde(default = "default_query_poll_interval")]
    pub query_poll_interval_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: default_inbox_capacity(),
            replay_capacity: default_replay_capacity(),
            liveness_window_secs: default_liveness_window(),
            maintenance_interval_secs: default_maintenance_interval(),
            default_ttl_secs: default_message_ttl(),
            query_poll_interval_ms: default_query_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Bus identity of the dispatch loop
    #[serde(default = "default_orchestrator_id")]
    pub agent_id: String,

    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_ms: u64,

    /// Upper bound on a single runner invocation
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Pending tasks re-executed on WAKE_UP
    #[serde(default = "default_wake_up_batch")]
    pub wake_up_batch: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            agent_id: default_orchestrator_id(),
            receive_timeout_ms: default_receive_timeout(),
            task_timeout_secs: default_task_timeout(),
            default_max_retries: default_max_retries(),
            wake_up_batch: default_wake_up_batch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default)]
    pub rules: ConsensusRules,

    /// Strategy used by collective decisions that don't name one
    #[serde(default = "default_strategy")]
    pub default_strategy: ConsensusStrategy,

    /// How long a collective decision waits for votes
    #[serde(default = "default_vote_timeout")]
    pub vote_timeout_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            rules: ConsensusRules::default(),
            default_strategy: default_strategy(),
            vote_timeout_ms: default_vote_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_true() -> bool {
    true
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".hive")
}

fn default_max_backups() -> usize {
    10
}

fn default_history_limit() -> usize {
    100
}

fn default_restore_attempts() -> usize {
    3
}

fn default_recent_decisions() -> usize {
    100
}

fn default_inbox_capacity() -> usize {
    1000
}

fn default_replay_capacity() -> usize {
    1000
}

fn default_liveness_window() -> u64 {
    30
}

fn default_maintenance_interval() -> u64 {
    10
}

fn default_message_ttl() -> u64 {
    300
}

fn default_query_poll_interval() -> u64 {
    100
}

fn default_orchestrator_id() -> String {
    "orchestrator".to_string()
}

fn default_receive_timeout() -> u64 {
    1000
}

fn default_task_timeout() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_wake_up_batch() -> usize {
    5
}

fn default_strategy() -> ConsensusStrategy {
    ConsensusStrategy::Hybrid
}

fn default_vote_timeout() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for HiveConfigSpec {
    fn default() -> Self {
        Self {
            node: NodeIdentity {
                id: uuid::Uuid::new_v4().to_string(),
                tags: vec![],
            },
            storage: StorageConfig::default(),
            bus: BusConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            consensus: ConsensusConfig::default(),
            agents: vec![],
            observability: None,
        }
    }
}

impl Default for HiveConfig {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "hive-node".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: HiveConfigSpec::default(),
        }
    }
}

impl HiveConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. HIVE_CONFIG_PATH environment variable
    /// 2. ./hive-config.yaml (working directory)
    /// 3. ~/.hive/config.yaml (user home)
    /// 4. /etc/hive/config.yaml (system, Unix) or C:\ProgramData\Hive\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("HIVE_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./hive-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".hive").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/hive/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Hive\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default.
    ///
    /// Returns the path the manifest was read from, if any, so the agent
    /// registry can re-read it on reload.
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok((config, Some(path)));
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(&config_path)?;
            config.apply_env_overrides();
            Ok((config, Some(config_path)))
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok((config, None))
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HIVE_STATE_DIR") {
            if val.is_empty() {
                tracing::warn!("Ignoring empty HIVE_STATE_DIR");
            } else {
                tracing::info!("Environment override: HIVE_STATE_DIR={}", val);
                self.spec.storage.state_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = std::env::var("HIVE_LIVENESS_WINDOW_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => {
                    tracing::info!("Environment override: HIVE_LIVENESS_WINDOW_SECS={}", secs);
                    self.spec.bus.liveness_window_secs = secs;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for HIVE_LIVENESS_WINDOW_SECS: '{}'. Expected seconds. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.node.id.is_empty() {
            anyhow::bail!("spec.node.id cannot be empty");
        }

        let bus = &self.spec.bus;
        if bus.inbox_capacity == 0 || bus.replay_capacity == 0 {
            anyhow::bail!("spec.bus capacities must be greater than zero");
        }
        if bus.liveness_window_secs == 0 {
            anyhow::bail!("spec.bus.liveness_window_secs must be greater than zero");
        }
        if bus.maintenance_interval_secs == 0 {
            anyhow::bail!("spec.bus.maintenance_interval_secs must be greater than zero");
        }
        if bus.query_poll_interval_ms == 0 {
            anyhow::bail!("spec.bus.query_poll_interval_ms must be greater than zero");
        }

        if self.spec.orchestrator.agent_id.is_empty() {
            anyhow::bail!("spec.orchestrator.agent_id cannot be empty");
        }

        let rules = &self.spec.consensus.rules;
        for (name, value) in [
            ("weighted_threshold", rules.weighted_threshold),
            ("hybrid_auto_approve", rules.hybrid_auto_approve),
            ("hybrid_auto_reject", rules.hybrid_auto_reject),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("spec.consensus.rules.{} must be within [0, 1], got {}", name, value);
            }
        }
        if rules.hybrid_auto_reject >= rules.hybrid_auto_approve {
            anyhow::bail!("spec.consensus.rules.hybrid_auto_reject must be below hybrid_auto_approve");
        }
        if rules.unanimous_quorum < 2 {
            anyhow::bail!("spec.consensus.rules.unanimous_quorum must be at least 2");
        }

        let mut seen = std::collections::HashSet::new();
        for agent in &self.spec.agents {
            if agent.name.is_empty() {
                anyhow::bail!("Agent name cannot be empty");
            }
            if agent.name == self.spec.orchestrator.agent_id {
                anyhow::bail!("Agent name '{}' is reserved for the orchestrator", agent.name);
            }
            if !seen.insert(agent.name.as_str()) {
                anyhow::bail!("Duplicate agent: {}", agent.name);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = HiveConfig::default();
        assert_eq!(manifest.api_version, "100monkeys.ai/v1");
        assert_eq!(manifest.kind, "HiveConfig");
        assert!(!manifest.metadata.name.is_empty());
        assert_eq!(manifest.spec.bus.liveness_window_secs, 30);
        assert_eq!(manifest.spec.storage.max_backups, 10);
        assert!(manifest.spec.agents.is_empty());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
apiVersion: 100monkeys.ai/v1
kind: HiveConfig
metadata:
  name: test-hive
spec:
  node:
    id: "550e8400-e29b-41d4-a716-446655440000"
  storage:
    state_dir: /var/lib/hive
  consensus:
    rules:
      unanimous_quorum: 3
  agents:
    - name: codex
      command: codex
      args: ["exec", "--json"]
      timeout_secs: 120
    - name: kimi
"#;
        let parsed = HiveConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(parsed.metadata.name, "test-hive");
        assert_eq!(parsed.spec.storage.state_file(), PathBuf::from("/var/lib/hive/task_state.json"));
        assert_eq!(parsed.spec.storage.history_limit, 100);
        assert_eq!(parsed.spec.consensus.rules.unanimous_quorum, 3);
        assert_eq!(parsed.spec.consensus.rules.majority_approve, 3);
        assert_eq!(parsed.spec.consensus.default_strategy, ConsensusStrategy::Hybrid);
        assert_eq!(parsed.spec.agents.len(), 2);
        assert_eq!(parsed.spec.agents[0].args, vec!["exec", "--json"]);
        assert!(parsed.spec.agents[1].command.is_none());
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut manifest = HiveConfig::default();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.consensus.rules.weighted_threshold = 1.5;
        assert!(manifest.validate().is_err());
        manifest.spec.consensus.rules.weighted_threshold = 0.7;

        manifest.spec.agents.push(AgentConfig::named("orchestrator"));
        assert!(manifest.validate().is_err());
        manifest.spec.agents.clear();

        manifest.spec.agents.push(AgentConfig::named("codex"));
        manifest.spec.agents.push(AgentConfig::named("codex"));
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_zero_bus_intervals_are_rejected() {
        let mut manifest = HiveConfig::default();
        manifest.spec.bus.maintenance_interval_secs = 0;
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("maintenance_interval_secs"));

        manifest.spec.bus.maintenance_interval_secs = 10;
        manifest.spec.bus.query_poll_interval_ms = 0;
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("query_poll_interval_ms"));

        manifest.spec.bus.query_poll_interval_ms = 25;
        assert!(manifest.validate().is_ok());
    }
}
