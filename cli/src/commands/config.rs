// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use hive_core::domain::agent::AgentConfig;
use hive_core::domain::node_config::{
    HiveConfig, LoggingConfig, MetricsConfig, ObservabilityConfig,
};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./hive-config.yaml)
        #[arg(short, long, default_value = "./hive-config.yaml")]
        output: PathBuf,

        /// Include sample agents and observability settings
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(&output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let (config, source) = HiveConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. HIVE_CONFIG_PATH: {}",
            std::env::var("HIVE_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./hive-config.yaml");
        println!("  4. ~/.hive/config.yaml");
        println!("  5. /etc/hive/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    match &source {
        Some(path) => println!("  Source: {}", path.display()),
        None => println!("  Source: {}", "(built-in defaults)".dimmed()),
    }
    println!();

    let spec = &config.spec;
    println!("{}", "Node Identity:".bold());
    println!("  ID: {}", spec.node.id);
    if !spec.node.tags.is_empty() {
        println!("  Tags: {}", spec.node.tags.join(", "));
    }
    println!();

    println!("{}", "Storage:".bold());
    println!("  State dir: {}", spec.storage.state_dir.display());
    println!("  Backups kept: {}", spec.storage.max_backups);
    println!("  History limit: {}", spec.storage.history_limit);
    println!();

    println!("{}", "Orchestrator:".bold());
    println!("  Bus identity: {}", spec.orchestrator.agent_id);
    println!("  Task timeout: {}s", spec.orchestrator.task_timeout_secs);
    println!("  Default max retries: {}", spec.orchestrator.default_max_retries);
    println!();

    println!("{}", "Consensus:".bold());
    println!("  Default strategy: {:?}", spec.consensus.default_strategy);
    println!("  Vote timeout: {}ms", spec.consensus.vote_timeout_ms);
    println!();

    println!("{}", "Agents:".bold());
    if spec.agents.is_empty() {
        println!("  {}", "(none registered)".dimmed());
    }
    for agent in &spec.agents {
        let command = agent.command.as_deref().unwrap_or("(not runnable)");
        println!("  {} → {}", agent.name.bold(), command);
        if !agent.capabilities.is_empty() {
            println!("    Capabilities: {}", agent.capabilities.join(", "));
        }
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let (config, _) = HiveConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: &Path, with_examples: bool) -> Result<()> {
    sample_config(with_examples)
        .to_yaml_file(output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

fn sample_config(with_examples: bool) -> HiveConfig {
    let mut config = HiveConfig::default();
    if !with_examples {
        return config;
    }

    let mut claude = AgentConfig::named("claude");
    claude.command = Some("claude".to_string());
    claude.args = vec!["--print".to_string()];
    claude.capabilities = vec!["architecture".to_string(), "review".to_string()];

    let mut codex = AgentConfig::named("codex");
    codex.command = Some("codex".to_string());
    codex.args = vec!["exec".to_string(), "-".to_string()];
    codex.timeout_secs = Some(600);
    codex.capabilities = vec!["implementation".to_string()];

    config.spec.agents = vec![claude, codex];
    config.spec.observability = Some(ObservabilityConfig {
        logging: Some(LoggingConfig {
            level: "info".to_string(),
            format: "json".to_string(),
        }),
        metrics: Some(MetricsConfig {
            enabled: true,
            port: 9091,
        }),
    });
    config
}
