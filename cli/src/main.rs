// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Hive CLI
//!
//! The `hive` binary runs a hive node and gives operators a window into it.
//!
//! ## Commands
//!
//! - `hive daemon` - Run the orchestrator loop until Ctrl-C or a HALT signal
//! - `hive task create|show|list` - Task operations (embedded mode)
//! - `hive status` - Print task metrics and open proposals from the state directory
//! - `hive decide` - Evaluate a decision against the autonomy thresholds
//! - `hive config show|validate|generate` - Configuration management

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use hive_core::domain::node_config::HiveConfig;
use hive_orchestrator::commands::{self, ConfigCommand, DecideArgs, TaskCommand};
use hive_orchestrator::logging::{init_logging, LogSettings};
use std::path::PathBuf;

/// Hive orchestrator - coordinate autonomous agents
#[derive(Parser)]
#[command(name = "hive")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "HIVE_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "HIVE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json)
    #[arg(long, global = true, env = "HIVE_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator in the foreground
    #[command(name = "daemon")]
    Daemon,

    /// Task operations
    #[command(name = "task")]
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Show task metrics and open proposals
    #[command(name = "status")]
    Status,

    /// Evaluate a decision without executing it
    #[command(name = "decide")]
    Decide(DecideArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config errors surface again, with context, in the command itself
    let config = HiveConfig::load_or_default(cli.config.clone()).ok().map(|(c, _)| c);
    init_logging(&LogSettings::resolve(cli.log_level, cli.log_format, config.as_ref()))?;

    match cli.command {
        Some(Commands::Daemon) => commands::daemon::run(cli.config).await,
        Some(Commands::Task { command }) => commands::task::handle_command(command, cli.config).await,
        Some(Commands::Status) => commands::status::show(cli.config).await,
        Some(Commands::Decide(args)) => commands::decide::run(args, cli.config).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}
