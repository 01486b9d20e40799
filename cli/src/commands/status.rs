// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Offline status report read straight from the state directory.

use anyhow::{Context, Result};
use colored::Colorize;
use hive_core::application::auto_acceptance::AutoAcceptanceProtocol;
use hive_core::application::consensus_engine::{ConsensusEngine, ConsensusEngineConfig};
use hive_core::application::state_engine::{StateEngine, StateEngineConfig};
use hive_core::domain::node_config::HiveConfig;
use std::collections::BTreeSet;
use std::path::PathBuf;

pub async fn show(config_path: Option<PathBuf>) -> Result<()> {
    let (config, _) =
        HiveConfig::load_or_default(config_path).context("Failed to load configuration")?;
    let storage = &config.spec.storage;

    let state = StateEngine::open(StateEngineConfig::from(storage));
    let consensus = ConsensusEngine::open(ConsensusEngineConfig::from_config(
        storage,
        &config.spec.consensus,
    ));
    let acceptance = AutoAcceptanceProtocol::open(storage.acceptance_file());

    println!(
        "{}",
        format!("Hive node {} ({})", config.spec.node.id, storage.state_dir.display()).bold()
    );
    println!();

    let metrics = state.metrics();
    println!("{}", "Tasks:".bold());
    println!("  Total:     {}", metrics.total_tasks);
    println!("  Completed: {}", metrics.completed_tasks.to_string().green());
    println!("  Failed:    {}", metrics.failed_tasks.to_string().red());
    println!("  Cancelled: {}", metrics.cancelled_tasks);
    println!("  Active:    {}", state.active_tasks().len());
    println!("  Avg duration: {:.2}s", metrics.avg_task_duration_secs);
    println!();

    let open = consensus.active_proposals();
    println!("{}", format!("Open proposals ({}):", open.len()).bold());
    for proposal in &open {
        println!(
            "  {}  {:<9} {} (by {}, {} votes)",
            proposal.id,
            format!("{:?}", proposal.strategy).to_lowercase(),
            proposal.title,
            proposal.proposer,
            proposal.votes.len()
        );
    }
    println!();

    let decided = consensus.recent_decisions();
    println!("{}", format!("Recent decisions ({}):", decided.len()).bold());
    for proposal in decided.iter().rev().take(10) {
        let result = match proposal.result {
            Some(result) => format!("{:?}", result).to_lowercase(),
            None => "-".to_string(),
        };
        println!("  {}  {:<9} {}", proposal.id, result, proposal.title);
    }
    println!();

    let agents: BTreeSet<String> = acceptance.thresholds().into_iter().map(|t| t.agent).collect();
    println!("{}", "Autonomy scores:".bold());
    for agent in agents {
        println!("  {:<10} {:.2}", agent, acceptance.get_brain_autonomy_score(&agent));
    }

    Ok(())
}
