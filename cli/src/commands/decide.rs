// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `hive decide`
//!
//! Runs a collective decision in-process. With no other agents on the bus an
//! escalated decision stays open as a proposal in the state directory, where
//! `hive status` lists it.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use hive_core::application::context::AppContext;
use hive_core::domain::acceptance::{ImpactLevel, TaskCategory};
use hive_core::domain::consensus::{ConsensusStrategy, ExpertiseDomain, ProposalContext};
use hive_core::domain::node_config::HiveConfig;
use hive_swarm::{DecisionRequest, Hive, HiveDecision};
use serde::de::DeserializeOwned;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct DecideArgs {
    /// Agent proposing the action
    #[arg(short, long)]
    pub agent: String,

    /// Task category (code_generation, code_review, refactoring, testing,
    /// documentation, architecture, security, deployment)
    #[arg(long, value_parser = parse_enum::<TaskCategory>)]
    pub category: TaskCategory,

    /// Action to decide on
    #[arg(long)]
    pub action: String,

    /// Proposer confidence in [0, 1]
    #[arg(long, default_value = "0.8")]
    pub confidence: f64,

    /// Impact (low, medium, high, critical)
    #[arg(long, default_value = "medium", value_parser = parse_enum::<ImpactLevel>)]
    pub impact: ImpactLevel,

    /// Why the action is needed
    #[arg(long, default_value = "")]
    pub justification: String,

    /// Consensus strategy if escalated (unanimous, majority, weighted, hybrid)
    #[arg(long, value_parser = parse_enum::<ConsensusStrategy>)]
    pub strategy: Option<ConsensusStrategy>,

    /// Expertise domain used by weighted voting
    #[arg(long, value_parser = parse_enum::<ExpertiseDomain>)]
    pub domain: Option<ExpertiseDomain>,

    /// Mark the proposal critical
    #[arg(long)]
    pub critical: bool,
}

impl DecideArgs {
    fn into_request(self) -> DecisionRequest {
        DecisionRequest {
            title: format!("{}: {}", self.agent, self.action),
            description: self.justification.clone(),
            proposer: self.agent,
            category: self.category,
            action: self.action,
            confidence: self.confidence,
            impact: self.impact,
            justification: self.justification,
            conditions: Vec::new(),
            strategy: self.strategy,
            context: ProposalContext {
                critical: self.critical,
                category: self.domain,
                ..Default::default()
            },
            auto_execute: false,
        }
    }
}

/// Parse a snake_case wire name (`code-review` is accepted too).
fn parse_enum<T: DeserializeOwned>(value: &str) -> Result<T, String> {
    let name = value.trim().to_lowercase().replace('-', "_");
    serde_json::from_value(serde_json::Value::String(name))
        .map_err(|_| format!("unrecognised value '{}'", value))
}

pub async fn run(args: DecideArgs, config_path: Option<PathBuf>) -> Result<()> {
    if !(0.0..=1.0).contains(&args.confidence) {
        anyhow::bail!("--confidence must be within [0, 1], got {}", args.confidence);
    }
    let (config, source) =
        HiveConfig::load_or_default(config_path).context("Failed to load configuration")?;
    let context = AppContext::build(config, source);
    let hive = Hive::from_context(&context);

    let outcome = hive.collective_decide(args.into_request()).await;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &HiveDecision) {
    let decision = &outcome.decision;
    println!("{}", format!("Decision {}", decision.id).bold());
    println!("  Agent:    {}", decision.agent);
    println!("  Category: {}", decision.category);
    println!("  Level:    {}", decision.level);
    println!("  Path:     {}", outcome.path.as_str());

    if let Some(proposal) = &outcome.proposal {
        println!("  Proposal: {} ({} votes)", proposal.id, proposal.votes.len());
    }

    if outcome.approved {
        println!("{}", "✓ Approved".green());
    } else if outcome.proposal.as_ref().is_some_and(|p| p.is_open()) {
        println!("{}", "… Awaiting votes".yellow());
    } else {
        println!("{}", "✗ Rejected".red());
    }
}
