// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Collective Decision Types
//!
//! - [`DecisionRequest`]: what an agent asks the hive to decide
//! - [`HiveQuery`]: content of the QUERY messages fanned out to peers
//! - [`VoteReply`]: content of a peer's RESPONSE to a vote query
//! - [`HiveDecision`]: the outcome handed back to the caller
//! - [`ActionExecutor`]: port used to carry out approved actions

use async_trait::async_trait;
use hive_core::application::auto_acceptance::AcceptanceRequest;
use hive_core::domain::acceptance::{AutoDecision, ImpactLevel, TaskCategory};
use hive_core::domain::consensus::{
    ConsensusProposal, ConsensusStrategy, ProposalContext, ProposalId, VoteType,
};
use hive_core::domain::memory::MemoryId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Memory type under which decision summaries are stored.
pub const DECISION_MEMORY_TYPE: &str = "collective_decision";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    /// Agent asking for the decision; also the consensus proposer.
    pub proposer: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: TaskCategory,
    /// Action carried out when the decision is approved.
    pub action: String,
    pub confidence: f64,
    pub impact: ImpactLevel,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub conditions: Vec<String>,
    /// Falls back to the configured default strategy.
    #[serde(default)]
    pub strategy: Option<ConsensusStrategy>,
    #[serde(default)]
    pub context: ProposalContext,
    /// Run the action through the executor once approved.
    #[serde(default)]
    pub auto_execute: bool,
}

impl DecisionRequest {
    pub fn acceptance_request(&self) -> AcceptanceRequest {
        AcceptanceRequest {
            agent: self.proposer.clone(),
            category: self.category,
            action: self.action.clone(),
            confidence: self.confidence,
            impact: self.impact,
            justification: self.justification.clone(),
            conditions: self.conditions.clone(),
        }
    }
}

/// Content of a hive QUERY.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum HiveQuery {
    Thought {
        topic: String,
        content: Value,
    },
    Vote {
        proposal_id: ProposalId,
        title: String,
        description: String,
        proposer: String,
        strategy: ConsensusStrategy,
        #[serde(default)]
        context: ProposalContext,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteReply {
    pub vote: VoteType,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub conditions: Vec<String>,
}

/// How the decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPath {
    /// The proposer's autonomy threshold allowed it to act alone.
    Autonomous,
    /// Escalated to a group vote.
    Consensus,
}

impl DecisionPath {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionPath::Autonomous => "autonomous",
            DecisionPath::Consensus => "consensus",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiveDecision {
    pub decision: AutoDecision,
    pub path: DecisionPath,
    /// Present on the consensus path. Still `voting` when the vote timed out
    /// without reaching consensus.
    pub proposal: Option<ConsensusProposal>,
    pub approved: bool,
    pub execution: Option<ExecutionOutcome>,
    /// Summary stored in the memory store, if the write succeeded.
    pub memory_id: Option<MemoryId>,
}

impl HiveDecision {
    pub fn executed(&self) -> bool {
        self.execution.is_some()
    }
}

#[derive(Debug, Error)]
pub enum HiveError {
    #[error("Agent {0} is not connected to the bus")]
    NotConnected(String),
}

/// Carries out an approved action. Errors count as failed executions.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, decision: &AutoDecision) -> anyhow::Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_wire_format() {
        let query = HiveQuery::Thought {
            topic: "naming".to_string(),
            content: json!("crate names"),
        };
        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value["query"], "thought");
        assert_eq!(value["topic"], "naming");
    }

    #[test]
    fn test_vote_reply_defaults() {
        let reply: VoteReply = serde_json::from_value(json!({"vote": "approve", "confidence": 0.7})).unwrap();
        assert_eq!(reply.vote, VoteType::Approve);
        assert!(reply.reasoning.is_empty());
    }
}
