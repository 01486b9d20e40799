// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Hive
//!
//! Collective consciousness over the synaptic bus: fans thoughts out to every
//! connected agent and turns decision requests into either an autonomous
//! action or a group vote.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Compose acceptance, consensus, bus and memory into collective decisions

use crate::domain::{
    ActionExecutor, DecisionPath, DecisionRequest, ExecutionOutcome, HiveDecision, HiveError,
    HiveQuery, VoteReply, DECISION_MEMORY_TYPE,
};
use hive_core::application::auto_acceptance::AutoAcceptanceProtocol;
use hive_core::application::consensus_engine::ConsensusEngine;
use hive_core::application::context::AppContext;
use hive_core::domain::acceptance::AutoDecision;
use hive_core::domain::consensus::{ConsensusStrategy, ProposalId, ProposalResult};
use hive_core::domain::memory::{MemoryEntry, MemoryId, MemoryStore};
use hive_core::domain::message::{MessageType, SynapticMessage};
use hive_core::infrastructure::synaptic_bus::SynapticBus;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct HiveSettings {
    /// Prefix of the bus identities used while collecting votes. Each vote
    /// connects as `<agent_id>-<uuid>` so concurrent decisions stay apart.
    pub agent_id: String,
    pub vote_timeout: Duration,
    pub default_strategy: ConsensusStrategy,
    /// Connected agents that never answer queries, e.g. the orchestrator.
    pub silent_agents: Vec<String>,
}

impl Default for HiveSettings {
    fn default() -> Self {
        Self {
            agent_id: "hive".to_string(),
            vote_timeout: Duration::from_secs(5),
            default_strategy: ConsensusStrategy::Hybrid,
            silent_agents: Vec::new(),
        }
    }
}

pub struct Hive {
    bus: Arc<SynapticBus>,
    consensus: Arc<ConsensusEngine>,
    acceptance: Arc<AutoAcceptanceProtocol>,
    memory: Arc<dyn MemoryStore>,
    executor: Option<Arc<dyn ActionExecutor>>,
    settings: HiveSettings,
}

impl Hive {
    pub fn new(
        bus: Arc<SynapticBus>,
        consensus: Arc<ConsensusEngine>,
        acceptance: Arc<AutoAcceptanceProtocol>,
        memory: Arc<dyn MemoryStore>,
        settings: HiveSettings,
    ) -> Self {
        Self {
            bus,
            consensus,
            acceptance,
            memory,
            executor: None,
            settings,
        }
    }

    /// Share the engines of an application context.
    pub fn from_context(context: &AppContext) -> Self {
        let consensus = &context.config.spec.consensus;
        Self::new(
            context.bus.clone(),
            context.consensus.clone(),
            context.acceptance.clone(),
            context.memory.clone(),
            HiveSettings {
                vote_timeout: Duration::from_millis(consensus.vote_timeout_ms),
                default_strategy: consensus.default_strategy,
                silent_agents: vec![context.orchestrator.agent_id().to_string()],
                ..Default::default()
            },
        )
    }

    pub fn with_executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Broadcast a thought from `from` and gather the RESPONSE messages that
    /// answer it, until every live peer has replied or `timeout` elapses.
    pub async fn broadcast_thought(
        &self,
        from: &str,
        topic: &str,
        content: serde_json::Value,
        timeout: Duration,
    ) -> Result<Vec<SynapticMessage>, HiveError> {
        if !self.bus.is_connected(from) {
            return Err(HiveError::NotConnected(from.to_string()));
        }
        let query = HiveQuery::Thought {
            topic: topic.to_string(),
            content,
        };
        let responses = self.fan_out(from, &query, timeout).await;
        info!(from, topic, responses = responses.len(), "Thought broadcast settled");
        Ok(responses)
    }

    /// Evaluate the request against the proposer's autonomy threshold; act
    /// alone when allowed, otherwise put it to a vote. The outcome is
    /// summarised into the memory store.
    pub async fn collective_decide(&self, request: DecisionRequest) -> HiveDecision {
        let decision = self.acceptance.evaluate(request.acceptance_request());

        let (path, proposal, approved) = if self.acceptance.should_auto_execute(&decision) {
            debug!(decision_id = %decision.id, level = %decision.level, "Acting autonomously");
            (DecisionPath::Autonomous, None, true)
        } else {
            let proposal_id = self.put_to_vote(&request).await;
            let proposal = self.consensus.get_proposal(proposal_id);
            let approved = proposal
                .as_ref()
                .is_some_and(|p| p.result == Some(ProposalResult::Approved));
            (DecisionPath::Consensus, proposal, approved)
        };

        let execution = if approved && request.auto_execute {
            self.execute(&decision).await
        } else {
            None
        };

        let mut outcome = HiveDecision {
            decision,
            path,
            proposal,
            approved,
            execution,
            memory_id: None,
        };
        outcome.memory_id = self.remember(&request, &outcome).await;

        metrics::counter!(
            "hive_collective_decisions_total",
            "path" => path.as_str(),
            "approved" => approved.to_string()
        )
        .increment(1);
        info!(
            decision_id = %outcome.decision.id,
            proposer = %request.proposer,
            path = path.as_str(),
            approved,
            executed = outcome.executed(),
            "Collective decision"
        );
        outcome
    }

    /// Open a proposal and apply the votes peers send back before the vote
    /// timeout. A proposal without consensus stays `voting`.
    async fn put_to_vote(&self, request: &DecisionRequest) -> ProposalId {
        let strategy = request.strategy.unwrap_or(self.settings.default_strategy);
        let proposal_id = self.consensus.propose(
            &request.title,
            &request.description,
            &request.proposer,
            strategy,
            request.context.clone(),
        );
        let query = HiveQuery::Vote {
            proposal_id,
            title: request.title.clone(),
            description: request.description.clone(),
            proposer: request.proposer.clone(),
            strategy,
            context: request.context.clone(),
        };

        let hive_id = format!("{}-{}", self.settings.agent_id, Uuid::new_v4());
        self.bus.connect(&hive_id);
        let replies = self.fan_out(&hive_id, &query, self.settings.vote_timeout).await;
        self.bus.disconnect(&hive_id);

        let key = proposal_id.to_string();
        for reply in replies {
            let vote: VoteReply = match reply.payload() {
                Ok(vote) => vote,
                Err(e) => {
                    warn!(from = %reply.from, error = %e, "Ignoring malformed vote");
                    continue;
                }
            };
            match self.consensus.vote(
                &key,
                &reply.from,
                vote.vote,
                vote.confidence,
                &vote.reasoning,
                vote.conditions,
            ) {
                Ok(true) => debug!(proposal_id = %key, from = %reply.from, "Vote settled the proposal"),
                Ok(false) => debug!(proposal_id = %key, from = %reply.from, "Vote recorded"),
                Err(e) => warn!(proposal_id = %key, from = %reply.from, error = %e, "Vote rejected"),
            }
        }
        proposal_id
    }

    /// Broadcast `query` from `sender` under one correlation id and gather
    /// the first reply of each peer.
    async fn fan_out(&self, sender: &str, query: &HiveQuery, timeout: Duration) -> Vec<SynapticMessage> {
        let content = match serde_json::to_value(query) {
            Ok(content) => content,
            Err(e) => {
                warn!(sender, error = %e, "Failed to encode hive query");
                return Vec::new();
            }
        };
        let vote_prefix = format!("{}-", self.settings.agent_id);
        let mut peers: HashSet<String> = self
            .bus
            .live_agents()
            .into_iter()
            .filter(|agent| {
                agent != sender
                    && !agent.starts_with(&vote_prefix)
                    && !self.settings.silent_agents.contains(agent)
            })
            .collect();
        let correlation_id = Uuid::new_v4().to_string();
        self.bus.send(
            SynapticMessage::broadcast(MessageType::Query, sender, content)
                .with_correlation_id(correlation_id.clone()),
        );

        let deadline = Instant::now() + timeout;
        let mut responses = Vec::new();
        while !peers.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let Some(message) = self
                .bus
                .await_correlated(sender, &correlation_id, deadline - now)
                .await
            else {
                break;
            };
            if message.kind != MessageType::Response {
                continue;
            }
            if peers.remove(&message.from) {
                responses.push(message);
            }
        }
        if !peers.is_empty() {
            debug!(sender, silent = peers.len(), "Peers did not answer before the timeout");
        }
        responses
    }

    async fn execute(&self, decision: &AutoDecision) -> Option<ExecutionOutcome> {
        let Some(executor) = &self.executor else {
            debug!(decision_id = %decision.id, "No executor configured; approved action not run");
            return None;
        };
        let outcome = match executor.execute(decision).await {
            Ok(result) => ExecutionOutcome {
                success: true,
                result: Some(result),
            },
            Err(e) => {
                warn!(decision_id = %decision.id, action = %decision.action, error = %e, "Action failed");
                ExecutionOutcome {
                    success: false,
                    result: Some(json!({ "error": e.to_string() })),
                }
            }
        };
        self.acceptance
            .record_execution(decision.id, outcome.success, outcome.result.clone());
        Some(outcome)
    }

    async fn remember(&self, request: &DecisionRequest, outcome: &HiveDecision) -> Option<MemoryId> {
        let summary = json!({
            "title": request.title,
            "action": request.action,
            "category": request.category,
            "level": outcome.decision.level,
            "path": outcome.path,
            "approved": outcome.approved,
            "proposal_id": outcome.proposal.as_ref().map(|p| p.id),
            "votes": outcome.proposal.as_ref().map(|p| p.votes.len()),
            "executed": outcome.executed(),
            "success": outcome.execution.as_ref().map(|e| e.success),
        });
        let entry = MemoryEntry::new(
            summary,
            DECISION_MEMORY_TYPE,
            request.proposer.clone(),
            request.confidence,
            None,
        );
        match self.memory.store(entry).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "Failed to store decision summary");
                None
            }
        }
    }
}
