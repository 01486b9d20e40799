// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Consensus Domain
//!
//! Proposals, votes and the strategy rules used by the
//! [`ConsensusEngine`](crate::application::consensus_engine::ConsensusEngine).
//!
//! Strategies are only evaluated once a proposal holds at least two votes.
//!
//! | Strategy | Reached when |
//! |----------|--------------|
//! | `unanimous` | exactly `unanimous_quorum` votes, all approve |
//! | `majority` | `majority_approve` approvals or `majority_reject` rejections |
//! | `weighted` | approve weight / cast weight >= `weighted_threshold` |
//! | `hybrid` | mean confidence outside the auto band, else unanimous (critical) or majority |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Confidence recorded for the proposer's implicit approval.
pub const PROPOSER_CONFIDENCE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(pub Uuid);

impl ProposalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProposalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProposalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusStrategy {
    Unanimous,
    Majority,
    Weighted,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Approve,
    Reject,
    Abstain,
    Conditional,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrainVote {
    pub agent: String,
    pub vote: VoteType,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub conditions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Voting,
    Decided,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalResult {
    Approved,
    Rejected,
}

/// Domains used to weight votes under the `weighted` strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpertiseDomain {
    Architecture,
    Security,
    Implementation,
    Optimization,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalContext {
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub category: Option<ExpertiseDomain>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProposalContext {
    pub fn critical() -> Self {
        Self {
            critical: true,
            ..Default::default()
        }
    }

    pub fn in_domain(category: ExpertiseDomain) -> Self {
        Self {
            category: Some(category),
            ..Default::default()
        }
    }
}

/// Per-agent vote weights by domain. Unknown agents and uncategorised
/// proposals weigh 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertiseTable {
    weights: HashMap<String, HashMap<ExpertiseDomain, f64>>,
}

impl ExpertiseTable {
    pub fn empty() -> Self {
        Self {
            weights: HashMap::new(),
        }
    }

    pub fn set(&mut self, agent: impl Into<String>, domain: ExpertiseDomain, weight: f64) {
        self.weights
            .entry(agent.into())
            .or_default()
            .insert(domain, weight);
    }

    pub fn weight(&self, agent: &str, domain: Option<ExpertiseDomain>) -> f64 {
        let Some(domain) = domain else {
            return 1.0;
        };
        self.weights
            .get(agent)
            .and_then(|by_domain| by_domain.get(&domain))
            .copied()
            .unwrap_or(1.0)
    }
}

impl Default for ExpertiseTable {
    fn default() -> Self {
        use ExpertiseDomain::*;
        let mut table = Self::empty();
        for (agent, arch, sec, imp, opt) in [
            ("claude", 0.95, 0.90, 0.80, 0.75),
            ("codex", 0.70, 0.75, 0.95, 0.85),
            ("kimi", 0.75, 0.80, 0.85, 0.90),
            ("gemini", 0.85, 0.80, 0.75, 0.85),
        ] {
            table.set(agent, Architecture, arch);
            table.set(agent, Security, sec);
            table.set(agent, Implementation, imp);
            table.set(agent, Optimization, opt);
        }
        table
    }
}

/// Thresholds for every strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusRules {
    pub unanimous_quorum: usize,
    pub majority_approve: usize,
    pub majority_reject: usize,
    pub weighted_threshold: f64,
    pub hybrid_auto_approve: f64,
    pub hybrid_auto_reject: f64,
}

impl Default for ConsensusRules {
    fn default() -> Self {
        Self {
            unanimous_quorum: 4,
            majority_approve: 3,
            majority_reject: 2,
            weighted_threshold: 0.70,
            hybrid_auto_approve: 0.85,
            hybrid_auto_reject: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalDecision {
    pub approved_by: Vec<String>,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusProposal {
    pub id: ProposalId,
    pub title: String,
    pub description: String,
    pub proposer: String,
    pub strategy: ConsensusStrategy,
    #[serde(default)]
    pub context: ProposalContext,
    /// Keyed by agent; a later vote replaces an earlier one.
    pub votes: BTreeMap<String, BrainVote>,
    pub status: ProposalStatus,
    pub result: Option<ProposalResult>,
    pub final_decision: Option<FinalDecision>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ConsensusProposal {
    /// A fresh proposal in `voting`, carrying the proposer's approval.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        proposer: impl Into<String>,
        strategy: ConsensusStrategy,
        context: ProposalContext,
    ) -> Self {
        let now = Utc::now();
        let proposer = proposer.into();
        let mut proposal = Self {
            id: ProposalId::new(),
            title: title.into(),
            description: description.into(),
            proposer: proposer.clone(),
            strategy,
            context,
            votes: BTreeMap::new(),
            status: ProposalStatus::Voting,
            result: None,
            final_decision: None,
            created_at: now,
            updated_at: now,
            decided_at: None,
        };
        proposal.cast(BrainVote {
            agent: proposer,
            vote: VoteType::Approve,
            confidence: PROPOSER_CONFIDENCE,
            reasoning: "Proposer".to_string(),
            conditions: Vec::new(),
            timestamp: now,
        });
        proposal
    }

    pub fn is_open(&self) -> bool {
        self.status == ProposalStatus::Voting
    }

    pub fn cast(&mut self, vote: BrainVote) {
        self.updated_at = vote.timestamp;
        self.votes.insert(vote.agent.clone(), vote);
    }

    fn count(&self, kind: VoteType) -> usize {
        self.votes.values().filter(|v| v.vote == kind).count()
    }

    pub fn approve_count(&self) -> usize {
        self.count(VoteType::Approve)
    }

    pub fn reject_count(&self) -> usize {
        self.count(VoteType::Reject)
    }

    pub fn mean_confidence(&self) -> f64 {
        if self.votes.is_empty() {
            return 0.0;
        }
        self.votes.values().map(|v| v.confidence).sum::<f64>() / self.votes.len() as f64
    }

    pub fn consensus_reached(&self, rules: &ConsensusRules, expertise: &ExpertiseTable) -> bool {
        if self.votes.len() < 2 {
            return false;
        }
        match self.strategy {
            ConsensusStrategy::Unanimous => self.unanimous(rules),
            ConsensusStrategy::Majority => self.majority(rules),
            ConsensusStrategy::Weighted => self.weighted(rules, expertise),
            ConsensusStrategy::Hybrid => {
                let mean = self.mean_confidence();
                if mean >= rules.hybrid_auto_approve || mean <= rules.hybrid_auto_reject {
                    true
                } else if self.context.critical {
                    self.unanimous(rules)
                } else {
                    self.majority(rules)
                }
            }
        }
    }

    fn unanimous(&self, rules: &ConsensusRules) -> bool {
        self.votes.len() == rules.unanimous_quorum
            && self.votes.values().all(|v| v.vote == VoteType::Approve)
    }

    fn majority(&self, rules: &ConsensusRules) -> bool {
        self.approve_count() >= rules.majority_approve
            || self.reject_count() >= rules.majority_reject
    }

    fn weighted(&self, rules: &ConsensusRules, expertise: &ExpertiseTable) -> bool {
        let domain = self.context.category;
        let (approve, total) = self.votes.values().fold((0.0, 0.0), |(approve, total), v| {
            let weight = expertise.weight(&v.agent, domain);
            let approve = if v.vote == VoteType::Approve {
                approve + weight
            } else {
                approve
            };
            (approve, total + weight)
        });
        total > 0.0 && approve / total >= rules.weighted_threshold
    }

    /// Close voting and compute the result.
    pub fn finalize(&mut self) {
        let now = Utc::now();
        let approved = self.approve_count() > self.reject_count();
        let approved_by = self
            .votes
            .values()
            .filter(|v| v.vote == VoteType::Approve)
            .map(|v| v.agent.clone())
            .collect();
        let reasoning = self
            .votes
            .values()
            .filter(|v| !v.reasoning.is_empty())
            .take(3)
            .map(|v| format!("{}: {}", v.agent, v.reasoning))
            .collect::<Vec<_>>()
            .join("; ");

        self.final_decision = Some(FinalDecision {
            approved_by,
            confidence: self.mean_confidence(),
            reasoning,
        });
        self.result = Some(if approved {
            ProposalResult::Approved
        } else {
            ProposalResult::Rejected
        });
        self.status = ProposalStatus::Decided;
        self.decided_at = Some(now);
        self.updated_at = now;
    }
}
