// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Consensus Engine
//!
//! Proposal and vote bookkeeping for group decisions. Consensus is evaluated
//! on every vote and the proposal is finalized inside the same call once its
//! strategy is satisfied. Decided proposals leave the active map; they stay
//! on disk (one JSON document per proposal) and in a bounded in-memory list of
//! recent decisions.
//!
//! A single engine-wide lock serializes proposals and votes, so a vote that
//! arrives after finalization always sees the decided state and is ignored.

use crate::domain::consensus::{
    BrainVote, ConsensusProposal, ConsensusRules, ConsensusStrategy, ExpertiseTable, ProposalContext,
    ProposalId, ProposalResult, ProposalStatus, VoteType,
};
use crate::domain::node_config::{ConsensusConfig, StorageConfig};
use crate::infrastructure::snapshot::{read_json, write_json_atomic};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Invalid proposal id '{0}'")]
    InvalidProposalId(String),

    #[error("Vote confidence must be within [0, 1], got {0}")]
    InvalidConfidence(f64),
}

#[derive(Debug, Clone)]
pub struct ConsensusEngineConfig {
    /// `None` keeps proposals in memory only.
    pub dir: Option<PathBuf>,
    pub rules: ConsensusRules,
    pub expertise: ExpertiseTable,
    pub recent_limit: usize,
}

impl ConsensusEngineConfig {
    pub fn from_config(storage: &StorageConfig, consensus: &ConsensusConfig) -> Self {
        Self {
            dir: Some(storage.consensus_dir()),
            rules: consensus.rules.clone(),
            expertise: ExpertiseTable::default(),
            recent_limit: storage.recent_decisions,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            dir: None,
            rules: ConsensusRules::default(),
            expertise: ExpertiseTable::default(),
            recent_limit: 100,
        }
    }
}

#[derive(Default)]
struct Inner {
    active: HashMap<ProposalId, ConsensusProposal>,
    recent: VecDeque<ConsensusProposal>,
}

pub struct ConsensusEngine {
    inner: Mutex<Inner>,
    dir: Option<PathBuf>,
    rules: ConsensusRules,
    expertise: ExpertiseTable,
    recent_limit: usize,
    persist_failures: AtomicU64,
}

impl ConsensusEngine {
    /// Open the engine, reloading proposals that were still being voted on.
    pub fn open(config: ConsensusEngineConfig) -> Self {
        let mut inner = Inner::default();
        if let Some(dir) = &config.dir {
            for proposal in load_open_proposals(dir) {
                inner.active.insert(proposal.id, proposal);
            }
            info!(dir = %dir.display(), open = inner.active.len(), "Consensus engine ready");
        }
        Self {
            inner: Mutex::new(inner),
            dir: config.dir,
            rules: config.rules,
            expertise: config.expertise,
            recent_limit: config.recent_limit,
            persist_failures: AtomicU64::new(0),
        }
    }

    pub fn rules(&self) -> &ConsensusRules {
        &self.rules
    }

    fn persist(&self, proposal: &ConsensusProposal) {
        let Some(dir) = &self.dir else {
            return;
        };
        let path = proposal_path(dir, proposal.id);
        if let Err(e) = write_json_atomic(&path, proposal) {
            self.persist_failures.fetch_add(1, Ordering::Relaxed);
            error!(proposal_id = %proposal.id, error = %e, "Failed to persist proposal");
        }
    }

    pub fn propose(
        &self,
        title: &str,
        description: &str,
        proposer: &str,
        strategy: ConsensusStrategy,
        context: ProposalContext,
    ) -> ProposalId {
        let proposal = ConsensusProposal::new(title, description, proposer, strategy, context);
        let id = proposal.id;
        let mut inner = self.inner.lock();
        self.persist(&proposal);
        inner.active.insert(id, proposal);
        info!(proposal_id = %id, proposer, ?strategy, title, "Proposal opened");
        id
    }

    /// Record `agent`'s vote, replacing any earlier one, and report whether
    /// this vote brought the proposal to consensus.
    ///
    /// Returns `Ok(false)` while voting continues, and when the proposal is
    /// unknown or already decided.
    pub fn vote(
        &self,
        proposal_id: &str,
        agent: &str,
        vote: VoteType,
        confidence: f64,
        reasoning: &str,
        conditions: Vec<String>,
    ) -> Result<bool, ConsensusError> {
        let id: ProposalId = proposal_id
            .parse()
            .map_err(|_| ConsensusError::InvalidProposalId(proposal_id.to_string()))?;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ConsensusError::InvalidConfidence(confidence));
        }

        let mut inner = self.inner.lock();
        let Some(proposal) = inner.active.get_mut(&id) else {
            debug!(proposal_id = %id, agent, "Vote for unknown or decided proposal ignored");
            return Ok(false);
        };
        proposal.cast(BrainVote {
            agent: agent.to_string(),
            vote,
            confidence,
            reasoning: reasoning.to_string(),
            conditions,
            timestamp: Utc::now(),
        });
        debug!(proposal_id = %id, agent, ?vote, confidence, votes = proposal.votes.len(), "Vote recorded");

        if !proposal.consensus_reached(&self.rules, &self.expertise) {
            let snapshot = proposal.clone();
            self.persist(&snapshot);
            return Ok(false);
        }

        proposal.finalize();
        let decided = proposal.clone();
        inner.active.remove(&id);
        self.persist(&decided);

        let result = match decided.result {
            Some(ProposalResult::Approved) => "approved",
            _ => "rejected",
        };
        metrics::counter!("hive_consensus_finalized_total", "result" => result).increment(1);
        info!(
            proposal_id = %id,
            result,
            approvals = decided.approve_count(),
            rejections = decided.reject_count(),
            "Consensus reached"
        );

        inner.recent.push_back(decided);
        while inner.recent.len() > self.recent_limit {
            inner.recent.pop_front();
        }
        Ok(true)
    }

    /// Look a proposal up in the active map, the recent decisions, then on disk.
    pub fn get_proposal(&self, id: ProposalId) -> Option<ConsensusProposal> {
        {
            let inner = self.inner.lock();
            if let Some(p) = inner.active.get(&id) {
                return Some(p.clone());
            }
            if let Some(p) = inner.recent.iter().rev().find(|p| p.id == id) {
                return Some(p.clone());
            }
        }
        let dir = self.dir.as_ref()?;
        let path = proposal_path(dir, id);
        if !path.exists() {
            return None;
        }
        match read_json(&path) {
            Ok(proposal) => Some(proposal),
            Err(e) => {
                warn!(proposal_id = %id, error = %e, "Unreadable proposal file");
                None
            }
        }
    }

    /// Proposals still collecting votes, oldest first.
    pub fn active_proposals(&self) -> Vec<ConsensusProposal> {
        let mut proposals: Vec<_> = self.inner.lock().active.values().cloned().collect();
        proposals.sort_by_key(|p| p.created_at);
        proposals
    }

    /// Recently decided proposals, oldest first.
    pub fn recent_decisions(&self) -> Vec<ConsensusProposal> {
        self.inner.lock().recent.iter().cloned().collect()
    }

    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }
}

fn proposal_path(dir: &Path, id: ProposalId) -> PathBuf {
    dir.join(format!("{}.json", id))
}

fn load_open_proposals(dir: &Path) -> Vec<ConsensusProposal> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            error!(dir = %dir.display(), error = %e, "Failed to scan consensus directory");
            return Vec::new();
        }
    };
    entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|path| match read_json::<ConsensusProposal>(&path) {
            Ok(proposal) => Some(proposal),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable proposal file");
                None
            }
        })
        .filter(|p| p.status == ProposalStatus::Voting)
        .collect()
}
