// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Auto-Acceptance Protocol
//!
//! Decides how much autonomy an agent gets for one action, based on the
//! configured threshold for its (agent, category) pair and that pair's track
//! record. Every recorded execution feeds back into the threshold's success
//! rate, which is persisted alongside the thresholds themselves.

use crate::domain::acceptance::{
    decide_level, default_thresholds, AcceptanceLevel, AcceptanceThreshold, AutoDecision, DecisionId,
    ImpactLevel, TaskCategory, MISSING_THRESHOLD_JUSTIFICATION,
};
use crate::infrastructure::snapshot::{Loaded, SnapshotStore};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

const THRESHOLDS_VERSION: u32 = 1;
const DECISION_LIMIT: usize = 1000;

/// One action an agent wants to take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceRequest {
    pub agent: String,
    pub category: TaskCategory,
    pub action: String,
    pub confidence: f64,
    pub impact: ImpactLevel,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub conditions: Vec<String>,
}

#[derive(Serialize)]
struct ThresholdSnapshot<'a> {
    version: u32,
    last_updated: DateTime<Utc>,
    thresholds: Vec<&'a AcceptanceThreshold>,
}

#[derive(Deserialize)]
struct StoredThresholds {
    thresholds: Vec<AcceptanceThreshold>,
}

type ThresholdKey = (String, TaskCategory);

#[derive(Default)]
struct Inner {
    thresholds: HashMap<ThresholdKey, AcceptanceThreshold>,
    decisions: HashMap<DecisionId, AutoDecision>,
    decision_order: VecDeque<DecisionId>,
}

impl Inner {
    fn sorted_thresholds(&self) -> Vec<&AcceptanceThreshold> {
        let mut thresholds: Vec<_> = self.thresholds.values().collect();
        thresholds.sort_by(|a, b| {
            a.agent
                .cmp(&b.agent)
                .then_with(|| a.category.to_string().cmp(&b.category.to_string()))
        });
        thresholds
    }
}

pub struct AutoAcceptanceProtocol {
    inner: Mutex<Inner>,
    store: Option<SnapshotStore>,
}

impl AutoAcceptanceProtocol {
    /// Load thresholds from `path`, seeding the stock table when the file is
    /// missing or unreadable.
    pub fn open(path: PathBuf) -> Self {
        let store = SnapshotStore::new(path);
        let (thresholds, seeded) = match store.load::<StoredThresholds>() {
            Loaded::Primary(stored) | Loaded::Restored { value: stored, .. } => (stored.thresholds, false),
            Loaded::Fresh => {
                info!(path = %store.path().display(), "No acceptance thresholds found, seeding defaults");
                (default_thresholds(), true)
            }
            Loaded::Lost => {
                error!(path = %store.path().display(), "Acceptance thresholds unreadable, reverting to defaults");
                (default_thresholds(), true)
            }
        };
        let protocol = Self {
            inner: Mutex::new(Inner::default()),
            store: Some(store),
        };
        {
            let mut inner = protocol.inner.lock();
            for threshold in thresholds {
                inner
                    .thresholds
                    .insert((threshold.agent.clone(), threshold.category), threshold);
            }
            if seeded {
                protocol.persist(&inner);
            }
        }
        protocol
    }

    /// In-memory protocol holding exactly `thresholds`.
    pub fn with_thresholds(thresholds: Vec<AcceptanceThreshold>) -> Self {
        let mut inner = Inner::default();
        for threshold in thresholds {
            inner
                .thresholds
                .insert((threshold.agent.clone(), threshold.category), threshold);
        }
        Self {
            inner: Mutex::new(inner),
            store: None,
        }
    }

    fn persist(&self, inner: &Inner) {
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = ThresholdSnapshot {
            version: THRESHOLDS_VERSION,
            last_updated: Utc::now(),
            thresholds: inner.sorted_thresholds(),
        };
        if let Err(e) = store.save(&snapshot) {
            error!(path = %store.path().display(), error = %e, "Failed to persist acceptance thresholds");
        }
    }

    pub fn evaluate(&self, request: AcceptanceRequest) -> AutoDecision {
        let mut inner = self.inner.lock();
        let key = (request.agent.clone(), request.category);
        let (level, justification) = match inner.thresholds.get(&key) {
            Some(threshold) => (
                decide_level(threshold, request.confidence, request.impact),
                request.justification,
            ),
            None => {
                warn!(agent = %request.agent, category = %request.category, "No acceptance threshold configured");
                (AcceptanceLevel::Supervised, MISSING_THRESHOLD_JUSTIFICATION.to_string())
            }
        };

        let decision = AutoDecision {
            id: DecisionId::new(),
            agent: request.agent,
            category: request.category,
            action: request.action,
            level,
            confidence: request.confidence,
            impact: request.impact,
            justification,
            conditions: request.conditions,
            executed: false,
            result: None,
            success: None,
            created_at: Utc::now(),
        };
        info!(
            decision_id = %decision.id,
            agent = %decision.agent,
            category = %decision.category,
            level = %decision.level,
            confidence = decision.confidence,
            "Acceptance decision"
        );

        inner.decisions.insert(decision.id, decision.clone());
        inner.decision_order.push_back(decision.id);
        while inner.decision_order.len() > DECISION_LIMIT {
            if let Some(old) = inner.decision_order.pop_front() {
                inner.decisions.remove(&old);
            }
        }
        decision
    }

    /// Whether `decision` may run without a group vote.
    pub fn should_auto_execute(&self, decision: &AutoDecision) -> bool {
        decision.should_auto_execute()
    }

    /// Record how an executed decision turned out. Returns `false` for
    /// unknown decisions and for decisions whose outcome is already recorded.
    pub fn record_execution(&self, decision_id: DecisionId, success: bool, result: Option<Value>) -> bool {
        let mut inner = self.inner.lock();
        let Some(decision) = inner.decisions.get_mut(&decision_id) else {
            debug!(%decision_id, "Execution recorded for unknown decision");
            return false;
        };
        if decision.executed {
            warn!(%decision_id, "Execution already recorded; ignoring");
            return false;
        }
        decision.executed = true;
        decision.success = Some(success);
        decision.result = result;
        let key = (decision.agent.clone(), decision.category);

        if let Some(threshold) = inner.thresholds.get_mut(&key) {
            threshold.record(success);
            debug!(
                agent = %threshold.agent,
                category = %threshold.category,
                success_rate = threshold.success_rate,
                total = threshold.total_tasks,
                "Threshold track record updated"
            );
            self.persist(&inner);
        }
        true
    }

    /// Mean over the agent's thresholds of `level_score * (0.5 + 0.5 * success_rate)`.
    pub fn get_brain_autonomy_score(&self, agent: &str) -> f64 {
        let inner = self.inner.lock();
        let scores: Vec<f64> = inner
            .thresholds
            .values()
            .filter(|t| t.agent == agent)
            .map(|t| t.level.score() * (0.5 + 0.5 * t.success_rate))
            .collect();
        if scores.is_empty() {
            return 0.0;
        }
        scores.iter().sum::<f64>() / scores.len() as f64
    }

    pub fn set_threshold(&self, threshold: AcceptanceThreshold) {
        let mut inner = self.inner.lock();
        info!(agent = %threshold.agent, category = %threshold.category, level = %threshold.level, "Threshold set");
        inner
            .thresholds
            .insert((threshold.agent.clone(), threshold.category), threshold);
        self.persist(&inner);
    }

    pub fn threshold(&self, agent: &str, category: TaskCategory) -> Option<AcceptanceThreshold> {
        self.inner
            .lock()
            .thresholds
            .get(&(agent.to_string(), category))
            .cloned()
    }

    pub fn thresholds(&self) -> Vec<AcceptanceThreshold> {
        self.inner.lock().sorted_thresholds().into_iter().cloned().collect()
    }

    pub fn decision(&self, decision_id: DecisionId) -> Option<AutoDecision> {
        self.inner.lock().decisions.get(&decision_id).cloned()
    }
}
