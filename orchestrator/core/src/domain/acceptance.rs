// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Auto-Acceptance Domain
//!
//! Autonomy levels, per-(agent, category) thresholds and the pure decision
//! rule used by the
//! [`AutoAcceptanceProtocol`](crate::application::auto_acceptance::AutoAcceptanceProtocol).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

pub const MISSING_THRESHOLD_JUSTIFICATION: &str =
    "No acceptance threshold configured for this agent and category; defaulting to supervised";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptanceLevel {
    Full,
    Conditional,
    Supervised,
    Manual,
}

impl AcceptanceLevel {
    /// One rung less autonomous. `Manual` stays `Manual`.
    pub fn escalate(self) -> Self {
        match self {
            AcceptanceLevel::Full => AcceptanceLevel::Conditional,
            AcceptanceLevel::Conditional => AcceptanceLevel::Supervised,
            AcceptanceLevel::Supervised | AcceptanceLevel::Manual => AcceptanceLevel::Manual,
        }
    }

    pub fn score(self) -> f64 {
        match self {
            AcceptanceLevel::Full => 1.0,
            AcceptanceLevel::Conditional => 0.7,
            AcceptanceLevel::Supervised => 0.3,
            AcceptanceLevel::Manual => 0.0,
        }
    }

    /// Whether a decision at this level runs without a group vote.
    pub fn allows_autonomous_execution(self) -> bool {
        matches!(self, AcceptanceLevel::Full | AcceptanceLevel::Conditional)
    }
}

impl fmt::Display for AcceptanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcceptanceLevel::Full => "full",
            AcceptanceLevel::Conditional => "conditional",
            AcceptanceLevel::Supervised => "supervised",
            AcceptanceLevel::Manual => "manual",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    CodeGeneration,
    CodeReview,
    Refactoring,
    Testing,
    Documentation,
    Architecture,
    Security,
    Deployment,
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskCategory::CodeGeneration => "code_generation",
            TaskCategory::CodeReview => "code_review",
            TaskCategory::Refactoring => "refactoring",
            TaskCategory::Testing => "testing",
            TaskCategory::Documentation => "documentation",
            TaskCategory::Architecture => "architecture",
            TaskCategory::Security => "security",
            TaskCategory::Deployment => "deployment",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceThreshold {
    pub agent: String,
    pub category: TaskCategory,
    pub level: AcceptanceLevel,
    pub min_confidence: f64,
    pub max_impact: ImpactLevel,
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub total_tasks: u64,
    #[serde(default)]
    pub successful_tasks: u64,
}

impl AcceptanceThreshold {
    pub fn new(
        agent: impl Into<String>,
        category: TaskCategory,
        level: AcceptanceLevel,
        min_confidence: f64,
        max_impact: ImpactLevel,
    ) -> Self {
        Self {
            agent: agent.into(),
            category,
            level,
            min_confidence,
            max_impact,
            success_rate: 0.0,
            total_tasks: 0,
            successful_tasks: 0,
        }
    }

    pub fn record(&mut self, success: bool) {
        self.total_tasks += 1;
        if success {
            self.successful_tasks += 1;
        }
        self.success_rate = self.successful_tasks as f64 / self.total_tasks as f64;
    }
}

/// Thresholds shipped for the stock agents.
pub fn default_thresholds() -> Vec<AcceptanceThreshold> {
    use AcceptanceLevel::*;
    use ImpactLevel::*;
    use TaskCategory::*;
    vec![
        AcceptanceThreshold::new("claude", Architecture, Conditional, 0.8, High),
        AcceptanceThreshold::new("claude", CodeReview, Full, 0.7, Medium),
        AcceptanceThreshold::new("claude", Security, Supervised, 0.85, Medium),
        AcceptanceThreshold::new("codex", CodeGeneration, Conditional, 0.75, Medium),
        AcceptanceThreshold::new("codex", Refactoring, Conditional, 0.8, Medium),
        AcceptanceThreshold::new("codex", Testing, Full, 0.7, Medium),
        AcceptanceThreshold::new("kimi", Documentation, Full, 0.6, Low),
        AcceptanceThreshold::new("kimi", CodeReview, Conditional, 0.75, Medium),
        AcceptanceThreshold::new("gemini", Architecture, Conditional, 0.8, Medium),
        AcceptanceThreshold::new("gemini", Deployment, Manual, 0.9, Low),
    ]
}

/// Decide the autonomy level for one request against its threshold.
pub fn decide_level(
    threshold: &AcceptanceThreshold,
    confidence: f64,
    impact: ImpactLevel,
) -> AcceptanceLevel {
    if confidence < threshold.min_confidence {
        return AcceptanceLevel::Supervised;
    }
    if impact > threshold.max_impact {
        return threshold.level.escalate();
    }
    if threshold.success_rate > 0.9
        && threshold.total_tasks > 10
        && threshold.level == AcceptanceLevel::Conditional
    {
        return AcceptanceLevel::Full;
    }
    threshold.level
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionId(pub Uuid);

impl DecisionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DecisionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DecisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoDecision {
    pub id: DecisionId,
    pub agent: String,
    pub category: TaskCategory,
    pub action: String,
    pub level: AcceptanceLevel,
    pub confidence: f64,
    pub impact: ImpactLevel,
    pub justification: String,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub executed: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub success: Option<bool>,
    pub created_at: DateTime<Utc>,
}

impl AutoDecision {
    pub fn should_auto_execute(&self) -> bool {
        self.level.allows_autonomous_execution()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_ladder() {
        assert_eq!(AcceptanceLevel::Full.escalate(), AcceptanceLevel::Conditional);
        assert_eq!(AcceptanceLevel::Conditional.escalate(), AcceptanceLevel::Supervised);
        assert_eq!(AcceptanceLevel::Supervised.escalate(), AcceptanceLevel::Manual);
        assert_eq!(AcceptanceLevel::Manual.escalate(), AcceptanceLevel::Manual);
    }

    #[test]
    fn test_low_confidence_is_supervised() {
        let t = AcceptanceThreshold::new("codex", TaskCategory::CodeGeneration, AcceptanceLevel::Conditional, 0.8, ImpactLevel::High);
        assert_eq!(decide_level(&t, 0.5, ImpactLevel::Low), AcceptanceLevel::Supervised);
    }

    #[test]
    fn test_impact_above_ceiling_escalates() {
        let t = AcceptanceThreshold::new("kimi", TaskCategory::Documentation, AcceptanceLevel::Full, 0.6, ImpactLevel::Low);
        assert_eq!(decide_level(&t, 0.9, ImpactLevel::Medium), AcceptanceLevel::Conditional);
    }

    #[test]
    fn test_track_record_promotes_conditional() {
        let mut t = AcceptanceThreshold::new("codex", TaskCategory::CodeGeneration, AcceptanceLevel::Conditional, 0.8, ImpactLevel::High);
        for i in 0..15 {
            t.record(i != 0);
        }
        assert_eq!(t.total_tasks, 15);
        assert!(t.success_rate > 0.9);
        assert_eq!(decide_level(&t, 0.9, ImpactLevel::Low), AcceptanceLevel::Full);
    }

    #[test]
    fn test_record_updates_success_rate() {
        let mut t = AcceptanceThreshold::new("claude", TaskCategory::CodeReview, AcceptanceLevel::Full, 0.7, ImpactLevel::Medium);
        t.record(true);
        t.record(false);
        assert_eq!(t.successful_tasks, 1);
        assert!((t.success_rate - 0.5).abs() < f64::EPSILON);
    }
}
