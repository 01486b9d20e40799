// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Aggregate
//!
//! A [`Task`] is one unit of agent work tracked by the
//! [`StateEngine`](crate::application::state_engine::StateEngine). This module
//! holds the pure state machine; locking, history bookkeeping and persistence
//! live in the application layer.
//!
//! ## Transition Table
//! | From | Allowed targets |
//! |------|-----------------|
//! | `pending` | `running`, `cancelled` |
//! | `running` | `completed`, `failed`, `cancelled` |
//! | `failed` | `pending` (retry), `cancelled` |
//! | `completed`, `cancelled` | none (terminal) |
//!
//! Entering `failed` always counts an attempt. While attempts remain the same
//! transition re-enqueues the task as `pending`; the history records a single
//! entry flagged with `requeued: true`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether the transition table permits `self -> next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, Pending)
                | (Failed, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Path-level permissions granted to the agent executing a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPermissions {
    #[serde(default)]
    pub read: Vec<String>,
    #[serde(default)]
    pub write: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl TaskPermissions {
    pub fn read_only(paths: Vec<String>) -> Self {
        Self {
            read: paths,
            ..Default::default()
        }
    }
}

/// One recorded status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub agent: String,
    pub status: TaskStatus,
    pub content: String,
    #[serde(default)]
    pub permissions: TaskPermissions,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub history: Vec<TransitionRecord>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Where a task ends up after [`Task::apply_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Still live; stays in the active set.
    Active,
    /// Failed with attempts remaining and was put back to `pending`.
    Requeued,
    /// Reached a terminal status.
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task {task_id} has exhausted its retries ({retry_count}/{max_retries})")]
    RetryExhausted {
        task_id: TaskId,
        retry_count: u32,
        max_retries: u32,
    },
}

impl Task {
    pub fn new(
        id: TaskId,
        agent: impl Into<String>,
        content: impl Into<String>,
        permissions: TaskPermissions,
        max_retries: u32,
        metadata: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            agent: agent.into(),
            status: TaskStatus::Pending,
            content: content.into(),
            permissions,
            retry_count: 0,
            max_retries,
            history: Vec::new(),
            metadata,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Wall-clock seconds between the first start and completion.
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds().max(0) as f64 / 1000.0)
            }
            _ => None,
        }
    }

    /// Apply a status change. On error the task is left untouched.
    pub fn apply_transition(
        &mut self,
        next: TaskStatus,
        mut metadata: Map<String, Value>,
    ) -> Result<TransitionOutcome, TaskError> {
        let from = self.status;
        if !from.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                task_id: self.id,
                from,
                to: next,
            });
        }
        if from == TaskStatus::Failed && next == TaskStatus::Pending && !self.can_retry() {
            return Err(TaskError::RetryExhausted {
                task_id: self.id,
                retry_count: self.retry_count,
                max_retries: self.max_retries,
            });
        }

        let now = Utc::now();
        let mut status = next;
        let mut outcome = if next.is_terminal() {
            TransitionOutcome::Terminal
        } else {
            TransitionOutcome::Active
        };

        match next {
            TaskStatus::Running if self.started_at.is_none() => {
                self.started_at = Some(now);
            }
            TaskStatus::Failed => {
                self.retry_count += 1;
                if self.retry_count < self.max_retries {
                    status = TaskStatus::Pending;
                    outcome = TransitionOutcome::Requeued;
                    metadata.insert("requeued".to_string(), Value::Bool(true));
                    metadata.insert("retry_count".to_string(), Value::from(self.retry_count));
                }
            }
            _ => {}
        }

        if outcome == TransitionOutcome::Terminal {
            self.completed_at = Some(now);
        } else if from == TaskStatus::Failed {
            // back from a terminal failure
            self.completed_at = None;
        }

        self.history.push(TransitionRecord {
            from,
            to: next,
            timestamp: now,
            metadata: metadata.clone(),
        });
        for (key, value) in metadata {
            self.metadata.insert(key, value);
        }
        self.status = status;
        self.updated_at = now;
        Ok(outcome)
    }
}

/// Aggregate counters over every task the engine has seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub cancelled_tasks: u64,
    /// Running mean over every terminal task that had started.
    pub avg_task_duration_secs: f64,
    #[serde(default)]
    pub timed_tasks: u64,
}

impl SystemMetrics {
    pub fn record_created(&mut self) {
        self.total_tasks += 1;
    }

    pub fn record_terminal(&mut self, status: TaskStatus, duration_secs: Option<f64>) {
        match status {
            TaskStatus::Completed => self.completed_tasks += 1,
            TaskStatus::Failed => self.failed_tasks += 1,
            TaskStatus::Cancelled => self.cancelled_tasks += 1,
            TaskStatus::Pending | TaskStatus::Running => return,
        }
        if let Some(duration) = duration_secs {
            self.timed_tasks += 1;
            self.avg_task_duration_secs +=
                (duration - self.avg_task_duration_secs) / self.timed_tasks as f64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(max_retries: u32) -> Task {
        Task::new(
            TaskId::new(),
            "codex",
            "write the parser",
            TaskPermissions::default(),
            max_retries,
            Map::new(),
        )
    }

    #[test]
    fn test_transition_table() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Running));
    }

    #[test]
    fn test_invalid_transition_leaves_task_unchanged() {
        let mut t = task(3);
        let before = t.clone();
        let err = t.apply_transition(TaskStatus::Completed, Map::new()).unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { from: TaskStatus::Pending, to: TaskStatus::Completed, .. }));
        assert_eq!(t, before);
    }

    #[test]
    fn test_failure_requeues_until_attempts_run_out() {
        let mut t = task(2);
        t.apply_transition(TaskStatus::Running, Map::new()).unwrap();
        let started = t.started_at;
        assert_eq!(t.apply_transition(TaskStatus::Failed, Map::new()).unwrap(), TransitionOutcome::Requeued);
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.retry_count, 1);

        t.apply_transition(TaskStatus::Running, Map::new()).unwrap();
        assert_eq!(t.started_at, started);
        assert_eq!(t.apply_transition(TaskStatus::Failed, Map::new()).unwrap(), TransitionOutcome::Terminal);
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.retry_count, 2);
        assert!(t.completed_at.is_some());
        assert!(!t.can_retry());

        let err = t.apply_transition(TaskStatus::Pending, Map::new()).unwrap_err();
        assert!(matches!(err, TaskError::RetryExhausted { retry_count: 2, max_retries: 2, .. }));
    }

    #[test]
    fn test_requeue_is_a_single_history_entry() {
        let mut t = task(3);
        t.apply_transition(TaskStatus::Running, Map::new()).unwrap();
        t.apply_transition(TaskStatus::Failed, Map::new()).unwrap();
        assert_eq!(t.history.len(), 2);
        let last = t.history.last().unwrap();
        assert_eq!(last.to, TaskStatus::Failed);
        assert_eq!(last.metadata.get("requeued"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_metrics_running_average() {
        let mut metrics = SystemMetrics::default();
        metrics.record_terminal(TaskStatus::Completed, Some(2.0));
        metrics.record_terminal(TaskStatus::Failed, Some(4.0));
        metrics.record_terminal(TaskStatus::Cancelled, None);
        assert_eq!(metrics.completed_tasks, 1);
        assert_eq!(metrics.failed_tasks, 1);
        assert_eq!(metrics.cancelled_tasks, 1);
        assert!((metrics.avg_task_duration_secs - 3.0).abs() < f64::EPSILON);
    }
}
