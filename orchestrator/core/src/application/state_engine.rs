// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # State Engine
//!
//! Durable store for the task lifecycle. Owns every live [`Task`], a bounded
//! history of terminal tasks and the aggregate [`SystemMetrics`].
//!
//! Every mutation is written through a [`SnapshotStore`] before the call
//! returns. Write failures are logged and counted but never surface to the
//! caller; the in-memory state stays authoritative.
//!
//! All operations serialize on one engine-wide lock, snapshot write included.
//! That caps throughput at roughly one mutation per fsync, which is plenty for
//! agent-scale workloads.

use crate::domain::node_config::StorageConfig;
use crate::domain::task::{
    SystemMetrics, Task, TaskError, TaskId, TaskPermissions, TaskStatus, TransitionOutcome,
};
use crate::infrastructure::snapshot::{Loaded, SnapshotStore};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, error, info, warn};

const STATE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task already exists: {0}")]
    DuplicateTask(TaskId),
}

#[derive(Debug, Clone)]
pub struct StateEngineConfig {
    pub state_file: PathBuf,
    pub backup_dir: PathBuf,
    pub max_backups: usize,
    pub history_limit: usize,
    pub restore_attempts: usize,
}

impl From<&StorageConfig> for StateEngineConfig {
    fn from(storage: &StorageConfig) -> Self {
        Self {
            state_file: storage.state_file(),
            backup_dir: storage.backup_dir(),
            max_backups: storage.max_backups,
            history_limit: storage.history_limit,
            restore_attempts: storage.restore_attempts,
        }
    }
}

#[derive(Serialize)]
struct StateSnapshot<'a> {
    version: u32,
    last_updated: DateTime<Utc>,
    active_tasks: Vec<&'a Task>,
    task_history: &'a VecDeque<Task>,
    metrics: &'a SystemMetrics,
}

#[derive(Deserialize)]
struct StoredState {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    active_tasks: Vec<Task>,
    #[serde(default)]
    task_history: VecDeque<Task>,
    #[serde(default)]
    metrics: SystemMetrics,
}

#[derive(Default)]
struct Inner {
    active: HashMap<TaskId, Task>,
    history: VecDeque<Task>,
    metrics: SystemMetrics,
}

impl Inner {
    fn sorted_active(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.active.values().collect();
        tasks.sort_by_key(|t| (t.created_at, t.id.0));
        tasks
    }

    fn contains(&self, id: TaskId) -> bool {
        self.active.contains_key(&id) || self.history.iter().any(|t| t.id == id)
    }
}

pub struct StateEngine {
    inner: Mutex<Inner>,
    store: Option<SnapshotStore>,
    history_limit: usize,
    persist_failures: AtomicU64,
}

impl StateEngine {
    /// Open the engine, restoring whatever the state file (or its backups) hold.
    pub fn open(config: StateEngineConfig) -> Self {
        let store = SnapshotStore::with_backups(
            config.state_file,
            config.backup_dir,
            config.max_backups,
            config.restore_attempts,
        );
        let inner = match store.load::<StoredState>() {
            Loaded::Fresh => {
                info!(path = %store.path().display(), "No task state found, starting fresh");
                Inner::default()
            }
            Loaded::Primary(state) => Self::restore(state),
            Loaded::Restored { value, backup } => {
                warn!(backup = %backup.display(), "Task state restored from backup");
                Self::restore(value)
            }
            Loaded::Lost => {
                error!(path = %store.path().display(), "Task state lost; starting with an empty engine");
                Inner::default()
            }
        };
        info!(
            active = inner.active.len(),
            history = inner.history.len(),
            "State engine ready"
        );
        Self {
            inner: Mutex::new(inner),
            store: Some(store),
            history_limit: config.history_limit,
            persist_failures: AtomicU64::new(0),
        }
    }

    /// An engine that never touches disk.
    pub fn ephemeral(history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            store: None,
            history_limit,
            persist_failures: AtomicU64::new(0),
        }
    }

    fn restore(state: StoredState) -> Inner {
        Inner {
            active: state.active_tasks.into_iter().map(|t| (t.id, t)).collect(),
            history: state.task_history,
            metrics: state.metrics,
        }
    }

    fn persist(&self, inner: &Inner) {
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = StateSnapshot {
            version: STATE_VERSION,
            last_updated: Utc::now(),
            active_tasks: inner.sorted_active(),
            task_history: &inner.history,
            metrics: &inner.metrics,
        };
        if let Err(e) = store.save(&snapshot) {
            self.persist_failures.fetch_add(1, Ordering::Relaxed);
            error!(path = %store.path().display(), error = %e, "Failed to persist task state");
        }
    }

    pub fn create_task(
        &self,
        agent: &str,
        content: &str,
        permissions: TaskPermissions,
        max_retries: u32,
        metadata: Map<String, Value>,
    ) -> Task {
        let mut inner = self.inner.lock();
        let mut id = TaskId::new();
        while inner.contains(id) {
            id = TaskId::new();
        }
        self.insert(&mut inner, Task::new(id, agent, content, permissions, max_retries, metadata))
    }

    /// Create a task under an id allocated by the caller.
    pub fn create_task_with_id(
        &self,
        id: TaskId,
        agent: &str,
        content: &str,
        permissions: TaskPermissions,
        max_retries: u32,
        metadata: Map<String, Value>,
    ) -> Result<Task, StateError> {
        let mut inner = self.inner.lock();
        if inner.contains(id) {
            return Err(StateError::DuplicateTask(id));
        }
        Ok(self.insert(&mut inner, Task::new(id, agent, content, permissions, max_retries, metadata)))
    }

    fn insert(&self, inner: &mut Inner, task: Task) -> Task {
        inner.active.insert(task.id, task.clone());
        inner.metrics.record_created();
        self.persist(inner);
        info!(task_id = %task.id, agent = %task.agent, max_retries = task.max_retries, "Task created");
        task
    }

    /// Move a task along the transition table.
    ///
    /// Terminal `failed` tasks in the history can still be moved to
    /// `pending` (retry) or `cancelled`.
    pub fn transition_task(
        &self,
        task_id: TaskId,
        new_status: TaskStatus,
        metadata: Map<String, Value>,
    ) -> Result<Task, StateError> {
        let mut inner = self.inner.lock();

        if let Some(task) = inner.active.get_mut(&task_id) {
            let from = task.status;
            let outcome = task.apply_transition(new_status, metadata)?;
            let task = task.clone();
            record_transition(&task, from, new_status, outcome);

            if outcome == TransitionOutcome::Terminal {
                inner.active.remove(&task_id);
                inner.metrics.record_terminal(task.status, task.duration_secs());
                if let Some(duration) = task.duration_secs() {
                    metrics::histogram!("hive_task_duration_seconds").record(duration);
                }
                inner.history.push_back(task.clone());
                while inner.history.len() > self.history_limit {
                    inner.history.pop_front();
                }
            }
            self.persist(&inner);
            return Ok(task);
        }

        let Some(pos) = inner.history.iter().position(|t| t.id == task_id) else {
            return Err(StateError::TaskNotFound(task_id));
        };
        let mut task = inner.history[pos].clone();
        let from = task.status;
        let outcome = task.apply_transition(new_status, metadata)?;
        record_transition(&task, from, new_status, outcome);

        if task.status.is_terminal() {
            // failed -> cancelled: no new terminal outcome for the metrics
            inner.history[pos] = task.clone();
        } else {
            inner.history.remove(pos);
            if from == TaskStatus::Failed {
                inner.metrics.failed_tasks = inner.metrics.failed_tasks.saturating_sub(1);
            }
            inner.active.insert(task_id, task.clone());
        }
        self.persist(&inner);
        Ok(task)
    }

    /// Re-enqueue a terminally failed task. Fails with `RetryExhausted` once
    /// `retry_count` has reached `max_retries`.
    pub fn retry_task(&self, task_id: TaskId) -> Result<Task, StateError> {
        let mut metadata = Map::new();
        metadata.insert("manual_retry".to_string(), Value::Bool(true));
        self.transition_task(task_id, TaskStatus::Pending, metadata)
    }

    pub fn get_task(&self, task_id: TaskId) -> Option<Task> {
        let inner = self.inner.lock();
        inner
            .active
            .get(&task_id)
            .or_else(|| inner.history.iter().rev().find(|t| t.id == task_id))
            .cloned()
    }

    /// Live tasks, oldest first.
    pub fn active_tasks(&self) -> Vec<Task> {
        self.inner.lock().sorted_active().into_iter().cloned().collect()
    }

    /// Up to `limit` pending tasks, oldest first.
    pub fn pending_tasks(&self, limit: usize) -> Vec<Task> {
        self.inner
            .lock()
            .sorted_active()
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Terminal tasks, oldest first.
    pub fn task_history(&self) -> Vec<Task> {
        self.inner.lock().history.iter().cloned().collect()
    }

    pub fn metrics(&self) -> SystemMetrics {
        self.inner.lock().metrics.clone()
    }

    /// Snapshot writes that failed since the engine was opened.
    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }
}

fn record_transition(task: &Task, from: TaskStatus, to: TaskStatus, outcome: TransitionOutcome) {
    metrics::counter!("hive_tasks_transitions_total", "to" => to.as_str()).increment(1);
    match outcome {
        TransitionOutcome::Requeued => warn!(
            task_id = %task.id,
            retry_count = task.retry_count,
            max_retries = task.max_retries,
            "Task failed, re-enqueued"
        ),
        _ => debug!(task_id = %task.id, %from, %to, "Task transitioned"),
    }
}
