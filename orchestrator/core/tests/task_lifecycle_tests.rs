// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the task state machine and its on-disk snapshot.

use hive_core::application::state_engine::{StateEngine, StateEngineConfig, StateError};
use hive_core::domain::node_config::StorageConfig;
use hive_core::domain::task::{TaskError, TaskPermissions, TaskStatus};
use serde_json::Map;
use tempfile::TempDir;

fn storage(dir: &TempDir) -> StorageConfig {
    StorageConfig {
        state_dir: dir.path().to_path_buf(),
        ..Default::default()
    }
}

fn open(dir: &TempDir) -> StateEngine {
    StateEngine::open(StateEngineConfig::from(&storage(dir)))
}

fn fail_until_settled(engine: &StateEngine, max_retries: u32) -> hive_core::domain::task::Task {
    let task = engine.create_task("codex", "refactor module", TaskPermissions::default(), max_retries, Map::new());
    loop {
        engine.transition_task(task.id, TaskStatus::Running, Map::new()).unwrap();
        let after = engine.transition_task(task.id, TaskStatus::Failed, Map::new()).unwrap();
        if after.status != TaskStatus::Pending {
            return after;
        }
    }
}

#[test]
fn test_illegal_transition_leaves_task_untouched() {
    let engine = StateEngine::ephemeral(100);
    let task = engine.create_task("codex", "x", TaskPermissions::default(), 3, Map::new());

    let err = engine
        .transition_task(task.id, TaskStatus::Completed, Map::new())
        .unwrap_err();
    assert!(matches!(
        err,
        StateError::Task(TaskError::InvalidTransition {
            from: TaskStatus::Pending,
            to: TaskStatus::Completed,
            ..
        })
    ));

    let unchanged = engine.get_task(task.id).unwrap();
    assert_eq!(unchanged.status, TaskStatus::Pending);
    assert!(unchanged.history.is_empty());
}

#[test]
fn test_two_retries_end_failed() {
    let engine = StateEngine::ephemeral(100);
    let task = fail_until_settled(&engine, 2);

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    let path: Vec<(TaskStatus, TaskStatus)> = task.history.iter().map(|h| (h.from, h.to)).collect();
    assert_eq!(
        path,
        vec![
            (TaskStatus::Pending, TaskStatus::Running),
            (TaskStatus::Running, TaskStatus::Failed),
            (TaskStatus::Pending, TaskStatus::Running),
            (TaskStatus::Running, TaskStatus::Failed),
        ]
    );
    assert!(task.history[1].metadata.contains_key("requeued"));
    assert!(!task.history[3].metadata.contains_key("requeued"));
}

#[test]
fn test_three_failures_record_six_transitions() {
    let engine = StateEngine::ephemeral(100);
    let task = fail_until_settled(&engine, 3);

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 3);
    assert_eq!(task.history.len(), 6);
    assert!(engine.active_tasks().is_empty());
    assert_eq!(engine.task_history().len(), 1);
    assert_eq!(engine.metrics().failed_tasks, 1);

    let err = engine.retry_task(task.id).unwrap_err();
    assert!(matches!(err, StateError::Task(TaskError::RetryExhausted { retry_count: 3, .. })));
}

#[test]
fn test_cancelling_failed_task_keeps_metrics() {
    let engine = StateEngine::ephemeral(100);
    let task = fail_until_settled(&engine, 1);
    let before = engine.metrics();

    let cancelled = engine
        .transition_task(task.id, TaskStatus::Cancelled, Map::new())
        .unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(engine.metrics(), before);
    assert_eq!(engine.task_history().len(), 1);
}

#[test]
fn test_unknown_task() {
    let engine = StateEngine::ephemeral(100);
    let err = engine
        .transition_task(Default::default(), TaskStatus::Running, Map::new())
        .unwrap_err();
    assert!(matches!(err, StateError::TaskNotFound(_)));
}

#[test]
fn test_history_is_bounded() {
    let engine = StateEngine::ephemeral(3);
    for _ in 0..5 {
        let task = engine.create_task("kimi", "doc", TaskPermissions::default(), 3, Map::new());
        engine.transition_task(task.id, TaskStatus::Cancelled, Map::new()).unwrap();
    }
    assert_eq!(engine.task_history().len(), 3);
    assert_eq!(engine.metrics().cancelled_tasks, 5);
}

#[test]
fn test_reload_restores_active_tasks_and_metrics() {
    let dir = TempDir::new().unwrap();
    let (active, metrics) = {
        let engine = open(&dir);
        let a = engine.create_task("codex", "a", TaskPermissions::default(), 3, Map::new());
        let b = engine.create_task("kimi", "b", TaskPermissions::read_only(vec!["src/".into()]), 3, Map::new());
        engine.create_task("claude", "c", TaskPermissions::default(), 3, Map::new());
        engine.transition_task(a.id, TaskStatus::Running, Map::new()).unwrap();
        engine.transition_task(a.id, TaskStatus::Completed, Map::new()).unwrap();
        engine.transition_task(b.id, TaskStatus::Running, Map::new()).unwrap();
        assert_eq!(engine.persist_failures(), 0);
        (engine.active_tasks(), engine.metrics())
    };

    let reopened = open(&dir);
    assert_eq!(reopened.active_tasks(), active);
    assert_eq!(reopened.metrics(), metrics);
    assert_eq!(reopened.task_history().len(), 1);
}

#[test]
fn test_corrupt_state_file_falls_back_to_backup() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(&dir);
        engine.create_task("codex", "first", TaskPermissions::default(), 3, Map::new());
        engine.create_task("codex", "second", TaskPermissions::default(), 3, Map::new());
    }
    std::fs::write(storage(&dir).state_file(), "{ truncated").unwrap();

    let reopened = open(&dir);
    let active = reopened.active_tasks();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].content, "first");
}

#[test]
fn test_unrecoverable_state_starts_empty() {
    let dir = TempDir::new().unwrap();
    std::fs::write(storage(&dir).state_file(), "not json").unwrap();

    let engine = open(&dir);
    assert!(engine.active_tasks().is_empty());
    assert_eq!(engine.metrics().total_tasks, 0);
}
