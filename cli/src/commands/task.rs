// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task management commands
//!
//! Commands: create, show, list
//!
//! `create` runs embedded: it opens the node's state directory, enqueues the
//! task through the orchestrator and drives the dispatch loop until the task
//! settles. Don't run it against a state directory a daemon is using.

use anyhow::{anyhow, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use hive_core::application::context::AppContext;
use hive_core::application::state_engine::{StateEngine, StateEngineConfig};
use hive_core::domain::message::TaskRequest;
use hive_core::domain::node_config::HiveConfig;
use hive_core::domain::task::{Task, TaskId, TaskPermissions, TaskStatus};
use serde_json::Map;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Subcommand)]
pub enum TaskCommand {
    /// Create a task and run it to completion
    Create {
        /// Registered agent that executes the task
        #[arg(short, long)]
        agent: String,

        /// Task content handed to the agent
        #[arg(short, long)]
        content: String,

        /// Paths the agent may read
        #[arg(long, value_name = "PATH")]
        read: Vec<String>,

        /// Paths the agent may write
        #[arg(long, value_name = "PATH")]
        write: Vec<String>,

        /// Paths the agent must not touch
        #[arg(long, value_name = "PATH")]
        deny: Vec<String>,

        /// Retry budget (default: orchestrator.default_max_retries)
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Show one task with its transition history
    Show {
        /// Task ID
        task_id: String,
    },

    /// List active and recent tasks
    List {
        /// Maximum number of history entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

pub async fn handle_command(command: TaskCommand, config_path: Option<PathBuf>) -> Result<()> {
    let (config, source) =
        HiveConfig::load_or_default(config_path).context("Failed to load configuration")?;

    match command {
        TaskCommand::Create {
            agent,
            content,
            read,
            write,
            deny,
            max_retries,
        } => {
            let permissions = TaskPermissions { read, write, deny };
            create(config, source, agent, content, permissions, max_retries).await
        }
        TaskCommand::Show { task_id } => show(&config, &task_id),
        TaskCommand::List { limit } => list(&config, limit),
    }
}

async fn create(
    config: HiveConfig,
    source: Option<PathBuf>,
    agent: String,
    content: String,
    permissions: TaskPermissions,
    max_retries: Option<u32>,
) -> Result<()> {
    let context = AppContext::build(config, source);
    let task = run_embedded(&context, agent, content, permissions, max_retries).await?;
    print_task(&task);
    if task.status != TaskStatus::Completed {
        return Err(anyhow!("Task {} finished as {}", task.id, task.status));
    }
    Ok(())
}

/// Submit the task and dispatch orchestrator messages until it reaches a
/// terminal status.
pub async fn run_embedded(
    context: &AppContext,
    agent: String,
    content: String,
    permissions: TaskPermissions,
    max_retries: Option<u32>,
) -> Result<Task> {
    let orchestrator = &context.orchestrator;
    let spec = &context.config.spec.orchestrator;
    let task_id = orchestrator
        .submit(TaskRequest {
            task_id: None,
            agent,
            content,
            permissions,
            max_retries,
            metadata: Map::new(),
        })
        .await
        .context("Failed to submit task")?;

    let retries = u64::from(max_retries.unwrap_or(spec.default_max_retries)) + 1;
    let deadline = Instant::now() + Duration::from_secs(spec.task_timeout_secs.saturating_mul(retries) + 5);
    let receive_timeout = Duration::from_millis(spec.receive_timeout_ms);

    loop {
        if let Some(task) = context.state.get_task(task_id) {
            if task.status.is_terminal() {
                return Ok(task);
            }
        }
        if Instant::now() >= deadline {
            return Err(anyhow!("Timed out waiting for task {}", task_id));
        }
        if let Some(message) = context.bus.receive(orchestrator.agent_id(), receive_timeout).await {
            orchestrator
                .dispatch(message)
                .await
                .context("Failed to dispatch task message")?;
        }
    }
}

fn open_state(config: &HiveConfig) -> StateEngine {
    StateEngine::open(StateEngineConfig::from(&config.spec.storage))
}

fn show(config: &HiveConfig, task_id: &str) -> Result<()> {
    let id = TaskId::from_string(task_id).with_context(|| format!("Invalid task ID: {}", task_id))?;
    let task = open_state(config)
        .get_task(id)
        .ok_or_else(|| anyhow!("Task not found: {}", id))?;
    print_task(&task);
    Ok(())
}

fn list(config: &HiveConfig, limit: usize) -> Result<()> {
    let state = open_state(config);

    let active = state.active_tasks();
    println!("{}", format!("Active tasks ({}):", active.len()).bold());
    for task in &active {
        println!("  {}", task_line(task));
    }
    println!();

    let history = state.task_history();
    println!("{}", format!("Recent tasks ({}):", history.len()).bold());
    for task in history.iter().rev().take(limit) {
        println!("  {}", task_line(task));
    }
    Ok(())
}

fn status_label(status: TaskStatus) -> String {
    let label = status.as_str();
    match status {
        TaskStatus::Completed => label.green().to_string(),
        TaskStatus::Failed => label.red().to_string(),
        TaskStatus::Cancelled => label.dimmed().to_string(),
        TaskStatus::Running => label.yellow().to_string(),
        TaskStatus::Pending => label.to_string(),
    }
}

fn task_line(task: &Task) -> String {
    format!(
        "{}  {:<12} {:<10} retries {}/{}",
        task.id,
        status_label(task.status),
        task.agent,
        task.retry_count,
        task.max_retries
    )
}

fn print_task(task: &Task) {
    println!("{}", format!("Task {}", task.id).bold());
    println!("  Agent:   {}", task.agent);
    println!("  Status:  {}", status_label(task.status));
    println!("  Retries: {}/{}", task.retry_count, task.max_retries);
    if let Some(duration) = task.duration_secs() {
        println!("  Duration: {:.2}s", duration);
    }
    for (key, value) in &task.metadata {
        println!("  {}: {}", key, value);
    }
    println!("{}", "  History:".bold());
    for record in &task.history {
        println!(
            "    {} {} → {}",
            record.timestamp.format("%H:%M:%S%.3f"),
            record.from,
            record.to
        );
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use hive_core::domain::agent::{AgentConfig, AgentRegistry};
    use hive_core::domain::runtime::AgentRunner;
    use hive_core::infrastructure::memory_store::InMemoryMemoryStore;
    use hive_core::infrastructure::registry::InMemoryAgentRegistry;
    use hive_core::infrastructure::runtime::CommandAgentRunner;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(dir: &TempDir, command: &str, args: &[&str]) -> AppContext {
        let mut config = HiveConfig::default();
        config.spec.storage.state_dir = dir.path().to_path_buf();
        config.spec.orchestrator.receive_timeout_ms = 50;

        let mut agent = AgentConfig::named("worker");
        agent.command = Some(command.to_string());
        agent.args = args.iter().map(|a| a.to_string()).collect();
        let registry: Arc<dyn AgentRegistry> = Arc::new(InMemoryAgentRegistry::new(vec![agent]));
        let runner: Arc<dyn AgentRunner> =
            Arc::new(CommandAgentRunner::new(registry.clone(), Duration::from_secs(5)));
        AppContext::with_adapters(config, None, registry, runner, Arc::new(InMemoryMemoryStore::new()))
    }

    #[tokio::test]
    async fn test_embedded_task_runs_to_completion() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir, "cat", &[]);

        let task = run_embedded(
            &context,
            "worker".to_string(),
            "hello hive".to_string(),
            TaskPermissions::default(),
            Some(0),
        )
        .await
        .unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.metadata["stdout_preview"], "hello hive");

        // persisted for `task show` and `task list`
        let reopened = open_state(&context.config);
        assert_eq!(reopened.get_task(task.id).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_embedded_task_exhausts_retries() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir, "sh", &["-c", "exit 2"]);

        let task = run_embedded(
            &context,
            "worker".to_string(),
            "doomed".to_string(),
            TaskPermissions::default(),
            Some(2),
        )
        .await
        .unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 2);
    }

    #[tokio::test]
    async fn test_unknown_agent_is_rejected_before_enqueue() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir, "cat", &[]);

        let err = run_embedded(
            &context,
            "nobody".to_string(),
            String::new(),
            TaskPermissions::default(),
            None,
        )
        .await
        .unwrap_err();
        assert!(format!("{:#}", err).contains("Unknown agent: nobody"));
        assert!(context.state.active_tasks().is_empty());
    }
}
