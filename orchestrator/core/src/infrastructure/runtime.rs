// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::agent::AgentRegistry;
use crate::domain::runtime::{AgentRunner, RunnerError, RunnerOutput};
use crate::domain::task::Task;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Runs a task by launching the agent's configured command.
///
/// The task content is written to the child's stdin; the task id, agent and
/// permissions are exported as `HIVE_TASK_ID`, `HIVE_AGENT` and
/// `HIVE_TASK_PERMISSIONS` (JSON).
pub struct CommandAgentRunner {
    registry: Arc<dyn AgentRegistry>,
    default_timeout: Duration,
}

impl CommandAgentRunner {
    pub fn new(registry: Arc<dyn AgentRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
        }
    }
}

#[async_trait]
impl AgentRunner for CommandAgentRunner {
    async fn execute(&self, task: &Task) -> Result<RunnerOutput, RunnerError> {
        let agent = self
            .registry
            .get_agent_config(&task.agent)
            .await
            .map_err(|e| RunnerError::ExecutionFailed(e.to_string()))?;
        let program = agent
            .command
            .clone()
            .ok_or_else(|| RunnerError::NotRunnable(agent.name.clone()))?;
        let timeout = agent
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let permissions = serde_json::to_string(&task.permissions)
            .map_err(|e| RunnerError::SpawnFailed(e.to_string()))?;

        let mut command = tokio::process::Command::new(&program);
        command.kill_on_drop(true);
        command.args(&agent.args);
        command.envs(&agent.env);
        command.env("HIVE_TASK_ID", task.id.to_string());
        command.env("HIVE_AGENT", &task.agent);
        command.env("HIVE_TASK_PERMISSIONS", permissions);
        if let Some(dir) = &agent.working_dir {
            command.current_dir(dir);
        }
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        info!(task_id = %task.id, agent = %task.agent, program = %program, "Launching agent process");
        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|e| RunnerError::SpawnFailed(format!("{}: {}", program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // a child that never reads stdin is not an error
            if let Err(e) = stdin.write_all(task.content.as_bytes()).await {
                debug!(task_id = %task.id, error = %e, "Agent closed stdin early");
            }
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| RunnerError::Timeout(timeout.as_secs()))?
            .map_err(|e| RunnerError::ExecutionFailed(e.to_string()))?;

        Ok(RunnerOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_secs: started.elapsed().as_secs_f64(),
        })
    }
}
