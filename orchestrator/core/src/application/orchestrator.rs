// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Orchestrator
//!
//! Single dispatch loop over the orchestrator's bus inbox. TASK messages are
//! validated against the agent registry, recorded in the [`StateEngine`],
//! executed through the [`AgentRunner`] and answered with a RESPONSE carrying
//! the request's correlation id.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Compose state, bus, registry and runner into task execution
//! - **Related:** `application::state_engine`, `infrastructure::synaptic_bus`

use crate::application::state_engine::{StateEngine, StateError};
use crate::domain::agent::{AgentRegistry, RegistryError};
use crate::domain::message::{
    AuditRecord, Command, MessageType, Signal, SynapticMessage, TaskRequest, TaskResponse,
};
use crate::domain::node_config::OrchestratorConfig;
use crate::domain::runtime::{preview, AgentRunner};
use crate::domain::task::{Task, TaskId, TaskPermissions, TaskStatus};
use crate::infrastructure::synaptic_bus::SynapticBus;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Orchestrator {0} is not connected to the bus")]
    NotConnected(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Malformed {kind} payload: {source}")]
    Payload {
        kind: MessageType,
        #[source]
        source: serde_json::Error,
    },
}

/// What the last runner attempt reported; copied into the RESPONSE.
#[derive(Debug, Default)]
struct Attempt {
    exit_code: Option<i32>,
    stdout_preview: String,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    state: Arc<StateEngine>,
    bus: Arc<SynapticBus>,
    registry: Arc<dyn AgentRegistry>,
    runner: Arc<dyn AgentRunner>,
    halted: AtomicBool,
}

impl Orchestrator {
    /// Connects `config.agent_id` to the bus.
    pub fn new(
        config: OrchestratorConfig,
        state: Arc<StateEngine>,
        bus: Arc<SynapticBus>,
        registry: Arc<dyn AgentRegistry>,
        runner: Arc<dyn AgentRunner>,
    ) -> Self {
        bus.connect(&config.agent_id);
        Self {
            config,
            state,
            bus,
            registry,
            runner,
            halted: AtomicBool::new(false),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    /// Validate `agent`, allocate a task id and enqueue the TASK message on
    /// the orchestrator's own inbox. The task is recorded when the loop
    /// dispatches it.
    pub async fn create_task(
        &self,
        agent: &str,
        content: &str,
        permissions: TaskPermissions,
    ) -> Result<TaskId, OrchestratorError> {
        self.submit(TaskRequest {
            task_id: None,
            agent: agent.to_string(),
            content: content.to_string(),
            permissions,
            max_retries: None,
            metadata: Map::new(),
        })
        .await
    }

    /// [`Orchestrator::create_task`] with retry budget and metadata.
    pub async fn submit(&self, mut request: TaskRequest) -> Result<TaskId, OrchestratorError> {
        if !self.registry.validate_agent_exists(&request.agent).await {
            return Err(OrchestratorError::UnknownAgent(request.agent));
        }
        if !self.bus.is_connected(self.agent_id()) {
            return Err(OrchestratorError::NotConnected(self.agent_id().to_string()));
        }

        let mut id = request.task_id.unwrap_or_default();
        while self.state.get_task(id).is_some() {
            id = TaskId::new();
        }
        request.task_id = Some(id);

        let content = serde_json::to_value(&request).map_err(|source| OrchestratorError::Payload {
            kind: MessageType::Task,
            source,
        })?;
        self.bus.send(SynapticMessage::unicast(
            MessageType::Task,
            self.agent_id(),
            self.agent_id(),
            content,
        ));
        info!(task_id = %id, agent = %request.agent, "Task enqueued");
        Ok(id)
    }

    /// Run until halted.
    pub async fn run(&self) {
        self.run_until(CancellationToken::new()).await
    }

    /// Run until halted or `shutdown` fires. A message being dispatched is
    /// always finished first. A pruned connection is re-established before
    /// the next receive.
    pub async fn run_until(&self, shutdown: CancellationToken) {
        let receive_timeout = Duration::from_millis(self.config.receive_timeout_ms);
        info!(agent_id = %self.agent_id(), "Orchestrator loop started");

        while !self.is_halted() {
            self.keep_alive();
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = self.bus.receive(self.agent_id(), receive_timeout) => message,
            };
            let Some(message) = message else {
                continue;
            };
            let kind = message.kind;
            let from = message.from.clone();
            if let Err(e) = self.dispatch(message).await {
                warn!(kind = %kind, from = %from, error = %e, "Message dropped");
            }
        }
        info!(agent_id = %self.agent_id(), halted = self.is_halted(), "Orchestrator loop stopped");
    }

    /// Handle one message. Exposed for transports that don't go through the bus.
    pub async fn dispatch(&self, message: SynapticMessage) -> Result<(), OrchestratorError> {
        metrics::counter!("hive_orchestrator_messages_total", "kind" => message.kind.to_string())
            .increment(1);
        match message.kind {
            MessageType::Task => self.handle_task(&message).await,
            MessageType::Signal => self.handle_signal(&message).await,
            MessageType::Command => self.handle_command(&message).await,
            MessageType::Audit => {
                self.handle_audit(&message);
                Ok(())
            }
            MessageType::Heartbeat => {
                self.bus.heartbeat(&message.from);
                Ok(())
            }
            MessageType::Response | MessageType::Query => {
                debug!(kind = %message.kind, from = %message.from, "Ignoring message");
                Ok(())
            }
        }
    }

    pub fn halt(&self) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            info!("Orchestrator halt requested");
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Refresh the orchestrator's heartbeat, reconnecting if maintenance
    /// pruned it.
    fn keep_alive(&self) {
        if !self.bus.heartbeat(self.agent_id()) {
            warn!(agent_id = %self.agent_id(), "Orchestrator connection lost; reconnecting");
            self.bus.connect(self.agent_id());
        }
    }

    /// Drive `work` to completion, heartbeating often enough that the bus
    /// never sees the orchestrator as stale meanwhile.
    async fn with_heartbeat<F: Future>(&self, work: F) -> F::Output {
        let period = (self.bus.settings().liveness_window / 3).max(Duration::from_millis(10));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(work);
        loop {
            tokio::select! {
                output = &mut work => return output,
                _ = ticker.tick() => self.keep_alive(),
            }
        }
    }

    async fn handle_task(&self, message: &SynapticMessage) -> Result<(), OrchestratorError> {
        let request: TaskRequest = payload(message)?;
        if !self.registry.validate_agent_exists(&request.agent).await {
            return Err(OrchestratorError::UnknownAgent(request.agent));
        }

        let max_retries = request.max_retries.unwrap_or(self.config.default_max_retries);
        let task = match request.task_id {
            Some(id) => self.state.create_task_with_id(
                id,
                &request.agent,
                &request.content,
                request.permissions,
                max_retries,
                request.metadata,
            )?,
            None => self.state.create_task(
                &request.agent,
                &request.content,
                request.permissions,
                max_retries,
                request.metadata,
            ),
        };

        let (task, attempt) = self.execute_task(task.id).await?;
        let response = TaskResponse {
            task_id: task.id,
            agent: task.agent.clone(),
            status: task.status,
            success: task.status == TaskStatus::Completed,
            exit_code: attempt.exit_code,
            duration_secs: task.duration_secs(),
            stdout_preview: attempt.stdout_preview,
            retry_count: task.retry_count,
        };
        let content = serde_json::to_value(&response).map_err(|source| OrchestratorError::Payload {
            kind: MessageType::Response,
            source,
        })?;
        self.bus.send(message.reply(self.agent_id(), MessageType::Response, content));
        Ok(())
    }

    /// Drive a pending task to a settled state, re-running it while failures
    /// put it back to pending.
    async fn execute_task(&self, task_id: TaskId) -> Result<(Task, Attempt), OrchestratorError> {
        let timeout = Duration::from_secs(self.config.task_timeout_secs);
        loop {
            let task = self.state.transition_task(task_id, TaskStatus::Running, Map::new())?;
            debug!(task_id = %task.id, agent = %task.agent, attempt = task.retry_count + 1, "Executing task");

            let mut metadata = Map::new();
            let mut attempt = Attempt::default();
            let run = self.with_heartbeat(self.runner.execute(&task));
            let succeeded = match tokio::time::timeout(timeout, run).await {
                Ok(Ok(output)) => {
                    attempt.exit_code = output.exit_code;
                    attempt.stdout_preview = output.stdout_preview();
                    metadata.insert("exit_code".to_string(), json!(output.exit_code));
                    metadata.insert("duration_secs".to_string(), json!(output.duration_secs));
                    metadata.insert("stdout_preview".to_string(), json!(attempt.stdout_preview));
                    metadata.insert("stderr_preview".to_string(), json!(output.stderr_preview()));
                    output.success
                }
                Ok(Err(e)) => {
                    error!(task_id = %task.id, agent = %task.agent, error = %e, "Agent runner failed");
                    metadata.insert("error".to_string(), Value::String(preview(&e.to_string())));
                    false
                }
                Err(_) => {
                    error!(task_id = %task.id, timeout_secs = timeout.as_secs(), "Task execution timed out");
                    metadata.insert(
                        "error".to_string(),
                        Value::String(format!("timed out after {}s", timeout.as_secs())),
                    );
                    false
                }
            };

            let next = if succeeded {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            };
            let task = self.state.transition_task(task_id, next, metadata)?;
            if task.status == TaskStatus::Pending {
                info!(task_id = %task.id, retry_count = task.retry_count, max_retries = task.max_retries, "Task requeued");
                continue;
            }
            info!(task_id = %task.id, status = %task.status, retry_count = task.retry_count, "Task settled");
            return Ok((task, attempt));
        }
    }

    async fn handle_signal(&self, message: &SynapticMessage) -> Result<(), OrchestratorError> {
        match payload::<Signal>(message)? {
            Signal::WakeUp => {
                let pending = self.state.pending_tasks(self.config.wake_up_batch);
                info!(count = pending.len(), "Wake-up: re-executing pending tasks");
                for task in pending {
                    if let Err(e) = self.execute_task(task.id).await {
                        warn!(task_id = %task.id, error = %e, "Pending task could not be executed");
                    }
                }
                Ok(())
            }
            Signal::Halt => {
                self.halt();
                Ok(())
            }
            Signal::Retry { task_id } => {
                let task = self.state.retry_task(task_id)?;
                info!(task_id = %task.id, retry_count = task.retry_count, "Task re-queued on request");
                Ok(())
            }
            Signal::AgentConnected { agent_id } | Signal::AgentDisconnected { agent_id } => {
                debug!(agent_id = %agent_id, "Ignoring connection signal");
                Ok(())
            }
        }
    }

    async fn handle_command(&self, message: &SynapticMessage) -> Result<(), OrchestratorError> {
        match payload::<Command>(message)? {
            Command::ReloadRegistry => {
                self.registry.reload().await?;
                let agents = self.registry.list_agents().await.len();
                info!(agents, "Agent registry reloaded");
            }
            Command::Status => {
                let status = json!({
                    "metrics": self.state.metrics(),
                    "active_tasks": self.state.active_tasks().len(),
                    "history": self.state.task_history().len(),
                    "halted": self.is_halted(),
                });
                self.bus.send(message.reply(self.agent_id(), MessageType::Response, status));
            }
        }
        Ok(())
    }

    fn handle_audit(&self, message: &SynapticMessage) {
        match message.payload::<AuditRecord>() {
            Ok(record) => info!(
                from = %message.from,
                action = %record.action,
                subject = ?record.subject,
                details = %record.details,
                "Audit"
            ),
            Err(_) => info!(from = %message.from, content = %message.content, "Audit"),
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(message: &SynapticMessage) -> Result<T, OrchestratorError> {
    message.payload().map_err(|source| OrchestratorError::Payload {
        kind: message.kind,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::runtime::{RunnerError, RunnerOutput};
    use crate::infrastructure::registry::InMemoryAgentRegistry;
    use crate::infrastructure::synaptic_bus::BusSettings;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted outcomes; succeeds once the script runs out.
    #[derive(Default)]
    struct ScriptedRunner {
        script: Mutex<VecDeque<bool>>,
        calls: Mutex<Vec<TaskId>>,
    }

    impl ScriptedRunner {
        fn new(script: &[bool]) -> Self {
            Self {
                script: Mutex::new(script.iter().copied().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AgentRunner for ScriptedRunner {
        async fn execute(&self, task: &Task) -> Result<RunnerOutput, RunnerError> {
            self.calls.lock().push(task.id);
            let success = self.script.lock().pop_front().unwrap_or(true);
            Ok(RunnerOutput {
                success,
                exit_code: Some(if success { 0 } else { 1 }),
                stdout: format!("ran {}", task.content),
                stderr: String::new(),
                duration_secs: 0.01,
            })
        }
    }

    fn orchestrator(runner: Arc<ScriptedRunner>) -> (Orchestrator, Arc<SynapticBus>, Arc<StateEngine>) {
        let bus = Arc::new(SynapticBus::new(BusSettings::default()));
        let state = Arc::new(StateEngine::ephemeral(100));
        let registry = Arc::new(InMemoryAgentRegistry::with_names(&["codex"]));
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            state.clone(),
            bus.clone(),
            registry,
            runner,
        );
        (orchestrator, bus, state)
    }

    async fn next(bus: &SynapticBus, agent: &str) -> SynapticMessage {
        bus.receive(agent, Duration::from_secs(1)).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_task_rejects_unknown_agent() {
        let (orchestrator, bus, _) = orchestrator(Arc::new(ScriptedRunner::default()));
        let err = orchestrator
            .create_task("nobody", "do it", TaskPermissions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownAgent(name) if name == "nobody"));
        assert_eq!(bus.pending("orchestrator"), 0);
    }

    #[tokio::test]
    async fn test_task_runs_to_completion_and_replies() {
        let runner = Arc::new(ScriptedRunner::default());
        let (orchestrator, bus, state) = orchestrator(runner.clone());
        bus.connect("kimi");

        let request = TaskRequest {
            task_id: None,
            agent: "codex".to_string(),
            content: "lint".to_string(),
            permissions: TaskPermissions::default(),
            max_retries: None,
            metadata: Map::new(),
        };
        let message = SynapticMessage::unicast(
            MessageType::Task,
            "kimi",
            "orchestrator",
            serde_json::to_value(&request).unwrap(),
        )
        .with_correlation_id("corr-1");
        orchestrator.dispatch(message).await.unwrap();

        let reply = next(&bus, "kimi").await;
        assert_eq!(reply.kind, MessageType::Response);
        assert_eq!(reply.correlation_id.as_deref(), Some("corr-1"));
        let response: TaskResponse = reply.payload().unwrap();
        assert!(response.success);
        assert_eq!(response.status, TaskStatus::Completed);
        assert_eq!(response.stdout_preview, "ran lint");

        let task = state.get_task(response.task_id).unwrap();
        assert_eq!(task.metadata["exit_code"], json!(0));
        assert_eq!(state.metrics().completed_tasks, 1);
        assert_eq!(runner.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_requeued_task_is_reexecuted_until_exhausted() {
        let runner = Arc::new(ScriptedRunner::new(&[false, false, false]));
        let (orchestrator, bus, state) = orchestrator(runner.clone());

        let id = orchestrator
            .create_task("codex", "flaky", TaskPermissions::default())
            .await
            .unwrap();
        let message = next(&bus, "orchestrator").await;
        orchestrator.dispatch(message).await.unwrap();

        let task = state.get_task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 3);
        assert_eq!(task.history.len(), 6);
        assert_eq!(runner.calls.lock().len(), 3);
        assert_eq!(state.metrics().failed_tasks, 1);
    }

    #[tokio::test]
    async fn test_halt_signal_stops_the_loop() {
        let (orchestrator, bus, _) = orchestrator(Arc::new(ScriptedRunner::default()));
        bus.connect("operator");
        bus.send_to(
            MessageType::Signal,
            "operator",
            "orchestrator",
            serde_json::to_value(Signal::Halt).unwrap(),
        );
        tokio::time::timeout(Duration::from_secs(5), orchestrator.run())
            .await
            .unwrap();
        assert!(orchestrator.is_halted());
    }

    #[tokio::test]
    async fn test_retry_signal_on_exhausted_task_is_refused() {
        let runner = Arc::new(ScriptedRunner::new(&[false]));
        let (orchestrator, bus, state) = orchestrator(runner);
        let request = TaskRequest {
            task_id: None,
            agent: "codex".to_string(),
            content: "once".to_string(),
            permissions: TaskPermissions::default(),
            max_retries: Some(1),
            metadata: Map::new(),
        };
        let id = orchestrator.submit(request).await.unwrap();
        orchestrator.dispatch(next(&bus, "orchestrator").await).await.unwrap();
        assert_eq!(state.get_task(id).unwrap().status, TaskStatus::Failed);

        let retry = SynapticMessage::unicast(
            MessageType::Signal,
            "operator",
            "orchestrator",
            serde_json::to_value(Signal::Retry { task_id: id }).unwrap(),
        );
        let err = orchestrator.dispatch(retry).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::State(_)));
        assert_eq!(state.get_task(id).unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_status_command_replies_with_metrics() {
        let (orchestrator, bus, _) = orchestrator(Arc::new(ScriptedRunner::default()));
        bus.connect("operator");
        let command = SynapticMessage::unicast(
            MessageType::Command,
            "operator",
            "orchestrator",
            serde_json::to_value(Command::Status).unwrap(),
        );
        orchestrator.dispatch(command).await.unwrap();

        let reply = next(&bus, "operator").await;
        assert_eq!(reply.kind, MessageType::Response);
        assert_eq!(reply.content["metrics"]["total_tasks"], json!(0));
        assert_eq!(reply.content["halted"], json!(false));
    }

    #[tokio::test]
    async fn test_submit_fails_when_disconnected() {
        let (orchestrator, bus, state) = orchestrator(Arc::new(ScriptedRunner::default()));
        bus.disconnect("orchestrator");

        let err = orchestrator
            .create_task("codex", "lost", TaskPermissions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotConnected(id) if id == "orchestrator"));
        assert_eq!(state.metrics().total_tasks, 0);
    }

    #[tokio::test]
    async fn test_loop_reconnects_after_being_pruned() {
        let (orchestrator, bus, _) = orchestrator(Arc::new(ScriptedRunner::default()));
        let orchestrator = Arc::new(orchestrator);
        bus.disconnect("orchestrator");

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            let shutdown = shutdown.clone();
            async move { orchestrator.run_until(shutdown).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(bus.is_connected("orchestrator"));

        orchestrator
            .create_task("codex", "after reconnect", TaskPermissions::default())
            .await
            .unwrap();
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wake_up_executes_pending_tasks() {
        let runner = Arc::new(ScriptedRunner::default());
        let (orchestrator, _, state) = orchestrator(runner.clone());
        let task = state.create_task("codex", "left over", TaskPermissions::default(), 3, Map::new());

        let wake = SynapticMessage::broadcast(
            MessageType::Signal,
            "operator",
            serde_json::to_value(Signal::WakeUp).unwrap(),
        );
        orchestrator.dispatch(wake).await.unwrap();
        assert_eq!(state.get_task(task.id).unwrap().status, TaskStatus::Completed);
        assert_eq!(runner.calls.lock().as_slice(), &[task.id]);
    }
}
