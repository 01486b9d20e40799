// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Synaptic Messages
//!
//! The in-process envelope carried by the
//! [`SynapticBus`](crate::infrastructure::synaptic_bus::SynapticBus), plus the
//! typed payloads the orchestrator understands for each message kind.
//!
//! Envelopes are never put on a wire by this crate; the serde derives exist
//! for the replay buffer, audit logging and external transports.

use crate::domain::task::{TaskId, TaskPermissions, TaskStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Default time-to-live applied by [`SynapticMessage::new`].
pub const DEFAULT_TTL_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Task,
    Response,
    Signal,
    Audit,
    Command,
    Query,
    Heartbeat,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Task => "TASK",
            MessageType::Response => "RESPONSE",
            MessageType::Signal => "SIGNAL",
            MessageType::Audit => "AUDIT",
            MessageType::Command => "COMMAND",
            MessageType::Query => "QUERY",
            MessageType::Heartbeat => "HEARTBEAT",
        };
        f.write_str(name)
    }
}

/// Delivery priority. Lower values are delivered first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
    Background = 4,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::Critical),
            1 => Ok(Priority::High),
            2 => Ok(Priority::Normal),
            3 => Ok(Priority::Low),
            4 => Ok(Priority::Background),
            other => Err(format!("priority must be in 0..=4, got {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynapticMessage {
    pub id: MessageId,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub from: String,
    /// `None` broadcasts to every connected agent except the sender.
    pub to: Option<String>,
    pub content: Value,
    #[serde(default)]
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "ttl")]
    pub ttl_secs: u64,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl SynapticMessage {
    pub fn new(kind: MessageType, from: impl Into<String>, to: Option<String>, content: Value) -> Self {
        Self {
            id: MessageId::new(),
            kind,
            from: from.into(),
            to,
            content,
            priority: Priority::default(),
            timestamp: Utc::now(),
            ttl_secs: DEFAULT_TTL_SECS,
            correlation_id: None,
            context: Map::new(),
        }
    }

    pub fn unicast(kind: MessageType, from: impl Into<String>, to: impl Into<String>, content: Value) -> Self {
        Self::new(kind, from, Some(to.into()), content)
    }

    pub fn broadcast(kind: MessageType, from: impl Into<String>, content: Value) -> Self {
        Self::new(kind, from, None, content)
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }

    /// A ttl too large to represent never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match i64::try_from(self.ttl_secs).ok().and_then(Duration::try_seconds) {
            Some(ttl) => now - self.timestamp > ttl,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Build a reply addressed to the sender, threading the correlation id.
    pub fn reply(&self, from: impl Into<String>, kind: MessageType, content: Value) -> SynapticMessage {
        let correlation = self
            .correlation_id
            .clone()
            .unwrap_or_else(|| self.id.to_string());
        SynapticMessage::unicast(kind, from, self.from.clone(), content)
            .with_priority(self.priority)
            .with_correlation_id(correlation)
    }

    /// Decode the content into a typed payload.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.content.clone())
    }
}

/// Content of a `SIGNAL` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    WakeUp,
    Halt,
    Retry { task_id: TaskId },
    AgentConnected { agent_id: String },
    AgentDisconnected { agent_id: String },
}

/// Content of a `COMMAND` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    ReloadRegistry,
    Status,
}

/// Content of a `TASK` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Pre-allocated by `Orchestrator::create_task`; external transports may omit it.
    #[serde(default)]
    pub task_id: Option<TaskId>,
    pub agent: String,
    pub content: String,
    #[serde(default)]
    pub permissions: TaskPermissions,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Content of the `RESPONSE` sent back after a task settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: TaskId,
    pub agent: String,
    pub status: TaskStatus,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub duration_secs: Option<f64>,
    pub stdout_preview: String,
    pub retry_count: u32,
}

/// Content of an `AUDIT` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub details: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ttl_zero_message_in_the_past_is_expired() {
        let mut message = SynapticMessage::unicast(MessageType::Task, "kimi", "codex", json!({}))
            .with_ttl(0);
        message.timestamp = Utc::now() - Duration::seconds(1);
        assert!(message.is_expired());
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let message = SynapticMessage::broadcast(MessageType::Audit, "kimi", json!({})).with_ttl(u64::MAX);
        assert!(!message.is_expired());
        assert!(!message.is_expired_at(Utc::now() + Duration::days(365 * 100)));
    }

    #[test]
    fn test_fresh_message_is_not_expired() {
        let message = SynapticMessage::broadcast(MessageType::Query, "kimi", json!({"q": 1}));
        assert!(!message.is_expired());
        assert!(message.is_broadcast());
    }

    #[test]
    fn test_priority_ordering_and_bounds() {
        assert!(Priority::Critical < Priority::Normal);
        assert!(Priority::try_from(5).is_err());
        let encoded = serde_json::to_value(Priority::Low).unwrap();
        assert_eq!(encoded, json!(3));
    }

    #[test]
    fn test_reply_threads_correlation_id() {
        let request = SynapticMessage::unicast(MessageType::Command, "cli", "orchestrator", json!({}))
            .with_correlation_id("abc");
        let reply = request.reply("orchestrator", MessageType::Response, json!({"ok": true}));
        assert_eq!(reply.to.as_deref(), Some("cli"));
        assert_eq!(reply.correlation_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_signal_payloads() {
        let halt: Signal = serde_json::from_value(json!({"signal": "HALT"})).unwrap();
        assert_eq!(halt, Signal::Halt);
        let wake: Signal = serde_json::from_value(json!({"signal": "WAKE_UP"})).unwrap();
        assert_eq!(wake, Signal::WakeUp);
        let command: Command = serde_json::from_value(json!({"command": "reload_registry"})).unwrap();
        assert_eq!(command, Command::ReloadRegistry);
    }
}
