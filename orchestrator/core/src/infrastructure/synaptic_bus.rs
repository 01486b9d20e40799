// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Synaptic Bus - In-process priority messaging between agents
//
// Each connected agent owns one inbox: a heap ordered by (priority, enqueue
// sequence) with many producers and a single consumer woken through a
// tokio Notify. Every sent message is also appended to a bounded replay ring,
// whatever happens to its delivery.
//
// Delivery never fails the sender. Messages addressed to unknown or stale
// agents, messages that are already expired and messages that would overflow
// an inbox are dropped and counted.

use crate::domain::message::{MessageId, MessageType, Priority, Signal, SynapticMessage};
use crate::domain::node_config::BusConfig;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BusSettings {
    pub inbox_capacity: usize,
    pub replay_capacity: usize,
    pub liveness_window: Duration,
    pub query_poll_interval: Duration,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self::from(&BusConfig::default())
    }
}

impl From<&BusConfig> for BusSettings {
    fn from(config: &BusConfig) -> Self {
        Self {
            inbox_capacity: config.inbox_capacity,
            replay_capacity: config.replay_capacity,
            liveness_window: Duration::from_secs(config.liveness_window_secs),
            query_poll_interval: Duration::from_millis(config.query_poll_interval_ms),
        }
    }
}

/// Why a message did not reach an inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    UnknownTarget,
    NotLive,
    InboxFull,
    Disconnected,
}

impl DropReason {
    fn as_label(self) -> &'static str {
        match self {
            DropReason::UnknownTarget => "unknown_target",
            DropReason::NotLive => "not_live",
            DropReason::InboxFull => "inbox_full",
            DropReason::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub sent: u64,
    pub delivered: u64,
    pub expired: u64,
    pub dropped_unknown_target: u64,
    pub dropped_not_live: u64,
    pub dropped_inbox_full: u64,
    pub dropped_disconnected: u64,
    pub subscriber_failures: u64,
    pub connected_agents: usize,
    pub live_agents: usize,
}

impl BusStats {
    pub fn dropped(&self) -> u64 {
        self.dropped_unknown_target
            + self.dropped_not_live
            + self.dropped_inbox_full
            + self.dropped_disconnected
    }
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    delivered: AtomicU64,
    expired: AtomicU64,
    unknown_target: AtomicU64,
    not_live: AtomicU64,
    inbox_full: AtomicU64,
    disconnected: AtomicU64,
    subscriber_failures: AtomicU64,
}

impl Counters {
    fn dropped(&self, reason: DropReason, count: u64) {
        let counter = match reason {
            DropReason::UnknownTarget => &self.unknown_target,
            DropReason::NotLive => &self.not_live,
            DropReason::InboxFull => &self.inbox_full,
            DropReason::Disconnected => &self.disconnected,
        };
        counter.fetch_add(count, AtomicOrdering::Relaxed);
        metrics::counter!("hive_bus_messages_dropped_total", "reason" => reason.as_label())
            .increment(count);
    }

    fn expired(&self) {
        self.expired.fetch_add(1, AtomicOrdering::Relaxed);
        metrics::counter!("hive_bus_messages_dropped_total", "reason" => "expired").increment(1);
    }
}

struct Queued {
    seq: u64,
    message: SynapticMessage,
}

impl Queued {
    fn key(&self) -> (Priority, u64) {
        (self.message.priority, self.seq)
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // BinaryHeap is a max-heap; invert so the lowest (priority, seq) pops first
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// One agent's presence on the bus.
pub struct AgentConnection {
    agent_id: String,
    inbox: Mutex<BinaryHeap<Queued>>,
    notify: Notify,
    last_heartbeat: Mutex<Instant>,
    connected_at: DateTime<Utc>,
    closed: AtomicBool,
}

impl AgentConnection {
    fn new(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            inbox: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            last_heartbeat: Mutex::new(Instant::now()),
            connected_at: Utc::now(),
            closed: AtomicBool::new(false),
        }
    }

    fn touch(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    fn is_alive(&self, window: Duration) -> bool {
        self.last_heartbeat.lock().elapsed() < window
    }

    fn pending(&self) -> usize {
        self.inbox.lock().len()
    }
}

type Callback = dyn Fn(&SynapticMessage) -> anyhow::Result<()> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

struct Subscription {
    id: SubscriptionId,
    callback: Arc<Callback>,
}

pub struct SynapticBus {
    connections: DashMap<String, Arc<AgentConnection>>,
    replay: Mutex<VecDeque<SynapticMessage>>,
    subscriptions: RwLock<HashMap<MessageType, Vec<Subscription>>>,
    seq: AtomicU64,
    counters: Counters,
    settings: BusSettings,
}

impl SynapticBus {
    pub fn new(settings: BusSettings) -> Self {
        Self {
            connections: DashMap::new(),
            replay: Mutex::new(VecDeque::with_capacity(settings.replay_capacity.min(4096))),
            subscriptions: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
            counters: Counters::default(),
            settings,
        }
    }

    pub fn settings(&self) -> &BusSettings {
        &self.settings
    }

    /// Register an agent inbox. Reconnecting keeps the existing inbox.
    pub fn connect(&self, agent_id: &str) {
        let mut created = false;
        {
            let connection = self.connections.entry(agent_id.to_string()).or_insert_with(|| {
                created = true;
                Arc::new(AgentConnection::new(agent_id))
            });
            if !created {
                connection.touch();
            }
        }
        if !created {
            debug!(agent_id, "Agent already connected; heartbeat refreshed");
            return;
        }
        info!(agent_id, "Agent connected to synaptic bus");
        self.announce(agent_id, Signal::AgentConnected {
            agent_id: agent_id.to_string(),
        });
    }

    /// Remove an agent. Its pending messages are discarded.
    pub fn disconnect(&self, agent_id: &str) -> bool {
        let Some((_, connection)) = self.connections.remove(agent_id) else {
            return false;
        };
        self.close(&connection);
        info!(agent_id, "Agent disconnected from synaptic bus");
        self.announce(agent_id, Signal::AgentDisconnected {
            agent_id: agent_id.to_string(),
        });
        true
    }

    fn close(&self, connection: &AgentConnection) {
        connection.closed.store(true, AtomicOrdering::SeqCst);
        let discarded = {
            let mut inbox = connection.inbox.lock();
            let n = inbox.len() as u64;
            inbox.clear();
            n
        };
        if discarded > 0 {
            self.counters.dropped(DropReason::Disconnected, discarded);
        }
        connection.notify.notify_waiters();
    }

    fn announce(&self, agent_id: &str, signal: Signal) {
        match serde_json::to_value(&signal) {
            Ok(content) => {
                self.send(
                    SynapticMessage::broadcast(MessageType::Signal, agent_id, content)
                        .with_priority(Priority::High),
                );
            }
            Err(e) => error!(agent_id, error = %e, "Failed to encode bus signal"),
        }
    }

    pub fn heartbeat(&self, agent_id: &str) -> bool {
        match self.connections.get(agent_id) {
            Some(connection) => {
                connection.touch();
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self, agent_id: &str) -> bool {
        self.connections.contains_key(agent_id)
    }

    pub fn is_alive(&self, agent_id: &str) -> bool {
        self.connections
            .get(agent_id)
            .is_some_and(|c| c.is_alive(self.settings.liveness_window))
    }

    pub fn connected_agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        agents.sort();
        agents
    }

    pub fn live_agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = self
            .connections
            .iter()
            .filter(|e| e.value().is_alive(self.settings.liveness_window))
            .map(|e| e.key().clone())
            .collect();
        agents.sort();
        agents
    }

    pub fn connected_since(&self, agent_id: &str) -> Option<DateTime<Utc>> {
        self.connections.get(agent_id).map(|c| c.connected_at)
    }

    /// Messages waiting in an agent's inbox.
    pub fn pending(&self, agent_id: &str) -> usize {
        self.connections.get(agent_id).map(|c| c.pending()).unwrap_or(0)
    }

    /// Record, fan out to subscribers and deliver. Never fails.
    pub fn send(&self, message: SynapticMessage) -> MessageId {
        let id = message.id;
        self.counters.sent.fetch_add(1, AtomicOrdering::Relaxed);
        self.record(&message);
        self.notify_subscribers(&message);

        if message.is_expired() {
            debug!(message_id = %id, kind = %message.kind, "Dropping expired message");
            self.counters.expired();
            return id;
        }

        match message.to.clone() {
            Some(target) => self.deliver_to(&target, message),
            None => {
                let targets: Vec<Arc<AgentConnection>> = self
                    .connections
                    .iter()
                    .filter(|e| e.key() != &message.from)
                    .map(|e| Arc::clone(e.value()))
                    .collect();
                for connection in targets {
                    self.deliver(&connection, message.clone());
                }
            }
        }
        id
    }

    /// Shorthand for a unicast with default priority and ttl.
    pub fn send_to(&self, kind: MessageType, from: &str, to: &str, content: serde_json::Value) -> MessageId {
        self.send(SynapticMessage::unicast(kind, from, to, content))
    }

    fn deliver_to(&self, target: &str, message: SynapticMessage) {
        let connection = self.connections.get(target).map(|c| Arc::clone(c.value()));
        match connection {
            Some(connection) => self.deliver(&connection, message),
            None => {
                debug!(target, message_id = %message.id, "Dropping message for unknown agent");
                self.counters.dropped(DropReason::UnknownTarget, 1);
            }
        }
    }

    fn deliver(&self, connection: &AgentConnection, message: SynapticMessage) {
        if !connection.is_alive(self.settings.liveness_window) {
            debug!(target = %connection.agent_id, message_id = %message.id, "Dropping message for stale agent");
            self.counters.dropped(DropReason::NotLive, 1);
            return;
        }
        {
            let mut inbox = connection.inbox.lock();
            if inbox.len() >= self.settings.inbox_capacity {
                drop(inbox);
                warn!(target = %connection.agent_id, message_id = %message.id, "Inbox full, dropping message");
                self.counters.dropped(DropReason::InboxFull, 1);
                return;
            }
            let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
            inbox.push(Queued { seq, message });
        }
        self.counters.delivered.fetch_add(1, AtomicOrdering::Relaxed);
        connection.notify.notify_one();
    }

    fn record(&self, message: &SynapticMessage) {
        if self.settings.replay_capacity == 0 {
            return;
        }
        let mut replay = self.replay.lock();
        while replay.len() >= self.settings.replay_capacity {
            replay.pop_front();
        }
        replay.push_back(message.clone());
    }

    /// Register a callback run synchronously for every sent message of `kind`.
    /// Callback errors and panics are logged and never reach the sender.
    pub fn subscribe<F>(&self, kind: MessageType, callback: F) -> SubscriptionId
    where
        F: Fn(&SynapticMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        self.subscriptions
            .write()
            .entry(kind)
            .or_default()
            .push(Subscription {
                id,
                callback: Arc::new(callback),
            });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        for list in subscriptions.values_mut() {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    fn notify_subscribers(&self, message: &SynapticMessage) {
        let callbacks: Vec<Arc<Callback>> = match self.subscriptions.read().get(&message.kind) {
            Some(list) => list.iter().map(|s| Arc::clone(&s.callback)).collect(),
            None => return,
        };
        for callback in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.counters.subscriber_failures.fetch_add(1, AtomicOrdering::Relaxed);
                    warn!(message_id = %message.id, kind = %message.kind, error = %e, "Bus subscriber failed");
                }
                Err(_) => {
                    self.counters.subscriber_failures.fetch_add(1, AtomicOrdering::Relaxed);
                    error!(message_id = %message.id, kind = %message.kind, "Bus subscriber panicked");
                }
            }
        }
    }

    fn pop_live(&self, connection: &AgentConnection) -> Option<Queued> {
        let mut inbox = connection.inbox.lock();
        while let Some(entry) = inbox.pop() {
            if entry.message.is_expired() {
                self.counters.expired();
                continue;
            }
            return Some(entry);
        }
        None
    }

    async fn receive_entry(&self, agent_id: &str, timeout: Duration) -> Option<Queued> {
        let connection = self.connections.get(agent_id).map(|c| Arc::clone(c.value()))?;
        connection.touch();
        let deadline = Instant::now() + timeout;
        loop {
            let notified = connection.notify.notified();
            if connection.closed.load(AtomicOrdering::SeqCst) {
                return None;
            }
            if let Some(entry) = self.pop_live(&connection) {
                return Some(entry);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Wait up to `timeout` for the next message. Refreshes the heartbeat.
    pub async fn receive(&self, agent_id: &str, timeout: Duration) -> Option<SynapticMessage> {
        self.receive_entry(agent_id, timeout).await.map(|e| e.message)
    }

    /// Send a QUERY and wait for the message carrying its correlation id.
    /// Unrelated messages pulled meanwhile go back to the inbox in their
    /// original order.
    pub async fn query(
        &self,
        from: &str,
        to: &str,
        content: serde_json::Value,
        timeout: Duration,
    ) -> Option<SynapticMessage> {
        if !self.is_connected(from) {
            warn!(from, "Query from an agent that is not connected");
            return None;
        }
        let correlation_id = Uuid::new_v4().to_string();
        self.send(
            SynapticMessage::unicast(MessageType::Query, from, to, content)
                .with_correlation_id(correlation_id.clone()),
        );
        self.await_correlated(from, &correlation_id, timeout).await
    }

    /// Poll `agent_id`'s inbox until a message with `correlation_id` arrives.
    pub async fn await_correlated(
        &self,
        agent_id: &str,
        correlation_id: &str,
        timeout: Duration,
    ) -> Option<SynapticMessage> {
        let deadline = Instant::now() + timeout;
        let mut stash = Vec::new();
        let found = loop {
            let now = Instant::now();
            if now >= deadline || !self.is_connected(agent_id) {
                break None;
            }
            let slice = self.settings.query_poll_interval.min(deadline - now);
            if let Some(entry) = self.receive_entry(agent_id, slice).await {
                if entry.message.correlation_id.as_deref() == Some(correlation_id) {
                    break Some(entry.message);
                }
                stash.push(entry);
            }
        };
        self.restore(agent_id, stash);
        found
    }

    fn restore(&self, agent_id: &str, entries: Vec<Queued>) {
        if entries.is_empty() {
            return;
        }
        let Some(connection) = self.connections.get(agent_id).map(|c| Arc::clone(c.value())) else {
            self.counters.dropped(DropReason::Disconnected, entries.len() as u64);
            return;
        };
        connection.inbox.lock().extend(entries);
        connection.notify.notify_one();
    }

    /// Disconnect every agent whose heartbeat is older than the liveness window.
    pub fn prune_dead_connections(&self) -> Vec<String> {
        let stale: Vec<String> = self
            .connections
            .iter()
            .filter(|e| !e.value().is_alive(self.settings.liveness_window))
            .map(|e| e.key().clone())
            .collect();
        for agent_id in &stale {
            warn!(agent_id = %agent_id, "Pruning dead connection");
            self.disconnect(agent_id);
        }
        stale
    }

    /// Periodically prune dead connections until `shutdown` fires.
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Synaptic bus maintenance stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let pruned = bus.prune_dead_connections();
                        if !pruned.is_empty() {
                            info!(count = pruned.len(), "Pruned dead bus connections");
                        }
                    }
                }
            }
        })
    }

    /// The most recent `limit` messages, oldest first.
    pub fn replay(&self, limit: usize) -> Vec<SynapticMessage> {
        let replay = self.replay.lock();
        let skip = replay.len().saturating_sub(limit);
        replay.iter().skip(skip).cloned().collect()
    }

    pub fn replay_since(&self, since: DateTime<Utc>) -> Vec<SynapticMessage> {
        self.replay
            .lock()
            .iter()
            .filter(|m| m.timestamp >= since)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> BusStats {
        let load = |c: &AtomicU64| c.load(AtomicOrdering::Relaxed);
        BusStats {
            sent: load(&self.counters.sent),
            delivered: load(&self.counters.delivered),
            expired: load(&self.counters.expired),
            dropped_unknown_target: load(&self.counters.unknown_target),
            dropped_not_live: load(&self.counters.not_live),
            dropped_inbox_full: load(&self.counters.inbox_full),
            dropped_disconnected: load(&self.counters.disconnected),
            subscriber_failures: load(&self.counters.subscriber_failures),
            connected_agents: self.connections.len(),
            live_agents: self.live_agents().len(),
        }
    }
}

impl Default for SynapticBus {
    fn default() -> Self {
        Self::new(BusSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn bus() -> SynapticBus {
        SynapticBus::default()
    }

    fn drain(bus: &SynapticBus, agent: &str) -> Vec<SynapticMessage> {
        let connection = bus.connections.get(agent).map(|c| Arc::clone(c.value())).unwrap();
        let mut out = Vec::new();
        while let Some(entry) = bus.pop_live(&connection) {
            out.push(entry.message);
        }
        out
    }

    #[tokio::test]
    async fn test_priority_order_then_fifo() {
        let bus = bus();
        bus.connect("codex");
        drain(&bus, "codex");
        for (p, tag) in [(Priority::Normal, "a"), (Priority::Critical, "b"), (Priority::High, "c"), (Priority::Normal, "d")] {
            bus.send(SynapticMessage::unicast(MessageType::Task, "kimi", "codex", json!(tag)).with_priority(p));
        }
        let order: Vec<_> = drain(&bus, "codex").into_iter().map(|m| m.content).collect();
        assert_eq!(order, vec![json!("b"), json!("c"), json!("a"), json!("d")]);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender_and_connect_signals_peers() {
        let bus = bus();
        bus.connect("claude");
        bus.connect("codex");
        let claude_inbox = drain(&bus, "claude");
        assert_eq!(claude_inbox.len(), 1);
        let signal: Signal = claude_inbox[0].payload().unwrap();
        assert_eq!(signal, Signal::AgentConnected { agent_id: "codex".to_string() });

        bus.send(SynapticMessage::broadcast(MessageType::Query, "claude", json!({})));
        assert_eq!(bus.pending("claude"), 0);
        assert_eq!(bus.pending("codex"), 1);
    }

    #[tokio::test]
    async fn test_drops_are_counted_not_raised() {
        let bus = SynapticBus::new(BusSettings {
            inbox_capacity: 1,
            ..BusSettings::default()
        });
        bus.connect("codex");
        bus.send_to(MessageType::Task, "kimi", "nobody", json!({}));
        bus.send_to(MessageType::Task, "kimi", "codex", json!({}));
        bus.send_to(MessageType::Task, "kimi", "codex", json!({}));
        let stats = bus.stats();
        // the connect signal counts as a send with no recipients
        assert_eq!(stats.sent, 4);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped_unknown_target, 1);
        assert_eq!(stats.dropped_inbox_full, 1);
        assert_eq!(bus.replay(10).len(), 4);
    }

    #[tokio::test]
    async fn test_expired_message_is_never_delivered() {
        let bus = bus();
        bus.connect("codex");
        let mut message = SynapticMessage::unicast(MessageType::Task, "kimi", "codex", json!({})).with_ttl(0);
        message.timestamp = Utc::now() - chrono::Duration::seconds(1);
        bus.send(message);
        assert!(bus.receive("codex", Duration::from_millis(20)).await.is_none());
        assert_eq!(bus.stats().expired, 1);
    }

    #[test]
    fn test_concurrent_connects_create_one_inbox() {
        let bus = Arc::new(bus());
        bus.connect("claude");
        drain(&bus, "claude");

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let bus = bus.clone();
                std::thread::spawn(move || bus.connect("codex"))
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(bus.connected_agents(), vec!["claude", "codex"]);
        let signals = drain(&bus, "claude");
        assert_eq!(signals.len(), 1);
        assert_eq!(
            signals[0].payload::<Signal>().unwrap(),
            Signal::AgentConnected {
                agent_id: "codex".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_huge_ttl_is_delivered() {
        let bus = bus();
        bus.connect("codex");
        drain(&bus, "codex");
        bus.send(SynapticMessage::unicast(MessageType::Task, "kimi", "codex", json!("forever")).with_ttl(u64::MAX));
        let message = bus.receive("codex", Duration::from_millis(100)).await.unwrap();
        assert_eq!(message.content, json!("forever"));
        assert_eq!(bus.stats().expired, 0);
    }

    #[tokio::test]
    async fn test_receive_wakes_on_send() {
        let bus = Arc::new(bus());
        bus.connect("codex");
        let sender = Arc::clone(&bus);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sender.send_to(MessageType::Task, "kimi", "codex", json!({"n": 1}));
        });
        let got = bus.receive("codex", Duration::from_secs(2)).await.unwrap();
        assert_eq!(got.content, json!({"n": 1}));
        handle.await.unwrap();
        assert!(bus.receive("codex", Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_query_preserves_unrelated_messages() {
        let bus = Arc::new(bus());
        bus.connect("claude");
        bus.connect("codex");
        drain(&bus, "claude");
        drain(&bus, "codex");

        let responder = Arc::clone(&bus);
        let handle = tokio::spawn(async move {
            let query = responder.receive("codex", Duration::from_secs(2)).await.unwrap();
            responder.send_to(MessageType::Audit, "gemini", "claude", json!("first"));
            responder.send_to(MessageType::Audit, "gemini", "claude", json!("second"));
            responder.send(query.reply("codex", MessageType::Response, json!("answer")));
        });

        let reply = bus.query("claude", "codex", json!("question"), Duration::from_secs(2)).await.unwrap();
        handle.await.unwrap();
        assert_eq!(reply.content, json!("answer"));
        let rest: Vec<_> = drain(&bus, "claude").into_iter().map(|m| m.content).collect();
        assert_eq!(rest, vec![json!("first"), json!("second")]);
    }

    #[tokio::test]
    async fn test_prune_dead_connections() {
        let bus = SynapticBus::new(BusSettings {
            liveness_window: Duration::from_millis(50),
            ..BusSettings::default()
        });
        bus.connect("codex");
        bus.connect("kimi");
        tokio::time::sleep(Duration::from_millis(80)).await;
        bus.heartbeat("kimi");
        assert!(!bus.is_alive("codex"));

        let pruned = bus.prune_dead_connections();
        assert_eq!(pruned, vec!["codex".to_string()]);
        assert_eq!(bus.connected_agents(), vec!["kimi".to_string()]);
    }

    #[tokio::test]
    async fn test_subscriber_failures_are_contained() {
        let bus = bus();
        bus.connect("codex");
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        bus.subscribe(MessageType::Audit, move |_| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(())
        });
        bus.subscribe(MessageType::Audit, |_| panic!("boom"));
        bus.subscribe(MessageType::Audit, |_| anyhow::bail!("nope"));

        bus.send_to(MessageType::Audit, "kimi", "codex", json!({}));
        bus.send_to(MessageType::Task, "kimi", "codex", json!({}));
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(bus.stats().subscriber_failures, 2);
        assert_eq!(bus.pending("codex"), 2);
    }

    #[tokio::test]
    async fn test_replay_ring_is_bounded() {
        let bus = SynapticBus::new(BusSettings {
            replay_capacity: 3,
            ..BusSettings::default()
        });
        let start = Utc::now();
        for i in 0..5 {
            bus.send(SynapticMessage::broadcast(MessageType::Audit, "kimi", json!(i)));
        }
        let contents: Vec<_> = bus.replay(10).into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec![json!(2), json!(3), json!(4)]);
        assert_eq!(bus.replay(1)[0].content, json!(4));
        assert_eq!(bus.replay_since(start).len(), 3);
    }

    #[tokio::test]
    async fn test_disconnect_wakes_receiver() {
        let bus = Arc::new(bus());
        bus.connect("codex");
        let waiter = Arc::clone(&bus);
        let handle = tokio::spawn(async move { waiter.receive("codex", Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(bus.disconnect("codex"));
        assert!(handle.await.unwrap().is_none());
        assert!(!bus.disconnect("codex"));
    }
}
