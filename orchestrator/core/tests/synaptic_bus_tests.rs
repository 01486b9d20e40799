// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{Duration as ChronoDuration, Utc};
use hive_core::domain::message::{MessageType, Priority, Signal, SynapticMessage};
use hive_core::infrastructure::synaptic_bus::{BusSettings, SynapticBus};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_millis(200);

#[tokio::test]
async fn test_inbox_drains_by_priority() {
    let bus = SynapticBus::default();
    bus.connect("kimi");
    bus.connect("codex");

    for priority in [Priority::Normal, Priority::Critical, Priority::High] {
        bus.send(
            SynapticMessage::unicast(MessageType::Task, "kimi", "codex", json!({"p": priority as u8}))
                .with_priority(priority),
        );
    }

    let mut drained = Vec::new();
    while let Some(message) = bus.receive("codex", WAIT).await {
        drained.push(message.priority);
    }
    assert_eq!(drained, vec![Priority::Critical, Priority::High, Priority::Normal]);
}

#[tokio::test]
async fn test_equal_priority_is_fifo() {
    let bus = SynapticBus::default();
    bus.connect("kimi");
    bus.connect("codex");
    for n in 0..5 {
        bus.send_to(MessageType::Task, "kimi", "codex", json!(n));
    }
    let mut order = Vec::new();
    while let Some(message) = bus.receive("codex", WAIT).await {
        order.push(message.content);
    }
    assert_eq!(order, (0..5).map(|n| json!(n)).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_expired_message_is_never_delivered() {
    let bus = SynapticBus::default();
    bus.connect("kimi");
    bus.connect("codex");

    let mut stale = SynapticMessage::unicast(MessageType::Task, "kimi", "codex", json!({})).with_ttl(0);
    stale.timestamp = Utc::now() - ChronoDuration::seconds(1);
    bus.send(stale);

    assert!(bus.receive("codex", WAIT).await.is_none());
    assert_eq!(bus.stats().expired, 1);
    // still visible to replay
    assert!(bus.replay(10).iter().any(|m| m.ttl_secs == 0));
}

#[tokio::test]
async fn test_broadcast_skips_sender() {
    let bus = SynapticBus::default();
    for agent in ["claude", "codex", "kimi"] {
        bus.connect(agent);
    }
    // drain the connection announcements
    for agent in ["claude", "codex"] {
        while bus.receive(agent, Duration::from_millis(20)).await.is_some() {}
    }

    bus.send(SynapticMessage::broadcast(MessageType::Query, "kimi", json!({"topic": "naming"})));

    for agent in ["claude", "codex"] {
        let message = bus.receive(agent, WAIT).await.unwrap();
        assert_eq!(message.kind, MessageType::Query);
        assert!(message.is_broadcast());
    }
    assert!(bus.receive("kimi", Duration::from_millis(20)).await.is_none());
}

#[tokio::test]
async fn test_connect_is_announced() {
    let bus = SynapticBus::default();
    bus.connect("orchestrator");
    bus.connect("gemini");

    let message = bus.receive("orchestrator", WAIT).await.unwrap();
    assert_eq!(message.kind, MessageType::Signal);
    assert_eq!(message.priority, Priority::High);
    let signal: Signal = message.payload().unwrap();
    assert_eq!(signal, Signal::AgentConnected { agent_id: "gemini".to_string() });
}

#[tokio::test]
async fn test_query_round_trip_keeps_unrelated_messages() {
    let bus = Arc::new(SynapticBus::default());
    bus.connect("codex");
    bus.connect("kimi");
    while bus.receive("codex", Duration::from_millis(20)).await.is_some() {}

    let responder = {
        let bus = bus.clone();
        tokio::spawn(async move {
            let question = bus.receive("kimi", Duration::from_secs(2)).await.unwrap();
            assert_eq!(question.kind, MessageType::Query);
            // noise before the answer
            bus.send_to(MessageType::Audit, "kimi", "codex", json!({"action": "noted"}));
            bus.send(question.reply("kimi", MessageType::Response, json!({"answer": 42})));
        })
    };

    let answer = bus
        .query("codex", "kimi", json!({"question": "?"}), Duration::from_secs(2))
        .await
        .unwrap();
    responder.await.unwrap();

    assert_eq!(answer.content["answer"], json!(42));
    let noise = bus.receive("codex", WAIT).await.unwrap();
    assert_eq!(noise.kind, MessageType::Audit);
}

#[tokio::test]
async fn test_query_times_out() {
    let bus = SynapticBus::default();
    bus.connect("codex");
    bus.connect("silent");
    let answer = bus
        .query("codex", "silent", json!({}), Duration::from_millis(150))
        .await;
    assert!(answer.is_none());
}

#[tokio::test]
async fn test_stale_agents_are_pruned() {
    let bus = SynapticBus::new(BusSettings {
        liveness_window: Duration::from_millis(50),
        ..Default::default()
    });
    bus.connect("codex");
    tokio::time::sleep(Duration::from_millis(80)).await;
    bus.connect("kimi");

    assert!(!bus.is_alive("codex"));
    assert_eq!(bus.live_agents(), vec!["kimi"]);
    assert_eq!(bus.prune_dead_connections(), vec!["codex"]);
    assert_eq!(bus.connected_agents(), vec!["kimi"]);
}

#[tokio::test]
async fn test_subscriber_failure_does_not_block_delivery() {
    let bus = SynapticBus::default();
    bus.connect("kimi");
    bus.connect("codex");
    bus.subscribe(MessageType::Task, |_| anyhow::bail!("observer broke"));

    bus.send_to(MessageType::Task, "kimi", "codex", json!({}));
    assert!(bus.receive("codex", WAIT).await.is_some());
    assert_eq!(bus.stats().subscriber_failures, 1);
}
