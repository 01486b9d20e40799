// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A durable note shared by the hive, e.g. the summary of a collective decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: MemoryId,
    pub content: serde_json::Value,
    pub memory_type: String,
    pub creator: String,
    /// In [0, 1].
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    pub fn new(
        content: serde_json::Value,
        memory_type: impl Into<String>,
        creator: impl Into<String>,
        importance: f64,
        ttl_secs: Option<u64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: MemoryId::new(),
            content,
            memory_type: memory_type.into(),
            creator: creator.into(),
            importance: importance.clamp(0.0, 1.0),
            created_at: now,
            // unrepresentable ttls never expire
            expires_at: ttl_secs
                .and_then(|ttl| i64::try_from(ttl).ok())
                .and_then(Duration::try_seconds)
                .and_then(|ttl| now.checked_add_signed(ttl)),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Durable memory shared by the hive.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn store(&self, entry: MemoryEntry) -> anyhow::Result<MemoryId>;

    /// Expired entries are reported as absent.
    async fn retrieve(&self, id: MemoryId) -> anyhow::Result<Option<MemoryEntry>>;

    async fn list_by_type(&self, memory_type: &str) -> anyhow::Result<Vec<MemoryEntry>>;
}
