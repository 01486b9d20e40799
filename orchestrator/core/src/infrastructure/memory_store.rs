// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::memory::{MemoryEntry, MemoryId, MemoryStore};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

/// Process-local [`MemoryStore`]. Expired entries are evicted lazily on read.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    entries: DashMap<MemoryId, MemoryEntry>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn store(&self, entry: MemoryEntry) -> anyhow::Result<MemoryId> {
        let id = entry.id;
        self.entries.insert(id, entry);
        Ok(id)
    }

    async fn retrieve(&self, id: MemoryId) -> anyhow::Result<Option<MemoryEntry>> {
        let now = Utc::now();
        let expired = match self.entries.get(&id) {
            Some(entry) if !entry.is_expired_at(now) => return Ok(Some(entry.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(&id);
        }
        Ok(None)
    }

    async fn list_by_type(&self, memory_type: &str) -> anyhow::Result<Vec<MemoryEntry>> {
        let now = Utc::now();
        let mut entries: Vec<MemoryEntry> = self
            .entries
            .iter()
            .filter(|e| e.memory_type == memory_type && !e.is_expired_at(now))
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }
}
