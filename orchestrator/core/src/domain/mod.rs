// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Pure types of the hive: tasks and their transition table, bus messages,
//! consensus proposals, acceptance thresholds, and the collaborator traits
//! (`AgentRegistry`, `AgentRunner`, `MemoryStore`) the application layer
//! depends on.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Entities, value objects and ports; no I/O

pub mod acceptance;
pub mod agent;
pub mod consensus;
pub mod memory;
pub mod message;
pub mod node_config;
pub mod runtime;
pub mod task;
