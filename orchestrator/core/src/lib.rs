// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Hive Core
//!
//! Task state machine, inter-agent message bus, consensus engine and
//! autonomy gate, composed by the orchestrator dispatch loop.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Library shared by the swarm composition and the `hive` binary

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
