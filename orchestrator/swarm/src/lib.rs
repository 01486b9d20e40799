// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `hive-swarm`: Collective Consciousness
//!
//! Composes the core engines into group behaviour: thoughts fanned out to
//! every connected agent, and decisions that are either taken autonomously
//! or put to a vote.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `DecisionRequest`, `HiveDecision`, `HiveQuery`, `ActionExecutor` |
//! | [`application`] | Application | `Hive` |
//!
//! ## Key Concepts
//!
//! - **Thought**: a QUERY broadcast under one correlation id; answers are the
//!   RESPONSE messages carrying it.
//! - **Decision**: evaluated against the proposer's autonomy threshold first.
//!   Levels that forbid autonomous execution escalate to the consensus engine,
//!   with votes solicited from connected agents over the bus.
//! - **Memory**: every decision leaves a summary in the memory store.

pub mod domain;
pub mod application;

pub use application::{Hive, HiveSettings};
pub use domain::*;
