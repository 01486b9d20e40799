// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Hive Domain Layer
//!
//! Pure types for collective decisions. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`hive`] | `DecisionRequest`, `HiveDecision`, `HiveQuery`, `VoteReply`, `ActionExecutor` |

pub mod hive;

pub use hive::*;
