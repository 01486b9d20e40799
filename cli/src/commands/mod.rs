// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the hive CLI

pub mod config;
pub mod daemon;
pub mod decide;
pub mod status;
pub mod task;

pub use self::config::ConfigCommand;
pub use self::decide::DecideArgs;
pub use self::task::TaskCommand;
