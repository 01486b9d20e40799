// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod memory_store;
pub mod registry;
pub mod runtime;
pub mod snapshot;
pub mod synaptic_bus;

pub use synaptic_bus::{BusSettings, BusStats, SynapticBus};
