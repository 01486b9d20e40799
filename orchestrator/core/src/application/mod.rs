// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod auto_acceptance;
pub mod consensus_engine;
pub mod context;
pub mod orchestrator;
pub mod state_engine;

// Re-export the engines for convenience
pub use auto_acceptance::{AcceptanceRequest, AutoAcceptanceProtocol};
pub use consensus_engine::{ConsensusEngine, ConsensusEngineConfig, ConsensusError};
pub use context::AppContext;
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use state_engine::{StateEngine, StateEngineConfig, StateError};
