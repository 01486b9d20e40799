// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::task::Task;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest slice of stdout/stderr copied into task metadata and responses.
pub const OUTPUT_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_secs: f64,
}

impl RunnerOutput {
    pub fn stdout_preview(&self) -> String {
        preview(&self.stdout)
    }

    pub fn stderr_preview(&self) -> String {
        preview(&self.stderr)
    }
}

/// First [`OUTPUT_PREVIEW_CHARS`] characters, on a char boundary.
pub fn preview(text: &str) -> String {
    text.chars().take(OUTPUT_PREVIEW_CHARS).collect()
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Agent {0} has no command configured")]
    NotRunnable(String),

    #[error("Failed to spawn agent process: {0}")]
    SpawnFailed(String),

    #[error("Agent execution timed out after {0}s")]
    Timeout(u64),

    #[error("Agent execution failed: {0}")]
    ExecutionFailed(String),
}

/// Executes one task on behalf of its agent.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<RunnerOutput, RunnerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(OUTPUT_PREVIEW_CHARS + 10);
        assert_eq!(preview(&long).chars().count(), OUTPUT_PREVIEW_CHARS);
        assert_eq!(preview("short"), "short");
    }
}
