// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{Context, Result};
use hive_core::domain::node_config::HiveConfig;

/// Resolved logging settings: explicit flags win over the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl LogSettings {
    pub fn resolve(level: Option<String>, format: Option<String>, config: Option<&HiveConfig>) -> Self {
        let from_config = config
            .and_then(|c| c.spec.observability.as_ref())
            .and_then(|o| o.logging.as_ref());
        let level = level
            .or_else(|| from_config.map(|l| l.level.clone()))
            .unwrap_or_else(|| "info".to_string());
        let format = format
            .or_else(|| from_config.map(|l| l.format.clone()))
            .unwrap_or_else(|| "text".to_string());
        Self {
            level,
            json: format.eq_ignore_ascii_case("json"),
        }
    }
}

/// Initialize tracing subscriber for logging
pub fn init_logging(settings: &LogSettings) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&settings.level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if settings.json {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
