// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Foreground daemon
//!
//! Builds the [`AppContext`] from the resolved configuration, starts bus
//! maintenance and the optional Prometheus exporter, then runs the
//! orchestrator loop until Ctrl-C, SIGTERM or a HALT signal.

use anyhow::{Context, Result};
use colored::Colorize;
use hive_core::application::context::AppContext;
use hive_core::domain::node_config::{HiveConfig, MetricsConfig};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let (config, source) =
        HiveConfig::load_or_default(config_path).context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    if let Some(metrics) = enabled_metrics(&config) {
        install_metrics_exporter(metrics)?;
    }

    let context = AppContext::build(config, source);
    let shutdown = CancellationToken::new();
    let maintenance = context.spawn_bus_maintenance(shutdown.clone());

    let signals = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    println!(
        "{}",
        format!(
            "✓ Hive node {} running as '{}' ({} agents)",
            context.config.spec.node.id,
            context.orchestrator.agent_id(),
            context.config.spec.agents.len()
        )
        .green()
    );

    context.orchestrator.run_until(shutdown.clone()).await;

    shutdown.cancel();
    signals.abort();
    if let Err(e) = maintenance.await {
        warn!(error = %e, "Bus maintenance task ended abnormally");
    }

    let metrics = context.state.metrics();
    info!(
        total = metrics.total_tasks,
        completed = metrics.completed_tasks,
        failed = metrics.failed_tasks,
        cancelled = metrics.cancelled_tasks,
        halted = context.orchestrator.is_halted(),
        "Hive node stopped"
    );
    println!("{}", "✓ Hive node stopped".green());

    Ok(())
}

fn enabled_metrics(config: &HiveConfig) -> Option<&MetricsConfig> {
    config
        .spec
        .observability
        .as_ref()
        .and_then(|o| o.metrics.as_ref())
        .filter(|m| m.enabled)
}

fn install_metrics_exporter(metrics: &MetricsConfig) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics.port))
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!(port = metrics.port, "Prometheus metrics exporter listening");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::domain::node_config::ObservabilityConfig;

    #[test]
    fn test_metrics_exporter_is_opt_in() {
        let mut config = HiveConfig::default();
        assert!(enabled_metrics(&config).is_none());

        config.spec.observability = Some(ObservabilityConfig {
            logging: None,
            metrics: Some(MetricsConfig {
                enabled: false,
                port: 9091,
            }),
        });
        assert!(enabled_metrics(&config).is_none());

        if let Some(metrics) = config
            .spec
            .observability
            .as_mut()
            .and_then(|o| o.metrics.as_mut())
        {
            metrics.enabled = true;
        }
        assert_eq!(enabled_metrics(&config).map(|m| m.port), Some(9091));
    }
}
