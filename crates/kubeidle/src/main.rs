//! kubeidle - idle-window workload scaler
//!
//! Scales Deployments and StatefulSets to zero, and disables DaemonSets,
//! for pods that appear in the configured namespaces between START_TIME and
//! STOP_TIME.

use anyhow::{Context, Result};
use kubeidle_lib::{
    health::HealthRegistry,
    observability::{ControllerMetrics, StructuredLogger},
    run_schedule, ClusterClient, IdleController, JsonLinesRecordStore, KubeClusterClient,
    LogRecordStore, RecordStore, ScalerContext, StrategyRegistry,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const KUBEIDLE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting kubeidle");

    let config = config::IdleConfig::load()?;
    let window = config.window().context("invalid schedule")?;
    let namespaces = config.namespace_set();

    let health_registry = HealthRegistry::new();
    let metrics = ControllerMetrics::new();
    metrics.set_controller_active(false);

    let logger = StructuredLogger::new(&config.cluster_name);
    logger.log_startup(
        KUBEIDLE_VERSION,
        &window.active_start().format("%H:%M").to_string(),
        &window.stale_start().format("%H:%M").to_string(),
        &namespaces.iter().collect::<Vec<_>>(),
    );

    let client: Arc<dyn ClusterClient> = Arc::new(
        KubeClusterClient::try_default()
            .await
            .context("failed to create Kubernetes client")?,
    );

    let records: Arc<dyn RecordStore> = match &config.record_path {
        Some(path) => {
            info!(path = %path.display(), "Appending scale-down records to file");
            Arc::new(JsonLinesRecordStore::new(path))
        }
        None => Arc::new(LogRecordStore),
    };

    let cancel = CancellationToken::new();
    let scaler_ctx = ScalerContext::new(client.clone(), records, cancel.clone())
        .with_retry(config.retry_policy())
        .with_cluster_name(&config.cluster_name);

    let controller = Arc::new(
        IdleController::new(client, StrategyRegistry::standard(scaler_ctx), namespaces)
            .with_config(config.controller_config())
            .with_health(health_registry.clone())
            .with_logger(logger.clone()),
    );

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));
    let api_handle = tokio::spawn(api::serve(config.metrics_port, app_state));

    let scheduler_handle = {
        let controller = controller.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { run_schedule(window, controller.as_ref(), cancel).await })
    };

    let signal_handle = {
        let cancel = cancel.clone();
        let logger = logger.clone();
        tokio::spawn(async move {
            let reason = shutdown_signal().await;
            logger.log_shutdown(reason);
            cancel.cancel();
        })
    };

    let result = controller.run(cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Scheduler task failed");
    }
    signal_handle.abort();
    api_handle.abort();

    if let Err(e) = &result {
        error!(error = %e, "Reconciliation run aborted");
        logger.log_shutdown("reconciliation run aborted");
    }
    info!("Shutdown complete");

    result.context("reconciliation run failed")
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    }
}
