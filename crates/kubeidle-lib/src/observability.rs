//! Observability infrastructure for the idle-window controller
//!
//! Provides:
//! - Prometheus metrics (scale attempts and outcomes, active state, reconciliation latency)
//! - Structured JSON logging with tracing

use crate::models::{OperationStatus, ScaleOperation, WorkloadKind};
use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, GaugeVec, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Reconciliation operation labels
pub const OP_HANDLE_ADD: &str = "handle_add";
pub const OP_CATCH_UP: &str = "catch_up";

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    scale_down_attempts: IntCounterVec,
    scale_down_operations: IntCounterVec,
    resources_scaled_down: IntGaugeVec,
    last_scale_operation_timestamp: GaugeVec,
    controller_active: IntGauge,
    reconciliation_duration_seconds: HistogramVec,
    watch_streams_synced: IntGauge,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            scale_down_attempts: register_int_counter_vec!(
                "kubeidle_scale_down_attempts_total",
                "Total number of scale-down attempts",
                &["resource_type", "namespace"]
            )
            .expect("Failed to register scale_down_attempts_total"),

            scale_down_operations: register_int_counter_vec!(
                "kubeidle_scale_down_operations_total",
                "Total number of scale-down operations by outcome",
                &["resource_type", "namespace", "status"]
            )
            .expect("Failed to register scale_down_operations_total"),

            resources_scaled_down: register_int_gauge_vec!(
                "kubeidle_resources_scaled_down",
                "Number of workloads currently scaled down by the controller",
                &["resource_type", "namespace"]
            )
            .expect("Failed to register resources_scaled_down"),

            last_scale_operation_timestamp: register_gauge_vec!(
                "kubeidle_last_scale_operation_timestamp",
                "Unix timestamp of the last scale operation",
                &["resource_type", "namespace", "operation"]
            )
            .expect("Failed to register last_scale_operation_timestamp"),

            controller_active: register_int_gauge!(
                "kubeidle_controller_active",
                "Whether scale-down is currently armed (1) or suspended (0)"
            )
            .expect("Failed to register controller_active"),

            reconciliation_duration_seconds: register_histogram_vec!(
                "kubeidle_reconciliation_duration_seconds",
                "Time spent handling pod events and catch-up passes",
                &["operation"],
                prometheus::linear_buckets(0.1, 0.1, 10)
                    .expect("Failed to build reconciliation buckets")
            )
            .expect("Failed to register reconciliation_duration_seconds"),

            watch_streams_synced: register_int_gauge!(
                "kubeidle_watch_streams_synced",
                "Number of namespace watch streams whose cache has synced"
            )
            .expect("Failed to register watch_streams_synced"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance. Clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new)
    }

    pub fn inc_scale_down_attempts(&self, kind: WorkloadKind, namespace: &str) {
        self.inner()
            .scale_down_attempts
            .with_label_values(&[kind.as_str(), namespace])
            .inc();
    }

    /// Count an attempted operation by outcome and stamp its timestamp
    pub fn record_operation(&self, operation: &ScaleOperation) {
        let kind = operation.kind.as_str();
        self.inner()
            .scale_down_operations
            .with_label_values(&[kind, &operation.namespace, operation.status.as_str()])
            .inc();

        if operation.status == OperationStatus::Success {
            self.inner()
                .last_scale_operation_timestamp
                .with_label_values(&[kind, &operation.namespace, "down"])
                .set(operation.timestamp.timestamp() as f64);
        }
    }

    /// Raised only when a strategy actually changed a workload
    pub fn inc_resources_scaled_down(&self, kind: WorkloadKind, namespace: &str) {
        self.inner()
            .resources_scaled_down
            .with_label_values(&[kind.as_str(), namespace])
            .inc();
    }

    pub fn set_controller_active(&self, active: bool) {
        self.inner().controller_active.set(i64::from(active));
    }

    pub fn observe_reconciliation(&self, operation: &str, duration_secs: f64) {
        self.inner()
            .reconciliation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn set_watch_streams_synced(&self, count: usize) {
        self.inner().watch_streams_synced.set(count as i64);
    }

    pub fn scale_down_operations(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        status: OperationStatus,
    ) -> u64 {
        self.inner()
            .scale_down_operations
            .with_label_values(&[kind.as_str(), namespace, status.as_str()])
            .get()
    }

    pub fn scale_down_attempts(&self, kind: WorkloadKind, namespace: &str) -> u64 {
        self.inner()
            .scale_down_attempts
            .with_label_values(&[kind.as_str(), namespace])
            .get()
    }
}

/// Structured logger for controller events
#[derive(Clone)]
pub struct StructuredLogger {
    cluster_name: String,
}

impl StructuredLogger {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
        }
    }

    pub fn log_startup(
        &self,
        version: &str,
        active_start: &str,
        stale_start: &str,
        namespaces: &[&str],
    ) {
        info!(
            event = "controller_started",
            cluster = %self.cluster_name,
            version = %version,
            active_start = %active_start,
            stale_start = %stale_start,
            namespaces = ?namespaces,
            "Idle-window controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            cluster = %self.cluster_name,
            reason = %reason,
            "Idle-window controller shutting down"
        );
    }

    pub fn log_active_transition(&self, active: bool) {
        info!(
            event = "active_state_changed",
            cluster = %self.cluster_name,
            active = active,
            "Scale-down {}",
            if active { "armed" } else { "suspended" }
        );
    }

    pub fn log_scale_down(&self, kind: WorkloadKind, namespace: &str, name: &str, changed: bool) {
        info!(
            event = "scale_down_succeeded",
            cluster = %self.cluster_name,
            kind = %kind,
            namespace = %namespace,
            name = %name,
            changed = changed,
            "Scaled down workload"
        );
    }

    pub fn log_scale_down_failure(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        error: &str,
    ) {
        warn!(
            event = "scale_down_failed",
            cluster = %self.cluster_name,
            kind = %kind,
            namespace = %namespace,
            name = %name,
            error = %error,
            "Failed to scale down workload"
        );
    }

    pub fn log_catch_up(&self, summary: &crate::controller::CatchUpSummary) {
        info!(
            event = "catch_up_completed",
            cluster = %self.cluster_name,
            namespaces = summary.namespaces,
            skipped_namespaces = summary.skipped_namespaces,
            pods = summary.pods,
            attempted = summary.dispatch.attempted,
            succeeded = summary.dispatch.succeeded,
            failed = summary.dispatch.failed,
            "Catch-up reconciliation completed"
        );
    }
}
