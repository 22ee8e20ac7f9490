//! Idle-window workload scaler
//!
//! This crate provides the core functionality for:
//! - Day-cyclic active/stale window scheduling
//! - Per-namespace pod watches with a cache-sync barrier
//! - Owner resolution and per-kind scale-down strategies
//! - Conflict-safe patching under concurrent writers
//! - Health checks and observability

pub mod cluster;
pub mod controller;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod records;
pub mod scaler;
pub mod watch;
pub mod window;

pub use cluster::{ClusterClient, KubeClusterClient};
pub use controller::{CatchUpSummary, ControllerConfig, DispatchSummary, IdleController};
pub use error::{ClusterError, KubeIdleError, Result};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthReport, Readiness,
};
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger};
pub use records::{JsonLinesRecordStore, LogRecordStore, RecordStore, ScaleDownRecord};
pub use scaler::{RetryPolicy, ScalerContext, ScalingStrategy, StrategyRegistry};
pub use watch::{NamespaceWatcher, PodCreated, SyncState};
pub use window::{next_occurrence, run_schedule, ActiveStateSink, TimeWindow};
