//! Per-kind scaling strategies
//!
//! Every strategy follows the same protocol: fetch the latest object, build
//! the smallest merge patch that disables it (pinned to the fetched
//! `resourceVersion`), apply it, and start over on a write conflict until the
//! retry budget runs out.

mod daemonset;
mod deployment;
mod resources;
mod retry;
mod statefulset;


pub use daemonset::DaemonSetScaler;
pub use deployment::DeploymentScaler;
pub use resources::{parse_quantity, template_totals};
pub use retry::{retry_on_conflict, RetryError, RetryPolicy};
pub use statefulset::StatefulSetScaler;

use crate::cluster::ClusterClient;
use crate::error::{KubeIdleError, Result};
use crate::models::{ResourceTotals, ScaleOutcome, WorkloadKind};
use crate::records::{RecordStore, ScaleDownRecord};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Node selector label that matches no real node
pub const DISABLE_NODE_SELECTOR_KEY: &str = "kubeidle/disable";
pub const DISABLE_NODE_SELECTOR_VALUE: &str = "true";

/// Owner-reference kind carried by pods of a Deployment
pub const REPLICA_SET_KIND: &str = "ReplicaSet";

/// What a strategy did to the workload it resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleReport {
    pub kind: WorkloadKind,
    /// Name of the mutated workload, after any owner indirection
    pub name: String,
    pub outcome: ScaleOutcome,
}

/// Capability to disable one workload controller
#[async_trait]
pub trait ScalingStrategy: Send + Sync {
    /// Kind of workload this strategy mutates
    fn kind(&self) -> WorkloadKind;

    async fn scale_down(&self, namespace: &str, name: &str) -> Result<ScaleReport>;
}

/// Collaborators shared by all strategies
#[derive(Clone)]
pub struct ScalerContext {
    pub client: Arc<dyn ClusterClient>,
    pub retry: RetryPolicy,
    pub cancel: CancellationToken,
    pub records: Arc<dyn RecordStore>,
    pub cluster_name: String,
}

impl ScalerContext {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        records: Arc<dyn RecordStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
            cancel,
            records,
            cluster_name: "default".to_string(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cluster_name(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = cluster_name.into();
        self
    }

    /// Run one fetch/patch cycle under the conflict-retry budget
    pub(crate) async fn retry<T, F, Fut>(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        op: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, crate::error::ClusterError>>,
    {
        retry_on_conflict(&self.retry, &self.cancel, op)
            .await
            .map_err(|e| match e {
                RetryError::Exhausted { attempts, last } => KubeIdleError::ScaleDownFailed {
                    kind,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    attempts,
                    source: last,
                },
                RetryError::Failed { attempts, error } => KubeIdleError::ScaleDownFailed {
                    kind,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    attempts,
                    source: error,
                },
                RetryError::Cancelled => KubeIdleError::Cancelled,
            })
    }

    /// Persist the pre-scale-down state; failures are logged and swallowed
    pub(crate) async fn record_scale_down(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        replicas: i32,
        totals: ResourceTotals,
    ) {
        let record =
            ScaleDownRecord::new(&self.cluster_name, kind, namespace, name, replicas, totals);
        if let Err(e) = self.records.record(&record).await {
            warn!(
                kind = %kind,
                namespace = %namespace,
                name = %name,
                error = %e,
                "Failed to record scale-down state"
            );
        }
    }
}

/// Result of one fetch/patch cycle for a replica-based workload
#[derive(Debug, Clone, Copy)]
pub(crate) enum ReplicaChange {
    Scaled {
        previous: i32,
        totals: ResourceTotals,
    },
    AlreadyZero,
}

/// Merge patch setting replicas to zero, pinned to a resource version
pub fn zero_replicas_patch(resource_version: Option<&str>) -> serde_json::Value {
    let mut patch = json!({ "spec": { "replicas": 0 } });
    if let Some(rv) = resource_version {
        patch["metadata"] = json!({ "resourceVersion": rv });
    }
    patch
}

/// Merge patch adding the disable node selector to a pod template
pub fn disable_node_selector_patch(resource_version: Option<&str>) -> serde_json::Value {
    let mut selector = serde_json::Map::new();
    selector.insert(
        DISABLE_NODE_SELECTOR_KEY.to_string(),
        json!(DISABLE_NODE_SELECTOR_VALUE),
    );

    let mut patch = json!({
        "spec": { "template": { "spec": { "nodeSelector": selector } } }
    });
    if let Some(rv) = resource_version {
        patch["metadata"] = json!({ "resourceVersion": rv });
    }
    patch
}

/// Owner kind → strategy lookup, fixed once built
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn ScalingStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for ReplicaSet-owned, DaemonSet and StatefulSet pods
    pub fn standard(ctx: ScalerContext) -> Self {
        Self::new()
            .with_strategy(REPLICA_SET_KIND, DeploymentScaler::new(ctx.clone()))
            .with_strategy(
                WorkloadKind::DaemonSet.as_str(),
                DaemonSetScaler::new(ctx.clone()),
            )
            .with_strategy(WorkloadKind::StatefulSet.as_str(), StatefulSetScaler::new(ctx))
    }

    pub fn with_strategy<S>(mut self, owner_kind: impl Into<String>, strategy: S) -> Self
    where
        S: ScalingStrategy + 'static,
    {
        self.strategies.insert(owner_kind.into(), Arc::new(strategy));
        self
    }

    pub fn get(&self, owner_kind: &str) -> Option<&Arc<dyn ScalingStrategy>> {
        self.strategies.get(owner_kind)
    }

    pub fn owner_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}
