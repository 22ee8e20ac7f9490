//! Cluster resource client abstraction
//!
//! Strategies, reconciliation and the watch fan-out talk to the cluster only
//! through [`ClusterClient`]. The production implementation wraps
//! `kube::Api`; tests substitute an in-memory fake.

mod kube_client;

#[cfg(test)]
pub(crate) mod fake;

pub use kube_client::KubeClusterClient;

use crate::error::ClusterError;
use crate::models::WorkloadKind;
use futures::stream::BoxStream;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;

pub use async_trait::async_trait;

/// Event stream for pods in one namespace
pub type PodEventStream = BoxStream<'static, Result<watcher::Event<Pod>, ClusterError>>;

/// Read, patch, list and watch access to the workload resources
///
/// Implementations are shared by all tasks and must be safe for concurrent use.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a ReplicaSet, returning `None` when it does not exist
    async fn get_replica_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ReplicaSet>, ClusterError>;

    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Deployment, ClusterError>;

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<DaemonSet, ClusterError>;

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<StatefulSet, ClusterError>;

    /// Apply a JSON merge patch to a workload controller
    ///
    /// A patch carrying a stale `metadata.resourceVersion` fails with
    /// [`ClusterError::Conflict`].
    async fn patch_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), ClusterError>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ClusterError>;

    /// Watch pods in a namespace; the first `Restarted` event is the initial listing
    ///
    /// An `Err` item does not end the stream. The stream ends only when the
    /// watch can no longer be resumed.
    fn watch_pods(&self, namespace: &str) -> PodEventStream;
}
