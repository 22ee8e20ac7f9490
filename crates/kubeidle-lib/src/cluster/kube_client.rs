//! `kube`-backed cluster client

use super::{async_trait, ClusterClient, PodEventStream};
use crate::error::{ClusterError, KubeIdleError};
use crate::models::WorkloadKind;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use tracing::debug;

/// Cluster client over the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster configuration or the local kubeconfig
    pub async fn try_default() -> Result<Self, KubeIdleError> {
        let client = Client::try_default()
            .await
            .map_err(KubeIdleError::ClusterConnection)?;
        Ok(Self::new(client))
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_replica_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ReplicaSet>, ClusterError> {
        self.api::<ReplicaSet>(namespace)
            .get_opt(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, "ReplicaSet", namespace, name))
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Deployment, ClusterError> {
        self.api::<Deployment>(namespace)
            .get(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, "Deployment", namespace, name))
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<DaemonSet, ClusterError> {
        self.api::<DaemonSet>(namespace)
            .get(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, "DaemonSet", namespace, name))
    }

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<StatefulSet, ClusterError> {
        self.api::<StatefulSet>(namespace)
            .get(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, "StatefulSet", namespace, name))
    }

    async fn patch_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), ClusterError> {
        let params = PatchParams::default();
        let patch = Patch::Merge(patch);

        let result = match kind {
            WorkloadKind::Deployment => self
                .api::<Deployment>(namespace)
                .patch(name, &params, &patch)
                .await
                .map(|d| d.metadata.resource_version),
            WorkloadKind::DaemonSet => self
                .api::<DaemonSet>(namespace)
                .patch(name, &params, &patch)
                .await
                .map(|d| d.metadata.resource_version),
            WorkloadKind::StatefulSet => self
                .api::<StatefulSet>(namespace)
                .patch(name, &params, &patch)
                .await
                .map(|s| s.metadata.resource_version),
        };

        let resource_version =
            result.map_err(|e| ClusterError::from_kube(e, kind.as_str(), namespace, name))?;
        debug!(
            kind = %kind,
            namespace = %namespace,
            name = %name,
            resource_version = ?resource_version,
            "Applied merge patch"
        );
        Ok(())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ClusterError> {
        let list = self
            .api::<Pod>(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| ClusterError::from_kube(e, "Pod", namespace, ""))?;
        Ok(list.items)
    }

    /// Errors are yielded and then retried with backoff; the watcher relists on recovery
    fn watch_pods(&self, namespace: &str) -> PodEventStream {
        let api = self.api::<Pod>(namespace);
        watcher(api, watcher::Config::default())
            .default_backoff()
            .map_err(|e| ClusterError::Watch(e.to_string()))
            .boxed()
    }
}
