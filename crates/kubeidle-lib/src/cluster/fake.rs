//! In-memory cluster used by unit tests

use super::{async_trait, ClusterClient, PodEventStream};
use crate::error::ClusterError;
use crate::models::WorkloadKind;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec, ReplicaSet, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::runtime::watcher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

type Key = (String, String);
type WatchItem = Result<watcher::Event<Pod>, ClusterError>;

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// A recorded patch call
#[derive(Debug, Clone)]
pub struct PatchCall {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
    pub patch: serde_json::Value,
}

#[derive(Default)]
pub struct FakeCluster {
    replica_sets: Mutex<HashMap<Key, ReplicaSet>>,
    deployments: Mutex<HashMap<Key, Deployment>>,
    daemon_sets: Mutex<HashMap<Key, DaemonSet>>,
    stateful_sets: Mutex<HashMap<Key, StatefulSet>>,
    pods: Mutex<HashMap<String, Vec<Pod>>>,
    failing_lists: Mutex<HashSet<String>>,
    scripted_conflicts: Mutex<HashMap<(WorkloadKind, Key), u32>>,
    watches: Mutex<HashMap<String, mpsc::UnboundedReceiver<WatchItem>>>,
    patches: Mutex<Vec<PatchCall>>,
    gets: AtomicUsize,
    lists: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_deployment(&self, namespace: &str, name: &str, replicas: i32) {
        let deployment = Deployment {
            metadata: meta(namespace, name, None),
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                template: template_with_container("250m", "128Mi", "1", "256Mi"),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.deployments
            .lock()
            .unwrap()
            .insert(key(namespace, name), deployment);
    }

    pub fn add_replica_set(&self, namespace: &str, name: &str, owner: Option<(&str, &str)>) {
        let replica_set = ReplicaSet {
            metadata: meta(namespace, name, owner),
            ..Default::default()
        };
        self.replica_sets
            .lock()
            .unwrap()
            .insert(key(namespace, name), replica_set);
    }

    pub fn add_daemon_set(&self, namespace: &str, name: &str) {
        let daemon_set = DaemonSet {
            metadata: meta(namespace, name, None),
            spec: Some(DaemonSetSpec::default()),
            ..Default::default()
        };
        self.daemon_sets
            .lock()
            .unwrap()
            .insert(key(namespace, name), daemon_set);
    }

    pub fn add_stateful_set(&self, namespace: &str, name: &str, replicas: i32) {
        let stateful_set = StatefulSet {
            metadata: meta(namespace, name, None),
            spec: Some(StatefulSetSpec {
                replicas: Some(replicas),
                template: template_with_container("500m", "1Gi", "", ""),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.stateful_sets
            .lock()
            .unwrap()
            .insert(key(namespace, name), stateful_set);
    }

    pub fn add_pod(&self, pod: Pod) {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        self.pods.lock().unwrap().entry(namespace).or_default().push(pod);
    }

    pub fn fail_listing(&self, namespace: &str) {
        self.failing_lists.lock().unwrap().insert(namespace.to_string());
    }

    /// Make the next `count` patches of this object fail with a conflict
    pub fn script_conflicts(&self, kind: WorkloadKind, namespace: &str, name: &str, count: u32) {
        self.scripted_conflicts
            .lock()
            .unwrap()
            .insert((kind, key(namespace, name)), count);
    }

    /// Open the watch channel for a namespace; events sent here feed `watch_pods`
    pub fn watch_channel(&self, namespace: &str) -> mpsc::UnboundedSender<WatchItem> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watches
            .lock()
            .unwrap()
            .insert(namespace.to_string(), rx);
        tx
    }

    pub fn patches(&self) -> Vec<PatchCall> {
        self.patches.lock().unwrap().clone()
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn listed_namespaces(&self) -> Vec<String> {
        self.lists.lock().unwrap().clone()
    }

    pub fn deployment_replicas(&self, namespace: &str, name: &str) -> Option<i32> {
        self.deployments
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .and_then(|d| d.spec.as_ref())
            .and_then(|s| s.replicas)
    }

    pub fn stateful_set_replicas(&self, namespace: &str, name: &str) -> Option<i32> {
        self.stateful_sets
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .and_then(|s| s.spec.as_ref())
            .and_then(|s| s.replicas)
    }

    pub fn daemon_set_node_selector(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<BTreeMap<String, String>> {
        self.daemon_sets
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .and_then(|d| d.spec.as_ref())
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|s| s.node_selector.clone())
    }

    fn take_scripted_conflict(&self, kind: WorkloadKind, namespace: &str, name: &str) -> bool {
        let mut scripted = self.scripted_conflicts.lock().unwrap();
        match scripted.get_mut(&(kind, key(namespace, name))) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

/// Pod in `namespace` owned by the given `(kind, name)` references
pub fn pod(namespace: &str, name: &str, owners: &[(&str, &str)]) -> Pod {
    let owner_references = owners
        .iter()
        .map(|(kind, owner)| OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            name: owner.to_string(),
            uid: format!("{}-uid", owner),
            ..Default::default()
        })
        .collect();

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("{}/{}-uid", namespace, name)),
            owner_references: Some(owner_references),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn meta(namespace: &str, name: &str, owner: Option<(&str, &str)>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        resource_version: Some("1".to_string()),
        owner_references: owner.map(|(kind, owner)| {
            vec![OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: kind.to_string(),
                name: owner.to_string(),
                uid: format!("{}-uid", owner),
                ..Default::default()
            }]
        }),
        ..Default::default()
    }
}

fn template_with_container(
    cpu_req: &str,
    mem_req: &str,
    cpu_lim: &str,
    mem_lim: &str,
) -> PodTemplateSpec {
    let quantities = |pairs: &[(&str, &str)]| -> Option<BTreeMap<String, Quantity>> {
        let map: BTreeMap<String, Quantity> = pairs
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
            .collect();
        (!map.is_empty()).then_some(map)
    };

    PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "app".to_string(),
                resources: Some(ResourceRequirements {
                    requests: quantities(&[("cpu", cpu_req), ("memory", mem_req)]),
                    limits: quantities(&[("cpu", cpu_lim), ("memory", mem_lim)]),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

fn not_found(kind: &str, namespace: &str, name: &str) -> ClusterError {
    ClusterError::NotFound {
        kind: kind.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

fn conflict(kind: WorkloadKind, namespace: &str, name: &str) -> ClusterError {
    ClusterError::Conflict {
        kind: kind.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        message: "the object has been modified".to_string(),
    }
}

/// Compare the patch's resourceVersion with the stored one and bump on success
fn check_and_bump(meta: &mut ObjectMeta, patch: &serde_json::Value) -> bool {
    let expected = patch["metadata"]["resourceVersion"].as_str();
    let current = meta.resource_version.clone().unwrap_or_default();
    if let Some(expected) = expected {
        if expected != current {
            return false;
        }
    }
    let next = current.parse::<u64>().unwrap_or(0) + 1;
    meta.resource_version = Some(next.to_string());
    true
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_replica_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ReplicaSet>, ClusterError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .replica_sets
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned())
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Deployment, ClusterError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.deployments
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("Deployment", namespace, name))
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<DaemonSet, ClusterError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.daemon_sets
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("DaemonSet", namespace, name))
    }

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<StatefulSet, ClusterError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.stateful_sets
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("StatefulSet", namespace, name))
    }

    async fn patch_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), ClusterError> {
        self.patches.lock().unwrap().push(PatchCall {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            patch: patch.clone(),
        });

        if self.take_scripted_conflict(kind, namespace, name) {
            return Err(conflict(kind, namespace, name));
        }

        let k = key(namespace, name);
        let replicas = patch["spec"]["replicas"].as_i64().map(|r| r as i32);

        let applied = match kind {
            WorkloadKind::Deployment => {
                let mut store = self.deployments.lock().unwrap();
                let deployment = store
                    .get_mut(&k)
                    .ok_or_else(|| not_found("Deployment", namespace, name))?;
                let ok = check_and_bump(&mut deployment.metadata, patch);
                if ok {
                    if let (Some(spec), Some(r)) = (deployment.spec.as_mut(), replicas) {
                        spec.replicas = Some(r);
                    }
                }
                ok
            }
            WorkloadKind::StatefulSet => {
                let mut store = self.stateful_sets.lock().unwrap();
                let stateful_set = store
                    .get_mut(&k)
                    .ok_or_else(|| not_found("StatefulSet", namespace, name))?;
                let ok = check_and_bump(&mut stateful_set.metadata, patch);
                if ok {
                    if let (Some(spec), Some(r)) = (stateful_set.spec.as_mut(), replicas) {
                        spec.replicas = Some(r);
                    }
                }
                ok
            }
            WorkloadKind::DaemonSet => {
                let mut store = self.daemon_sets.lock().unwrap();
                let daemon_set = store
                    .get_mut(&k)
                    .ok_or_else(|| not_found("DaemonSet", namespace, name))?;
                let ok = check_and_bump(&mut daemon_set.metadata, patch);
                if ok {
                    if let Some(selector) =
                        patch["spec"]["template"]["spec"]["nodeSelector"].as_object()
                    {
                        let spec = daemon_set.spec.get_or_insert_with(Default::default);
                        let pod_spec = spec.template.spec.get_or_insert_with(Default::default);
                        let node_selector =
                            pod_spec.node_selector.get_or_insert_with(BTreeMap::new);
                        for (label, value) in selector {
                            node_selector.insert(
                                label.clone(),
                                value.as_str().unwrap_or_default().to_string(),
                            );
                        }
                    }
                }
                ok
            }
        };

        if applied {
            Ok(())
        } else {
            Err(conflict(kind, namespace, name))
        }
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ClusterError> {
        self.lists.lock().unwrap().push(namespace.to_string());
        if self.failing_lists.lock().unwrap().contains(namespace) {
            return Err(ClusterError::Watch(format!("list of {} refused", namespace)));
        }
        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    fn watch_pods(&self, namespace: &str) -> PodEventStream {
        match self.watches.lock().unwrap().remove(namespace) {
            Some(rx) => futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed(),
            None => futures::stream::pending().boxed(),
        }
    }
}
