//! Namespace watch fan-out
//!
//! One task per namespace drives a pod watch stream, keeps the UIDs it has
//! seen, and forwards pods it has not seen before into a single bounded
//! channel. The initial listing only marks the stream synced; pods that
//! already existed are left to catch-up reconciliation.

use crate::cluster::{ClusterClient, PodEventStream};
use crate::error::{KubeIdleError, Result};
use crate::models::NamespaceSet;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Cache state of one namespace stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Pending,
    Synced,
    /// Synced, then reported an error; cleared by the next event the watch delivers
    Degraded(String),
    /// The stream stopped; it is not restarted
    Failed(String),
}

/// A pod that appeared after its stream synced
#[derive(Debug, Clone)]
pub struct PodCreated {
    pub namespace: String,
    pub pod: Pod,
}

/// Outcome of applying one watch event to a [`PodCache`]
#[derive(Debug, Default)]
pub struct CacheUpdate {
    /// This event completed the initial listing
    pub synced_now: bool,
    pub created: Vec<Pod>,
}

/// Pod UIDs observed on one stream
#[derive(Debug, Default)]
pub struct PodCache {
    seen: HashSet<String>,
    synced: bool,
}

impl PodCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Pods currently known to the stream
    pub fn pod_count(&self) -> usize {
        self.seen.len()
    }

    pub fn apply(&mut self, event: watcher::Event<Pod>) -> CacheUpdate {
        let mut update = CacheUpdate::default();

        match event {
            watcher::Event::Restarted(pods) => {
                let listed: HashSet<String> = pods.iter().map(pod_key).collect();
                if self.synced {
                    update.created = pods
                        .into_iter()
                        .filter(|pod| !self.seen.contains(&pod_key(pod)))
                        .collect();
                } else {
                    self.synced = true;
                    update.synced_now = true;
                }
                self.seen = listed;
            }
            watcher::Event::Applied(pod) => {
                // Before the first listing completes, pods are catch-up's concern
                if self.seen.insert(pod_key(&pod)) && self.synced {
                    update.created.push(pod);
                }
            }
            watcher::Event::Deleted(pod) => {
                self.seen.remove(&pod_key(&pod));
            }
        }

        update
    }
}

fn pod_key(pod: &Pod) -> String {
    match &pod.metadata.uid {
        Some(uid) => uid.clone(),
        None => format!(
            "{}/{}",
            pod.metadata.namespace.as_deref().unwrap_or_default(),
            pod.metadata.name.as_deref().unwrap_or_default()
        ),
    }
}

struct StreamHandle {
    namespace: String,
    state: watch::Receiver<SyncState>,
}

/// Running set of namespace watch streams
pub struct NamespaceWatcher {
    streams: Vec<StreamHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl NamespaceWatcher {
    /// Spawn one stream task per namespace
    ///
    /// Created pods from every stream arrive on the returned receiver, in
    /// order per namespace. Tasks stop when `cancel` fires or their stream fails.
    pub fn start(
        client: Arc<dyn ClusterClient>,
        namespaces: &NamespaceSet,
        buffer: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<PodCreated>) {
        let (events_tx, events_rx) = mpsc::channel(buffer.max(1));
        let mut streams = Vec::with_capacity(namespaces.len());
        let mut tasks = Vec::with_capacity(namespaces.len());

        for namespace in namespaces.iter() {
            let (state_tx, state_rx) = watch::channel(SyncState::Pending);
            let stream = client.watch_pods(namespace);
            info!(namespace = %namespace, "Starting pod watch");

            tasks.push(tokio::spawn(run_stream(
                namespace.to_string(),
                stream,
                state_tx,
                events_tx.clone(),
                cancel.clone(),
            )));
            streams.push(StreamHandle {
                namespace: namespace.to_string(),
                state: state_rx,
            });
        }

        (Self { streams, tasks }, events_rx)
    }

    /// Block until every stream has completed its initial listing
    pub async fn await_synced(&self, cancel: &CancellationToken) -> Result<()> {
        for stream in &self.streams {
            let mut state = stream.state.clone();
            let settled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(KubeIdleError::Cancelled),
                settled = state.wait_for(|s| *s != SyncState::Pending) => {
                    settled.map(|s| (*s).clone())
                }
            };

            // Stream tasks exit on the same token and drop their senders
            if cancel.is_cancelled() {
                return Err(KubeIdleError::Cancelled);
            }

            match settled {
                Ok(SyncState::Synced | SyncState::Degraded(_)) => {
                    debug!(namespace = %stream.namespace, "Pod cache synced")
                }
                Ok(SyncState::Failed(reason)) => {
                    return Err(KubeIdleError::CacheSyncFailed(format!(
                        "{}: {}",
                        stream.namespace, reason
                    )))
                }
                Ok(SyncState::Pending) | Err(_) => {
                    return Err(KubeIdleError::CacheSyncFailed(format!(
                        "{}: watch stopped before sync",
                        stream.namespace
                    )))
                }
            }
        }

        info!(streams = self.streams.len(), "All pod caches synced");
        Ok(())
    }

    pub fn synced_count(&self) -> usize {
        self.streams
            .iter()
            .filter(|s| *s.state.borrow() == SyncState::Synced)
            .count()
    }

    /// Namespaces whose stream has stopped, with the reason
    pub fn failed_streams(&self) -> Vec<(String, String)> {
        self.streams
            .iter()
            .filter_map(|s| match &*s.state.borrow() {
                SyncState::Failed(reason) => Some((s.namespace.clone(), reason.clone())),
                _ => None,
            })
            .collect()
    }

    /// Namespaces whose stream is recovering from an error, with the error
    pub fn degraded_streams(&self) -> Vec<(String, String)> {
        self.streams
            .iter()
            .filter_map(|s| match &*s.state.borrow() {
                SyncState::Degraded(reason) => Some((s.namespace.clone(), reason.clone())),
                _ => None,
            })
            .collect()
    }

    /// Wait for every stream task to exit
    pub async fn shutdown(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Pod watch task panicked");
            }
        }
    }
}

async fn run_stream(
    namespace: String,
    mut stream: PodEventStream,
    state: watch::Sender<SyncState>,
    events: mpsc::Sender<PodCreated>,
    cancel: CancellationToken,
) {
    let mut cache = PodCache::new();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(event)) => {
                let update = cache.apply(event);
                if update.synced_now {
                    info!(
                        namespace = %namespace,
                        pods = cache.pod_count(),
                        "Initial pod listing complete"
                    );
                    state.send_replace(SyncState::Synced);
                } else {
                    let recovered = state.send_if_modified(|s| {
                        let degraded = matches!(s, SyncState::Degraded(_));
                        if degraded {
                            *s = SyncState::Synced;
                        }
                        degraded
                    });
                    if recovered {
                        info!(
                            namespace = %namespace,
                            pods = cache.pod_count(),
                            "Pod watch recovered"
                        );
                    }
                }

                for pod in update.created {
                    debug!(
                        namespace = %namespace,
                        pod = pod.metadata.name.as_deref().unwrap_or_default(),
                        "Pod created"
                    );
                    let created = PodCreated {
                        namespace: namespace.clone(),
                        pod,
                    };
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        sent = events.send(created) => {
                            if sent.is_err() {
                                debug!(namespace = %namespace, "Event receiver dropped");
                                return;
                            }
                        }
                    }
                }
            }
            Some(Err(e)) if !cache.is_synced() => {
                error!(namespace = %namespace, error = %e, "Pod watch failed before sync");
                state.send_replace(SyncState::Failed(e.to_string()));
                return;
            }
            Some(Err(e)) => {
                // The watcher relists on its next poll; the relist reports missed pods
                warn!(namespace = %namespace, error = %e, "Pod watch error, waiting for relist");
                state.send_replace(SyncState::Degraded(e.to_string()));
            }
            None => {
                warn!(namespace = %namespace, "Pod watch stream ended");
                state.send_replace(SyncState::Failed("watch stream ended".to_string()));
                return;
            }
        }
    }

    debug!(namespace = %namespace, "Pod watch stopped");
}
