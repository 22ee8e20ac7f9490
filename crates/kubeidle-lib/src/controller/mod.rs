//! Reconciliation controller
//!
//! Owns the active flag, the strategy registry and the namespace watch
//! fan-out. Pod events are dispatched to strategies only while active; the
//! first check after each stale→active transition runs one catch-up pass over
//! every pod that already exists.


use crate::cluster::ClusterClient;
use crate::error::{KubeIdleError, Result};
use crate::health::{Component, HealthRegistry};
use crate::models::{NamespaceSet, OperationStatus, OwnerReference, ScaleOperation, ScaleOutcome};
use crate::observability::{ControllerMetrics, StructuredLogger, OP_CATCH_UP, OP_HANDLE_ADD};
use crate::scaler::StrategyRegistry;
use crate::watch::{NamespaceWatcher, PodCreated};
use crate::window::ActiveStateSink;
use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Controller loop tuning
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How often the loop re-checks for a pending catch-up and stream health
    pub check_interval: Duration,
    /// Capacity of the created-pod channel shared by all streams
    pub event_buffer: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(1),
            event_buffer: 256,
        }
    }
}

/// Scale operations triggered by one or more pods
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl DispatchSummary {
    fn merge(&mut self, other: DispatchSummary) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

/// Result of one catch-up pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchUpSummary {
    /// Namespaces listed successfully
    pub namespaces: usize,
    pub skipped_namespaces: usize,
    pub pods: usize,
    pub dispatch: DispatchSummary,
}

/// Watch stream health already reported by the run loop
#[derive(Debug, Default)]
struct StreamHealth {
    stopped: HashSet<String>,
    degraded: bool,
}

pub struct IdleController {
    client: Arc<dyn ClusterClient>,
    registry: StrategyRegistry,
    namespaces: NamespaceSet,
    config: ControllerConfig,
    metrics: ControllerMetrics,
    health: HealthRegistry,
    logger: StructuredLogger,
    active: AtomicBool,
    /// Bumped on every stale→active transition
    activation_generation: AtomicU64,
    /// Activation generation covered by the last catch-up pass
    reconciled_generation: AtomicU64,
    activated: Notify,
}

impl IdleController {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        registry: StrategyRegistry,
        namespaces: NamespaceSet,
    ) -> Self {
        Self {
            client,
            registry,
            namespaces,
            config: ControllerConfig::default(),
            metrics: ControllerMetrics::new(),
            health: HealthRegistry::new(),
            logger: StructuredLogger::new("default"),
            active: AtomicBool::new(false),
            activation_generation: AtomicU64::new(0),
            reconciled_generation: AtomicU64::new(0),
            activated: Notify::new(),
        }
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        let was_active = self.active.swap(active, Ordering::SeqCst);
        self.metrics.set_controller_active(active);

        if was_active == active {
            return;
        }

        if active {
            self.activation_generation.fetch_add(1, Ordering::SeqCst);
            self.activated.notify_one();
        }
        self.logger.log_active_transition(active);
    }

    /// Whether the current activation has had its catch-up pass
    pub fn reconciled_this_activation(&self) -> bool {
        self.reconciled_generation.load(Ordering::SeqCst)
            >= self.activation_generation.load(Ordering::SeqCst)
    }

    fn needs_catch_up(&self) -> bool {
        self.is_active() && !self.reconciled_this_activation()
    }

    /// Dispatch every owner of `pod` that has a registered strategy
    ///
    /// Per-owner failures are logged and counted; they never stop the
    /// remaining owners.
    pub async fn dispatch_pod(&self, namespace: &str, pod: &Pod) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        if !self.is_active() {
            debug!(
                namespace = %namespace,
                pod = pod.metadata.name.as_deref().unwrap_or_default(),
                "Controller inactive, skipping pod"
            );
            return summary;
        }

        for owner in OwnerReference::from_pod(pod) {
            let Some(strategy) = self.registry.get(&owner.kind) else {
                continue;
            };
            let kind = strategy.kind();

            let result = strategy.scale_down(namespace, &owner.name).await;
            if matches!(result, Err(KubeIdleError::Cancelled)) {
                debug!(namespace = %namespace, owner = %owner.name, "Scale-down cancelled");
                break;
            }

            summary.attempted += 1;
            self.metrics.inc_scale_down_attempts(kind, namespace);

            let (status, name) = match result {
                Ok(report) => {
                    let changed = report.outcome == ScaleOutcome::ScaledDown;
                    if changed {
                        self.metrics.inc_resources_scaled_down(kind, namespace);
                    }
                    self.logger.log_scale_down(kind, namespace, &report.name, changed);
                    summary.succeeded += 1;
                    (OperationStatus::Success, report.name)
                }
                Err(e) => {
                    self.logger
                        .log_scale_down_failure(kind, namespace, &owner.name, &e.to_string());
                    summary.failed += 1;
                    (OperationStatus::Failed, owner.name)
                }
            };

            self.metrics.record_operation(&ScaleOperation {
                kind,
                namespace: namespace.to_string(),
                name,
                status,
                timestamp: Utc::now(),
            });
        }

        summary
    }

    async fn handle_created(&self, event: PodCreated) {
        if !self.is_active() {
            debug!(
                namespace = %event.namespace,
                pod = event.pod.metadata.name.as_deref().unwrap_or_default(),
                "Controller inactive, skipping created pod"
            );
            return;
        }

        let start = Instant::now();
        let summary = self.dispatch_pod(&event.namespace, &event.pod).await;
        self.metrics
            .observe_reconciliation(OP_HANDLE_ADD, start.elapsed().as_secs_f64());

        if summary.attempted > 0 {
            debug!(
                namespace = %event.namespace,
                pod = event.pod.metadata.name.as_deref().unwrap_or_default(),
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Handled created pod"
            );
        }
    }

    /// List and dispatch every pod in every namespace, in namespace order
    ///
    /// A namespace whose listing fails is skipped. The pass marks the
    /// activation it started under as reconciled.
    pub async fn catch_up(&self) -> CatchUpSummary {
        let generation = self.activation_generation.load(Ordering::SeqCst);
        let start = Instant::now();
        let mut summary = CatchUpSummary::default();
        let mut listing_failures = Vec::new();

        info!(namespaces = self.namespaces.len(), "Starting catch-up reconciliation");

        for namespace in self.namespaces.iter() {
            let pods = match self.client.list_pods(namespace).await {
                Ok(pods) => pods,
                Err(source) => {
                    let err = KubeIdleError::ListingFailed {
                        namespace: namespace.to_string(),
                        source,
                    };
                    warn!(namespace = %namespace, error = %err, "Skipping namespace");
                    summary.skipped_namespaces += 1;
                    listing_failures.push(namespace.to_string());
                    continue;
                }
            };

            summary.namespaces += 1;
            summary.pods += pods.len();
            for pod in &pods {
                summary.dispatch.merge(self.dispatch_pod(namespace, pod).await);
            }
        }

        self.reconciled_generation
            .fetch_max(generation, Ordering::SeqCst);
        self.metrics
            .observe_reconciliation(OP_CATCH_UP, start.elapsed().as_secs_f64());
        self.logger.log_catch_up(&summary);

        if listing_failures.is_empty() {
            self.health.set_healthy(Component::Reconciler).await;
        } else {
            self.health
                .set_degraded(
                    Component::Reconciler,
                    format!("Pod listing failed for: {}", listing_failures.join(", ")),
                )
                .await;
        }

        summary
    }

    /// Run the reconciliation loop until `cancel` fires
    ///
    /// Fails with [`KubeIdleError::CacheSyncFailed`] when a namespace watch
    /// cannot complete its initial listing.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let streams_cancel = cancel.child_token();
        let (watcher, mut events) = NamespaceWatcher::start(
            self.client.clone(),
            &self.namespaces,
            self.config.event_buffer,
            streams_cancel.clone(),
        );

        match watcher.await_synced(&cancel).await {
            Ok(()) => {}
            Err(KubeIdleError::Cancelled) => {
                streams_cancel.cancel();
                watcher.shutdown().await;
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "Failed to wait for pod caches to sync");
                self.health
                    .set_unhealthy(Component::Watcher, e.to_string())
                    .await;
                streams_cancel.cancel();
                watcher.shutdown().await;
                return Err(e);
            }
        }

        self.metrics.set_watch_streams_synced(watcher.synced_count());
        self.health.set_healthy(Component::Watcher).await;
        self.health.set_synced(true).await;

        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stream_health = StreamHealth::default();
        let mut events_open = true;

        loop {
            if self.needs_catch_up() {
                self.catch_up().await;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_created(event).await,
                    None => {
                        warn!("Every pod watch stream has stopped");
                        events_open = false;
                    }
                },
                _ = ticker.tick() => {
                    self.check_streams(&watcher, &mut stream_health).await;
                }
                _ = self.activated.notified() => {}
            }
        }

        info!("Shutting down reconciliation loop");
        streams_cancel.cancel();
        watcher.shutdown().await;
        self.health.set_synced(false).await;
        Ok(())
    }

    async fn check_streams(&self, watcher: &NamespaceWatcher, seen: &mut StreamHealth) {
        self.metrics.set_watch_streams_synced(watcher.synced_count());

        for (namespace, reason) in watcher.failed_streams() {
            if seen.stopped.insert(namespace.clone()) {
                error!(namespace = %namespace, reason = %reason, "Pod watch stream stopped");
                self.health
                    .set_unhealthy(
                        Component::Watcher,
                        format!("watch for {} stopped: {}", namespace, reason),
                    )
                    .await;
            }
        }

        // Stopped streams are not restarted, so the watcher stays unhealthy
        if !seen.stopped.is_empty() {
            return;
        }

        let recovering = watcher.degraded_streams();
        if let Some((_, reason)) = recovering.first() {
            let namespaces: Vec<&str> = recovering.iter().map(|(ns, _)| ns.as_str()).collect();
            self.health
                .set_degraded(
                    Component::Watcher,
                    format!("watch recovering for {}: {}", namespaces.join(", "), reason),
                )
                .await;
            seen.degraded = true;
        } else if seen.degraded {
            info!("Every pod watch stream recovered");
            self.health.set_healthy(Component::Watcher).await;
            seen.degraded = false;
        }
    }
}

impl ActiveStateSink for IdleController {
    fn set_active(&self, active: bool) {
        IdleController::set_active(self, active);
    }
}
