//! Liveness and readiness state behind the probe endpoints
//!
//! Two components report in: the namespace watch streams and the catch-up
//! reconciler. Readiness additionally requires every pod cache to have
//! completed its initial listing.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Ordered from best to worst, so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still scaling, with reduced coverage
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// Namespace pod watch streams
    Watcher,
    /// Catch-up listing and dispatch
    Reconciler,
}

impl Component {
    pub fn name(self) -> &'static str {
        match self {
            Component::Watcher => "watcher",
            Component::Reconciler => "reconciler",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix seconds of the last report
    pub updated_at: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: ComponentStatus,
    pub components: BTreeMap<&'static str, ComponentHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize)]
pub struct Readiness {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct HealthState {
    watcher: ComponentHealth,
    reconciler: ComponentHealth,
    synced: bool,
}

impl HealthState {
    fn slot(&mut self, component: Component) -> &mut ComponentHealth {
        match component {
            Component::Watcher => &mut self.watcher,
            Component::Reconciler => &mut self.reconciler,
        }
    }

    fn entries(&self) -> [(Component, &ComponentHealth); 2] {
        [
            (Component::Watcher, &self.watcher),
            (Component::Reconciler, &self.reconciler),
        ]
    }
}

/// Shared health state; clones observe the same components
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Both components healthy, caches not yet synced
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(HealthState {
                watcher: ComponentHealth::new(ComponentStatus::Healthy, None),
                reconciler: ComponentHealth::new(ComponentStatus::Healthy, None),
                synced: false,
            })),
        }
    }

    pub async fn report(
        &self,
        component: Component,
        status: ComponentStatus,
        message: Option<String>,
    ) {
        let mut state = self.state.write().await;
        *state.slot(component) = ComponentHealth::new(status, message);
    }

    pub async fn set_healthy(&self, component: Component) {
        self.report(component, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.report(component, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) {
        self.report(component, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    /// Record whether every pod cache has completed its initial listing
    pub async fn set_synced(&self, synced: bool) {
        self.state.write().await.synced = synced;
    }

    pub async fn health(&self) -> HealthReport {
        let state = self.state.read().await;
        let entries = state.entries();

        HealthReport {
            status: entries
                .iter()
                .map(|(_, health)| health.status)
                .max()
                .unwrap_or(ComponentStatus::Healthy),
            components: entries
                .iter()
                .map(|(component, health)| (component.name(), ComponentHealth::clone(health)))
                .collect(),
        }
    }

    pub async fn readiness(&self) -> Readiness {
        let state = self.state.read().await;

        if !state.synced {
            return Readiness {
                ready: false,
                reason: Some("Pod caches not yet synced".to_string()),
            };
        }

        let failing: Vec<String> = state
            .entries()
            .iter()
            .filter(|(_, health)| health.status == ComponentStatus::Unhealthy)
            .map(|(component, health)| match &health.message {
                Some(message) => format!("{}: {}", component.name(), message),
                None => component.name().to_string(),
            })
            .collect();

        if failing.is_empty() {
            Readiness {
                ready: true,
                reason: None,
            }
        } else {
            Readiness {
                ready: false,
                reason: Some(failing.join("; ")),
            }
        }
    }
}
