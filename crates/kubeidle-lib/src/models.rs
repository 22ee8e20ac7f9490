//! Core data models for the idle-window controller

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace watched when none are configured
pub const DEFAULT_NAMESPACE: &str = "default";

/// Workload controller kinds this system knows how to disable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    DaemonSet,
    StatefulSet,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::StatefulSet => "StatefulSet",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner reference extracted from a workload instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
}

impl OwnerReference {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// All owner references carried by a pod, in metadata order
    pub fn from_pod(pod: &Pod) -> Vec<OwnerReference> {
        pod.metadata
            .owner_references
            .as_ref()
            .map(|refs| {
                refs.iter()
                    .map(|r| OwnerReference::new(r.kind.clone(), r.name.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Ordered set of namespaces to watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceSet {
    namespaces: Vec<String>,
}

impl NamespaceSet {
    /// Build from a list, falling back to the default namespace when empty
    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut namespaces: Vec<String> = namespaces
            .into_iter()
            .map(Into::into)
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty())
            .collect();

        if namespaces.is_empty() {
            namespaces.push(DEFAULT_NAMESPACE.to_string());
        }

        Self { namespaces }
    }

    /// Parse a comma separated list such as `"team-a, team-b"`
    pub fn from_csv(value: &str) -> Self {
        Self::new(value.split(','))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.namespaces.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

impl Default for NamespaceSet {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

/// Result of a successful scale-down call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleOutcome {
    /// The workload was changed by this call
    ScaledDown,
    /// The workload was already disabled; nothing was written
    AlreadyScaledDown,
}

/// Outcome label of an attempted scale operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Success => "success",
            OperationStatus::Failed => "failed",
        }
    }
}

/// An attempted mutation, handed to observability and never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleOperation {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
    pub status: OperationStatus,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate container resources of a pod template
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTotals {
    pub cpu_requests_millicores: u64,
    pub memory_requests_bytes: u64,
    pub cpu_limits_millicores: u64,
    pub memory_limits_bytes: u64,
}
