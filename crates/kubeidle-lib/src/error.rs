//! Error types for the idle-window controller

use crate::models::WorkloadKind;
use thiserror::Error;

/// Errors returned by the cluster resource client
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// The write was rejected because the object changed since it was read
    #[error("conflict writing {kind} {namespace}/{name}: {message}")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
        message: String,
    },

    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("watch stream error: {0}")]
    Watch(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    /// Classify a kube error for a given object, lifting 404 and 409 responses
    pub fn from_kube(error: kube::Error, kind: &str, namespace: &str, name: &str) -> Self {
        match error {
            kube::Error::Api(ref response) if response.code == 404 => ClusterError::NotFound {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(ref response) if response.code == 409 => ClusterError::Conflict {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: response.message.clone(),
            },
            other => ClusterError::Api(other),
        }
    }
}

/// Controller error taxonomy
#[derive(Error, Debug)]
pub enum KubeIdleError {
    #[error("invalid {field} {value:?}: expected HH:MM or HHMM in 24-hour time")]
    InvalidTimeFormat { field: &'static str, value: String },

    #[error("failed to connect to cluster: {0}")]
    ClusterConnection(#[source] kube::Error),

    #[error("watch cache sync failed: {0}")]
    CacheSyncFailed(String),

    #[error("failed to list pods in namespace {namespace}")]
    ListingFailed {
        namespace: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to scale down {kind} {namespace}/{name} after {attempts} attempt(s)")]
    ScaleDownFailed {
        kind: WorkloadKind,
        namespace: String,
        name: String,
        attempts: u32,
        #[source]
        source: ClusterError,
    },

    #[error("failed to persist scale-down record for {namespace}/{name}: {reason}")]
    RecordPersistenceFailed {
        namespace: String,
        name: String,
        reason: String,
    },

    #[error("operation cancelled by shutdown")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, KubeIdleError>;
