//! Scale-down record store
//!
//! Records capture what a workload looked like before it was scaled to zero
//! so it can be restored by hand. Storage is best-effort: callers log a
//! failure and carry on.

use crate::error::{KubeIdleError, Result};
use crate::models::{ResourceTotals, WorkloadKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

/// State of a workload at the moment it was scaled down
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleDownRecord {
    pub cluster_name: String,
    pub application_name: String,
    pub namespace: String,
    pub object_kind: WorkloadKind,
    pub replicas_before_scale_down: i32,
    pub cpu_requests: String,
    pub memory_requests: String,
    pub cpu_limits: String,
    pub memory_limits: String,
    pub scale_down_time: DateTime<Utc>,
}

impl ScaleDownRecord {
    pub fn new(
        cluster_name: &str,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        replicas: i32,
        totals: ResourceTotals,
    ) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            application_name: name.to_string(),
            namespace: namespace.to_string(),
            object_kind: kind,
            replicas_before_scale_down: replicas,
            cpu_requests: format!("{}m", totals.cpu_requests_millicores),
            memory_requests: totals.memory_requests_bytes.to_string(),
            cpu_limits: format!("{}m", totals.cpu_limits_millicores),
            memory_limits: totals.memory_limits_bytes.to_string(),
            scale_down_time: Utc::now(),
        }
    }
}

/// Sink for scale-down records
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn record(&self, record: &ScaleDownRecord) -> Result<()>;
}

/// Emits records as structured log events
#[derive(Debug, Clone, Default)]
pub struct LogRecordStore;

#[async_trait]
impl RecordStore for LogRecordStore {
    async fn record(&self, record: &ScaleDownRecord) -> Result<()> {
        info!(
            event = "scale_down_recorded",
            cluster = %record.cluster_name,
            application = %record.application_name,
            namespace = %record.namespace,
            kind = %record.object_kind,
            replicas = record.replicas_before_scale_down,
            cpu_requests = %record.cpu_requests,
            memory_requests = %record.memory_requests,
            cpu_limits = %record.cpu_limits,
            memory_limits = %record.memory_limits,
            scale_down_time = %record.scale_down_time,
            "Recorded scale-down state"
        );
        Ok(())
    }
}

/// Appends records to a file, one JSON object per line
pub struct JsonLinesRecordStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl RecordStore for JsonLinesRecordStore {
    async fn record(&self, record: &ScaleDownRecord) -> Result<()> {
        let failed = |reason: String| KubeIdleError::RecordPersistenceFailed {
            namespace: record.namespace.clone(),
            name: record.application_name.clone(),
            reason,
        };

        let mut line = serde_json::to_vec(record).map_err(|e| failed(e.to_string()))?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| failed(format!("open {}: {}", self.path.display(), e)))?;
        file.write_all(&line)
            .await
            .map_err(|e| failed(format!("write {}: {}", self.path.display(), e)))?;
        file.flush().await.map_err(|e| failed(e.to_string()))?;

        Ok(())
    }
}
