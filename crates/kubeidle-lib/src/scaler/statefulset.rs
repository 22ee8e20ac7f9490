//! StatefulSet strategy

use super::{
    resources, zero_replicas_patch, ReplicaChange, ScaleReport, ScalerContext, ScalingStrategy,
};
use crate::error::{ClusterError, Result};
use crate::models::{ScaleOutcome, WorkloadKind};
use async_trait::async_trait;
use tracing::{debug, info};

pub struct StatefulSetScaler {
    ctx: ScalerContext,
}

impl StatefulSetScaler {
    pub fn new(ctx: ScalerContext) -> Self {
        Self { ctx }
    }

    async fn zero_replicas(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<ReplicaChange, ClusterError> {
        let stateful_set = self.ctx.client.get_stateful_set(namespace, name).await?;
        let spec = stateful_set.spec.unwrap_or_default();
        let previous = spec.replicas.unwrap_or(1);

        if previous == 0 {
            return Ok(ReplicaChange::AlreadyZero);
        }

        let patch = zero_replicas_patch(stateful_set.metadata.resource_version.as_deref());
        self.ctx
            .client
            .patch_workload(WorkloadKind::StatefulSet, namespace, name, &patch)
            .await?;

        Ok(ReplicaChange::Scaled {
            previous,
            totals: resources::template_totals(&spec.template),
        })
    }
}

#[async_trait]
impl ScalingStrategy for StatefulSetScaler {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::StatefulSet
    }

    async fn scale_down(&self, namespace: &str, name: &str) -> Result<ScaleReport> {
        let kind = self.kind();
        let change = self
            .ctx
            .retry(kind, namespace, name, |_| self.zero_replicas(namespace, name))
            .await?;

        let outcome = match change {
            ReplicaChange::Scaled { previous, totals } => {
                info!(
                    namespace = %namespace,
                    statefulset = %name,
                    previous_replicas = previous,
                    "Patched StatefulSet with zero replicas"
                );
                self.ctx
                    .record_scale_down(kind, namespace, name, previous, totals)
                    .await;
                ScaleOutcome::ScaledDown
            }
            ReplicaChange::AlreadyZero => {
                debug!(namespace = %namespace, statefulset = %name, "StatefulSet already at zero replicas");
                ScaleOutcome::AlreadyScaledDown
            }
        };

        Ok(ScaleReport {
            kind,
            name: name.to_string(),
            outcome,
        })
    }
}
