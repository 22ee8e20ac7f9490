//! Deployment strategy
//!
//! Pods of a Deployment point at their ReplicaSet, so the incoming name is
//! first resolved through the ReplicaSet's own owner reference.

use super::{
    resources, zero_replicas_patch, ReplicaChange, ScaleReport, ScalerContext, ScalingStrategy,
};
use crate::error::{ClusterError, Result};
use crate::models::{ScaleOutcome, WorkloadKind};
use async_trait::async_trait;
use tracing::{debug, info};

pub struct DeploymentScaler {
    ctx: ScalerContext,
}

impl DeploymentScaler {
    pub fn new(ctx: ScalerContext) -> Self {
        Self { ctx }
    }

    /// Map a ReplicaSet name to its owning Deployment, or keep the name as is
    async fn resolve_name(&self, namespace: &str, name: &str) -> String {
        match self.ctx.client.get_replica_set(namespace, name).await {
            Ok(Some(replica_set)) => replica_set
                .metadata
                .owner_references
                .unwrap_or_default()
                .into_iter()
                .find(|owner| owner.kind == WorkloadKind::Deployment.as_str())
                .map(|owner| {
                    debug!(
                        namespace = %namespace,
                        replica_set = %name,
                        deployment = %owner.name,
                        "Resolved ReplicaSet to owning Deployment"
                    );
                    owner.name
                })
                .unwrap_or_else(|| name.to_string()),
            Ok(None) => name.to_string(),
            Err(e) => {
                debug!(namespace = %namespace, name = %name, error = %e, "ReplicaSet lookup failed");
                name.to_string()
            }
        }
    }

    async fn zero_replicas(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<ReplicaChange, ClusterError> {
        let deployment = self.ctx.client.get_deployment(namespace, name).await?;
        let spec = deployment.spec.unwrap_or_default();
        let previous = spec.replicas.unwrap_or(1);

        if previous == 0 {
            return Ok(ReplicaChange::AlreadyZero);
        }

        let patch = zero_replicas_patch(deployment.metadata.resource_version.as_deref());
        self.ctx
            .client
            .patch_workload(WorkloadKind::Deployment, namespace, name, &patch)
            .await?;

        Ok(ReplicaChange::Scaled {
            previous,
            totals: resources::template_totals(&spec.template),
        })
    }
}

#[async_trait]
impl ScalingStrategy for DeploymentScaler {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::Deployment
    }

    async fn scale_down(&self, namespace: &str, name: &str) -> Result<ScaleReport> {
        let name = self.resolve_name(namespace, name).await;
        let kind = self.kind();

        let change = self
            .ctx
            .retry(kind, namespace, &name, |_| self.zero_replicas(namespace, &name))
            .await?;

        let outcome = match change {
            ReplicaChange::Scaled { previous, totals } => {
                info!(
                    namespace = %namespace,
                    deployment = %name,
                    previous_replicas = previous,
                    "Patched Deployment with zero replicas"
                );
                self.ctx
                    .record_scale_down(kind, namespace, &name, previous, totals)
                    .await;
                ScaleOutcome::ScaledDown
            }
            ReplicaChange::AlreadyZero => {
                debug!(namespace = %namespace, deployment = %name, "Deployment already at zero replicas");
                ScaleOutcome::AlreadyScaledDown
            }
        };

        Ok(ScaleReport {
            kind,
            name,
            outcome,
        })
    }
}
