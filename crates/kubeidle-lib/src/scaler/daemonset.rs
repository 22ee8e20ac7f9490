//! DaemonSet strategy
//!
//! DaemonSets have no replica count. Pinning the pod template to a node
//! selector no node carries stops new placements; existing pods are left for
//! the DaemonSet controller to wind down.

use super::{
    disable_node_selector_patch, ScaleReport, ScalerContext, ScalingStrategy,
    DISABLE_NODE_SELECTOR_KEY, DISABLE_NODE_SELECTOR_VALUE,
};
use crate::error::{ClusterError, Result};
use crate::models::{ScaleOutcome, WorkloadKind};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use tracing::{debug, info};

pub struct DaemonSetScaler {
    ctx: ScalerContext,
}

impl DaemonSetScaler {
    pub fn new(ctx: ScalerContext) -> Self {
        Self { ctx }
    }

    async fn disable(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<ScaleOutcome, ClusterError> {
        let daemon_set = self.ctx.client.get_daemon_set(namespace, name).await?;

        if is_disabled(&daemon_set) {
            return Ok(ScaleOutcome::AlreadyScaledDown);
        }

        let patch = disable_node_selector_patch(daemon_set.metadata.resource_version.as_deref());
        self.ctx
            .client
            .patch_workload(WorkloadKind::DaemonSet, namespace, name, &patch)
            .await?;

        Ok(ScaleOutcome::ScaledDown)
    }
}

/// Whether the template already carries the disable selector
pub(crate) fn is_disabled(daemon_set: &DaemonSet) -> bool {
    daemon_set
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .and_then(|pod_spec| pod_spec.node_selector.as_ref())
        .and_then(|selector| selector.get(DISABLE_NODE_SELECTOR_KEY))
        .is_some_and(|value| value == DISABLE_NODE_SELECTOR_VALUE)
}

#[async_trait]
impl ScalingStrategy for DaemonSetScaler {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::DaemonSet
    }

    async fn scale_down(&self, namespace: &str, name: &str) -> Result<ScaleReport> {
        let kind = self.kind();
        let outcome = self
            .ctx
            .retry(kind, namespace, name, |_| self.disable(namespace, name))
            .await?;

        match outcome {
            ScaleOutcome::ScaledDown => {
                info!(namespace = %namespace, daemonset = %name, "Patched DaemonSet with disable nodeSelector")
            }
            ScaleOutcome::AlreadyScaledDown => {
                debug!(namespace = %namespace, daemonset = %name, "DaemonSet already disabled")
            }
        }

        Ok(ScaleReport {
            kind,
            name: name.to_string(),
            outcome,
        })
    }
}
