//! Sweeper
//!
//! Label-driven cleanup: everything a workflow ever created carries its
//! `workflow` label, so cleanup is a pure function of (namespace, name).
//! Deletion runs in reverse creation order and treats absent objects as
//! success. Workflow-scoped secrets survive per-run failures and are only
//! swept when the workflow itself is deleted.

use std::sync::Arc;

use tracing::{debug, info};

use bosun_k8s::{ClusterOps, Kind, Result, Selector};

// Reverse of the synthesizer's creation order.
const RUN_SWEEP_ORDER: [Kind; 4] = [Kind::Ingress, Kind::Service, Kind::Deployment, Kind::Job];
const WORKFLOW_SWEEP_ORDER: [Kind; 6] = [
    Kind::Ingress,
    Kind::Service,
    Kind::Deployment,
    Kind::Job,
    Kind::CronJob,
    Kind::Secret,
];

pub struct Sweeper {
    cluster: Arc<dyn ClusterOps>,
}

impl Sweeper {
    pub fn new(cluster: Arc<dyn ClusterOps>) -> Self {
        Self { cluster }
    }

    /// Cleanup after a failed or cancelled run. Keeps the workflow-scoped
    /// secrets and any CronJob: those belong to the workflow, not the run.
    pub async fn sweep_run(
        &self,
        namespace: &str,
        workflow: &str,
        namespace_created: bool,
    ) -> Result<()> {
        info!(workflow, namespace, "sweeping run objects");
        self.sweep_kinds(namespace, workflow, &RUN_SWEEP_ORDER).await?;
        if namespace_created {
            self.drop_namespace_if_idle(namespace).await?;
        }
        Ok(())
    }

    /// Full deletion of a workflow, secrets and CronJob included.
    pub async fn sweep_workflow(
        &self,
        namespace: &str,
        workflow: &str,
        namespace_created: bool,
    ) -> Result<()> {
        info!(workflow, namespace, "deleting all workflow objects");
        self.sweep_kinds(namespace, workflow, &WORKFLOW_SWEEP_ORDER).await?;
        if namespace_created {
            self.drop_namespace_if_idle(namespace).await?;
        }
        Ok(())
    }

    async fn sweep_kinds(&self, namespace: &str, workflow: &str, kinds: &[Kind]) -> Result<()> {
        let selector = Selector::workflow(workflow);
        for kind in kinds {
            let objects = self.cluster.list(*kind, namespace, &selector).await?;
            for object in objects {
                debug!(kind = %kind, name = object.name(), "deleting");
                self.cluster.delete(*kind, namespace, object.name()).await?;
            }
        }
        Ok(())
    }

    /// Drop the namespace only when no workflow-labelled objects of any
    /// workflow remain in it.
    async fn drop_namespace_if_idle(&self, namespace: &str) -> Result<()> {
        let any = Selector::any_workflow();
        for kind in WORKFLOW_SWEEP_ORDER {
            if !self.cluster.list(kind, namespace, &any).await?.is_empty() {
                debug!(namespace, "namespace still owns workflow objects, keeping it");
                return Ok(());
            }
        }
        info!(namespace, "dropping namespace created by this run");
        self.cluster.delete(Kind::Namespace, "", namespace).await
    }
}
