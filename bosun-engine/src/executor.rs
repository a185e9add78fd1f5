//! Executor
//!
//! Drives the stages of a workflow in order. Within a stage every step is
//! submitted, then watched by its own poller; the stage barrier waits for
//! *all* pollers before deciding whether to continue, so a fast failure
//! never short-circuits a sibling step mid-flight. Any non-success outcome
//! aborts the run and hands the already-created objects to the sweeper.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use bosun_core::domain::outcome::{Run, StepOutcome, StepReport};
use bosun_core::domain::workflow::{Stage, Workflow};
use bosun_core::source::Archive;
use bosun_k8s::bundle::{self, StepBundle, SynthContext, DOCKER_SECRET_TYPE};
use bosun_k8s::{ClusterOps, Kind, Object, Selector, STAGE_LABEL};

use crate::error::{EngineError, StageFailure};
use crate::logs::LogSink;
use crate::poller::StepPoller;
use crate::sweeper::Sweeper;

pub struct Executor {
    cluster: Arc<dyn ClusterOps>,
    logs: Arc<dyn LogSink>,
    cancel: CancellationToken,
    /// Engine version; tags the default client/runner images.
    version: String,
}

impl Executor {
    pub fn new(
        cluster: Arc<dyn ClusterOps>,
        logs: Arc<dyn LogSink>,
        cancel: CancellationToken,
        version: impl Into<String>,
    ) -> Self {
        Self { cluster, logs, cancel, version: version.into() }
    }

    /// Execute all stages of the workflow against the cluster.
    pub async fn run(&self, workflow: &Workflow, archive: &Archive) -> Result<Run, EngineError> {
        let mut run = Run::new(&workflow.name, &workflow.namespace);
        info!(
            workflow = %workflow.name,
            namespace = %workflow.namespace,
            run_id = %run.id,
            stages = workflow.stages.len(),
            "starting workflow run"
        );

        if self
            .cluster
            .get(Kind::Namespace, "", &workflow.namespace)
            .await?
            .is_none()
        {
            self.cluster
                .ensure(bundle::namespace_object(&workflow.namespace))
                .await?;
            run.namespace_created = true;
            info!(namespace = %workflow.namespace, "created namespace");
        }

        let repo_secret = bundle::repo_secret_object(
            &workflow.name,
            &workflow.namespace,
            &workflow.source,
        );
        let repo_secret_name = repo_secret.as_ref().map(|s| s.name().to_string());
        if let Some(secret) = repo_secret {
            info!(secret = secret.name(), "ensuring repo access secret");
            self.cluster.ensure(secret).await?;
        }

        let image_pull_secret = self.latest_docker_secret(&workflow.namespace).await?;

        for stage in &workflow.stages {
            if self.cancel.is_cancelled() {
                self.sweep_after_failure(&run).await;
                return Err(EngineError::Cancelled);
            }

            let ctx = SynthContext {
                workflow: &workflow.name,
                namespace: &workflow.namespace,
                source_url: &workflow.source.url,
                archive,
                repo_secret: repo_secret_name.as_deref(),
                image_pull_secret: image_pull_secret.as_deref(),
                version: &self.version,
            };

            let reports = self.run_stage(workflow, stage, &ctx).await?;
            run.reports.extend(reports.iter().cloned());

            if reports.iter().any(|r| r.outcome == StepOutcome::Cancelled) {
                self.sweep_after_failure(&run).await;
                return Err(EngineError::Cancelled);
            }

            let failed: Vec<StepReport> = reports
                .into_iter()
                .filter(|r| !r.outcome.is_success())
                .collect();
            if !failed.is_empty() {
                for report in &failed {
                    error!(
                        step = %report.step,
                        stage = %report.stage,
                        outcome = %report.outcome,
                        "step did not succeed"
                    );
                }
                self.sweep_after_failure(&run).await;
                let failure = StageFailure {
                    workflow: workflow.name.clone(),
                    stage: stage.name.clone(),
                    reports: failed,
                };
                return Err(if failure.all_timed_out() {
                    EngineError::Timeout(failure)
                } else {
                    EngineError::StepFailure(failure)
                });
            }
            info!(stage = %stage.name, "stage completed");
        }

        info!(workflow = %workflow.name, run_id = %run.id, "workflow run completed");
        Ok(run)
    }

    /// Submit one stage's bundles and block until every poller reports.
    async fn run_stage(
        &self,
        workflow: &Workflow,
        stage: &Stage,
        ctx: &SynthContext<'_>,
    ) -> Result<Vec<StepReport>, EngineError> {
        info!(stage = %stage.name, steps = stage.steps.len(), "starting stage");

        // Jobs are immutable once created; drop leftovers from an earlier
        // run of this stage before re-submitting.
        let stale_selector =
            Selector::workflow(&workflow.name).eq(STAGE_LABEL, stage.name.clone());
        for stale in self
            .cluster
            .list(Kind::Job, &workflow.namespace, &stale_selector)
            .await?
        {
            self.cluster
                .delete(Kind::Job, &workflow.namespace, stale.name())
                .await?;
        }

        let bundles: Vec<StepBundle> = stage
            .steps
            .iter()
            .map(|step| bundle::synthesize_step(ctx, &stage.name, step))
            .collect();

        for step_bundle in &bundles {
            for object in step_bundle.objects() {
                // A live Service owns its clusterIP and an Ingress its
                // status; both are create-once, only workloads roll.
                if matches!(object.kind(), Kind::Service | Kind::Ingress)
                    && self
                        .cluster
                        .get(object.kind(), &workflow.namespace, object.name())
                        .await?
                        .is_some()
                {
                    continue;
                }
                info!(
                    kind = %object.kind(),
                    name = object.name(),
                    step = %step_bundle.step,
                    "submitting object"
                );
                self.cluster.ensure(object).await?;
            }
        }

        let mut handles = Vec::with_capacity(bundles.len());
        for (step, step_bundle) in stage.steps.iter().zip(&bundles) {
            let poller = StepPoller::new(
                Arc::clone(&self.cluster),
                Arc::clone(&self.logs),
                self.cancel.clone(),
                &workflow.name,
                &workflow.namespace,
                step,
                step_bundle,
            );
            handles.push(tokio::spawn(poller.run()));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(err) => {
                    return Err(EngineError::Internal(format!("poller task panicked: {err}")))
                }
            }
        }
        Ok(reports)
    }

    async fn sweep_after_failure(&self, run: &Run) {
        let sweeper = Sweeper::new(Arc::clone(&self.cluster));
        if let Err(err) = sweeper
            .sweep_run(&run.namespace, &run.workflow, run.namespace_created)
            .await
        {
            warn!(%err, "cleanup after failed run did not complete");
        }
    }

    /// The most recently created docker-registry secret in the namespace,
    /// attached as an image pull secret to every synthesized pod.
    async fn latest_docker_secret(&self, namespace: &str) -> Result<Option<String>, EngineError> {
        let secrets = self
            .cluster
            .list(Kind::Secret, namespace, &Selector::new())
            .await?;
        let mut docker: Vec<&Object> = secrets
            .iter()
            .filter(|object| {
                object
                    .as_secret()
                    .and_then(|s| s.type_.as_deref())
                    == Some(DOCKER_SECRET_TYPE)
            })
            .collect();
        docker.sort_by_key(|object| object.creation_timestamp().map(|t| t.0));
        Ok(docker.last().map(|object| object.name().to_string()))
    }
}
