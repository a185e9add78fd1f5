//! Step poller
//!
//! One poller per in-flight step. It consumes watch events as hints and
//! re-reads status at the step's polling interval, translating raw
//! Kubernetes status into the engine's outcome enum under a client-side
//! time budget. Transient cluster errors back off linearly up to ten times
//! the base interval before the step is declared failed.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bosun_core::domain::outcome::{StepOutcome, StepReport, StepState};
use bosun_core::domain::workflow::{Step, StepKind};
use bosun_k8s::bundle::{StepBundle, CONTAINER_NAME, INIT_CONTAINER_NAME};
use bosun_k8s::{ClusterError, ClusterOps, Kind, Object, ObjectStream, Selector};

use crate::logs::LogSink;

const MAX_TRANSIENT_RETRIES: u32 = 10;
const MAX_BACKOFF_FACTOR: u32 = 10;
const LOG_TAIL_LINES: i64 = 80;

/// Terminal classification produced by one evaluation pass.
struct Terminal {
    outcome: StepOutcome,
    message: String,
    with_init_logs: bool,
}

pub struct StepPoller {
    cluster: Arc<dyn ClusterOps>,
    logs: Arc<dyn LogSink>,
    cancel: CancellationToken,
    namespace: String,
    stage: String,
    step: String,
    workload_kind: Kind,
    workload_name: String,
    pod_selector: Selector,
    poll_interval: Duration,
    budget: Duration,
    backoff_limit: u32,
    expected_replicas: i32,
}

impl StepPoller {
    pub fn new(
        cluster: Arc<dyn ClusterOps>,
        logs: Arc<dyn LogSink>,
        cancel: CancellationToken,
        workflow: &str,
        namespace: &str,
        step: &Step,
        bundle: &StepBundle,
    ) -> Self {
        let (backoff_limit, expected_replicas) = match &step.kind {
            StepKind::Task { backoff_limit } => (*backoff_limit, 1),
            StepKind::Service(svc) => (0, svc.replicas as i32),
        };
        Self {
            cluster,
            logs,
            cancel,
            namespace: namespace.to_string(),
            stage: bundle.stage.clone(),
            step: step.name.clone(),
            workload_kind: bundle.workload_kind(),
            workload_name: bundle.workload_name(),
            pod_selector: bundle.pod_selector(workflow),
            poll_interval: step.poll_interval(),
            budget: step.budget(),
            backoff_limit,
            expected_replicas,
        }
    }

    /// Drive the step to a terminal outcome.
    pub async fn run(self) -> StepReport {
        let started = Instant::now();
        let deadline = started + self.budget;
        let mut state = StepState::Pending;
        let mut transient_errors: u32 = 0;

        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        let mut watch = self.open_watch().await;

        loop {
            // Biased: cancellation wins, and a poll landing exactly on the
            // deadline still gets evaluated (the timeout is inclusive).
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(step = %self.step, "poller stopping on cancellation");
                    return self.report(StepOutcome::Cancelled, Some("cancelled".to_string()), None);
                }
                event = next_event(&mut watch) => {
                    match event {
                        // An event is only a hint; the evaluation below
                        // re-reads authoritative status.
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            debug!(step = %self.step, %err, "watch stream error, falling back to polling");
                            watch = None;
                        }
                        None => watch = None,
                    }
                }
                _ = interval.tick() => {}
                _ = time::sleep_until(deadline) => {
                    let logs = self.capture_logs(false).await;
                    let message = format!(
                        "{} {:?} did not reach a terminal state within {}s",
                        self.workload_kind,
                        self.workload_name,
                        self.budget.as_secs()
                    );
                    return self.report(StepOutcome::TimedOut, Some(message), logs);
                }
            }

            match self.evaluate(&mut state).await {
                Ok(Some(terminal)) => {
                    let logs = if terminal.outcome == StepOutcome::Succeeded {
                        None
                    } else {
                        self.capture_logs(terminal.with_init_logs).await
                    };
                    return self.report(terminal.outcome, Some(terminal.message), logs);
                }
                Ok(None) => transient_errors = 0,
                Err(err) if err.is_transient() && transient_errors < MAX_TRANSIENT_RETRIES => {
                    transient_errors += 1;
                    let delay = self.poll_interval * transient_errors.min(MAX_BACKOFF_FACTOR);
                    warn!(
                        step = %self.step,
                        attempt = transient_errors,
                        delay_secs = delay.as_secs(),
                        %err,
                        "transient cluster error while polling, backing off"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            return self.report(
                                StepOutcome::Cancelled,
                                Some("cancelled".to_string()),
                                None,
                            );
                        }
                        _ = time::sleep(delay) => {}
                    }
                }
                Err(err) => {
                    let message = format!("cluster error while polling: {err}");
                    return self.report(StepOutcome::Failed, Some(message), None);
                }
            }

            if watch.is_none() {
                watch = self.open_watch().await;
            }
        }
    }

    async fn open_watch(&self) -> Option<ObjectStream> {
        match self
            .cluster
            .watch(Kind::Pod, &self.namespace, &self.pod_selector)
            .await
        {
            Ok(stream) => Some(stream),
            Err(err) => {
                debug!(step = %self.step, %err, "could not open watch, relying on polling");
                None
            }
        }
    }

    /// One evaluation pass: read the workload and its pods, classify.
    async fn evaluate(&self, state: &mut StepState) -> Result<Option<Terminal>, ClusterError> {
        let workload = self
            .cluster
            .get(self.workload_kind, &self.namespace, &self.workload_name)
            .await?;
        let pods = self
            .cluster
            .list(Kind::Pod, &self.namespace, &self.pod_selector)
            .await?;

        for object in &pods {
            if let Some(pod) = object.as_pod() {
                if let Some(terminal) = classify_pod(pod, self.backoff_limit) {
                    return Ok(Some(terminal));
                }
            }
        }

        self.transition(state, observed_state(&pods));

        let Some(workload) = workload else {
            // Ensure has returned, so absence is a freshly-created object
            // the API has not surfaced yet; retry on the next tick.
            return Ok(None);
        };

        match self.workload_kind {
            Kind::Job => Ok(classify_job(&workload, self.backoff_limit)),
            Kind::Deployment => Ok(classify_deployment(&workload, self.expected_replicas)),
            other => Err(ClusterError::Api {
                status: 500,
                message: format!("poller cannot watch workload kind {other}"),
            }),
        }
    }

    fn transition(&self, state: &mut StepState, observed: StepState) {
        if *state != observed {
            info!(
                step = %self.step,
                stage = %self.stage,
                from = ?*state,
                to = ?observed,
                "step state changed"
            );
            *state = observed;
        }
    }

    /// Read the tail of the first pod's logs into the step's slot.
    async fn capture_logs(&self, with_init: bool) -> Option<String> {
        let pods = self
            .cluster
            .list(Kind::Pod, &self.namespace, &self.pod_selector)
            .await
            .ok()?;
        let pod = pods.first()?;

        let mut captured = String::new();
        if with_init {
            if let Ok(init_logs) = self
                .cluster
                .pod_logs(&self.namespace, pod.name(), Some(INIT_CONTAINER_NAME), LOG_TAIL_LINES)
                .await
            {
                captured.push_str(&init_logs);
            }
        }
        if let Ok(user_logs) = self
            .cluster
            .pod_logs(&self.namespace, pod.name(), Some(CONTAINER_NAME), LOG_TAIL_LINES)
            .await
        {
            captured.push_str(&user_logs);
        }

        if captured.is_empty() {
            return None;
        }
        self.logs.record(&self.step, &captured);
        self.logs.get(&self.step)
    }

    fn report(
        &self,
        outcome: StepOutcome,
        message: Option<String>,
        logs: Option<String>,
    ) -> StepReport {
        StepReport {
            stage: self.stage.clone(),
            step: self.step.clone(),
            workload: self.workload_name.clone(),
            outcome,
            message,
            logs,
        }
    }
}

async fn next_event(
    watch: &mut Option<ObjectStream>,
) -> Option<Result<Object, ClusterError>> {
    match watch {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

fn observed_state(pods: &[Object]) -> StepState {
    let mut observed = StepState::Pending;
    for object in pods {
        let Some(pod) = object.as_pod() else { continue };
        let phase = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("Pending");
        if phase == "Running" || phase == "Succeeded" {
            return StepState::Running;
        }
        observed = StepState::Installing;
    }
    observed
}

/// Pod-level failures that terminate the step regardless of workload
/// status: failed init containers, crash loops, dead image references.
fn classify_pod(pod: &Pod, backoff_limit: u32) -> Option<Terminal> {
    let status = pod.status.as_ref()?;

    for init in status.init_container_statuses.iter().flatten() {
        if let Some(terminated) = init.state.as_ref().and_then(|s| s.terminated.as_ref()) {
            if terminated.exit_code != 0 {
                return Some(Terminal {
                    outcome: StepOutcome::Failed,
                    message: format!(
                        "init container failed with exit code {}",
                        terminated.exit_code
                    ),
                    with_init_logs: true,
                });
            }
        }
        if waiting_reason(init) == Some("ImagePullBackOff") {
            return Some(Terminal {
                outcome: StepOutcome::Failed,
                message: "init container image cannot be pulled".to_string(),
                with_init_logs: true,
            });
        }
    }

    for container in status.container_statuses.iter().flatten() {
        match waiting_reason(container) {
            Some("ImagePullBackOff") => {
                return Some(Terminal {
                    outcome: StepOutcome::Failed,
                    message: format!("image for container {:?} cannot be pulled", container.name),
                    with_init_logs: false,
                });
            }
            Some("CrashLoopBackOff") if container.restart_count >= backoff_limit as i32 + 1 => {
                return Some(Terminal {
                    outcome: StepOutcome::Failed,
                    message: format!(
                        "container {:?} is crash looping ({} restarts)",
                        container.name, container.restart_count
                    ),
                    with_init_logs: false,
                });
            }
            _ => {}
        }
    }

    None
}

fn waiting_reason(status: &k8s_openapi::api::core::v1::ContainerStatus) -> Option<&str> {
    status
        .state
        .as_ref()
        .and_then(|s| s.waiting.as_ref())
        .and_then(|w| w.reason.as_deref())
}

fn classify_job(workload: &Object, backoff_limit: u32) -> Option<Terminal> {
    let job = workload.as_job()?;
    let status = job.status.as_ref()?;

    if status.succeeded.unwrap_or(0) >= 1 {
        return Some(Terminal {
            outcome: StepOutcome::Succeeded,
            message: "job completed".to_string(),
            with_init_logs: false,
        });
    }

    let failed_condition = status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "Failed" && c.status == "True");
    if failed_condition || status.failed.unwrap_or(0) >= backoff_limit as i32 + 1 {
        return Some(Terminal {
            outcome: StepOutcome::Failed,
            message: format!("job failed after {} pod failure(s)", status.failed.unwrap_or(0)),
            with_init_logs: false,
        });
    }

    None
}

fn classify_deployment(workload: &Object, expected_replicas: i32) -> Option<Terminal> {
    let deployment = workload.as_deployment()?;
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    (available >= expected_replicas).then(|| Terminal {
        outcome: StepOutcome::Succeeded,
        message: format!("{available} replica(s) available"),
        with_init_logs: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{Job, JobStatus};
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateTerminated, ContainerStateWaiting, ContainerStatus,
        PodStatus,
    };

    fn job_with_status(status: JobStatus) -> Object {
        Object::Job(Job { status: Some(status), ..Default::default() })
    }

    fn container_status(
        restarts: i32,
        waiting: Option<&str>,
        exit_code: Option<i32>,
    ) -> ContainerStatus {
        ContainerStatus {
            name: "bosun".to_string(),
            restart_count: restarts,
            state: Some(ContainerState {
                waiting: waiting.map(|reason| ContainerStateWaiting {
                    reason: Some(reason.to_string()),
                    ..Default::default()
                }),
                terminated: exit_code.map(|code| ContainerStateTerminated {
                    exit_code: code,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_job_succeeded() {
        let job = job_with_status(JobStatus { succeeded: Some(1), ..Default::default() });
        let terminal = classify_job(&job, 0).unwrap();
        assert_eq!(terminal.outcome, StepOutcome::Succeeded);
    }

    #[test]
    fn test_job_failed_respects_backoff_limit() {
        let one_failure = job_with_status(JobStatus { failed: Some(1), ..Default::default() });
        // backoff_limit=0: the first pod failure is terminal
        assert!(classify_job(&one_failure, 0).is_some());
        // backoff_limit=2: two failures still leave retries
        assert!(classify_job(&one_failure, 2).is_none());
    }

    #[test]
    fn test_job_active_is_not_terminal() {
        let job = job_with_status(JobStatus { active: Some(1), ..Default::default() });
        assert!(classify_job(&job, 0).is_none());
    }

    #[test]
    fn test_deployment_available() {
        let deployment = Object::Deployment(k8s_openapi::api::apps::v1::Deployment {
            status: Some(k8s_openapi::api::apps::v1::DeploymentStatus {
                available_replicas: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(classify_deployment(&deployment, 2).is_some());
        assert!(classify_deployment(&deployment, 3).is_none());
    }

    #[test]
    fn test_init_failure_classified() {
        let pod = Pod {
            status: Some(PodStatus {
                init_container_statuses: Some(vec![container_status(0, None, Some(2))]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let terminal = classify_pod(&pod, 0).unwrap();
        assert_eq!(terminal.outcome, StepOutcome::Failed);
        assert!(terminal.with_init_logs);
    }

    #[test]
    fn test_crash_loop_honors_backoff_limit() {
        let pod = Pod {
            status: Some(PodStatus {
                container_statuses: Some(vec![container_status(
                    1,
                    Some("CrashLoopBackOff"),
                    None,
                )]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(classify_pod(&pod, 0).is_some());
        assert!(classify_pod(&pod, 3).is_none());
    }

    #[test]
    fn test_image_pull_backoff_is_terminal() {
        let pod = Pod {
            status: Some(PodStatus {
                container_statuses: Some(vec![container_status(
                    0,
                    Some("ImagePullBackOff"),
                    None,
                )]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(classify_pod(&pod, 0).is_some());
    }

    #[test]
    fn test_observed_state() {
        assert_eq!(observed_state(&[]), StepState::Pending);

        let pending = Object::Pod(Pod {
            status: Some(PodStatus { phase: Some("Pending".to_string()), ..Default::default() }),
            ..Default::default()
        });
        assert_eq!(observed_state(&[pending.clone()]), StepState::Installing);

        let running = Object::Pod(Pod {
            status: Some(PodStatus { phase: Some("Running".to_string()), ..Default::default() }),
            ..Default::default()
        });
        assert_eq!(observed_state(&[pending, running]), StepState::Running);
    }
}
