//! Workflow domain types
//!
//! The validated, fully-defaulted in-memory model produced by the config
//! loader. Stages run strictly in order; the steps inside one stage run in
//! parallel.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::source::SourceRef;

/// A named unit of execution: an ordered list of stages plus the source
/// repository they are built from. Identity is `(namespace, name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub namespace: String,
    /// Free-form version string from the config file; mismatches with the
    /// CLI version are surfaced as a warning, never an error.
    pub version: String,
    pub source: SourceRef,
    pub stages: Vec<Stage>,
}

impl Workflow {
    /// All steps across all stages, in execution order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.stages.iter().flat_map(|s| s.steps.iter())
    }
}

/// An ordered group of steps executed in parallel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub steps: Vec<Step>,
}

/// One unit of compute within a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// Path to the `.py` or `.ipynb` module inside the repository.
    pub executable: String,
    /// Path to the pip requirements file inside the repository.
    pub dependencies: String,
    /// Container image override; the public client image when `None`.
    pub image: Option<String>,
    /// Replaces the canonical launcher command when set.
    pub command: Option<Vec<String>>,
    pub envs: BTreeMap<String, String>,
    /// Opaque secrets whose data fields are injected as env variables.
    pub secrets: Vec<String>,
    /// Fractional cores, e.g. `0.5`.
    pub cpu_request: f64,
    /// Mebibytes.
    pub memory_request: u64,
    /// Seconds until the step is declared `TimedOut`.
    pub timeout: u64,
    /// Seconds between status polls.
    pub polling_time: u64,
    /// Seconds of grace before monitoring starts counting.
    pub wait_before_start_time: u64,
    pub kind: StepKind,
}

/// Discriminates run-to-completion steps from long-lived ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepKind {
    /// Produces a Job.
    Task { backoff_limit: u32 },
    /// Produces a Deployment plus a Service, optionally an Ingress.
    Service(ServiceStep),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStep {
    pub replicas: u32,
    pub revision_history_limit: u32,
    pub min_ready_seconds: u32,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub port: u16,
    pub ingress: bool,
    /// Overrides `timeout` for the rollout wait when set.
    pub max_startup_time: Option<u64>,
}

impl Step {
    pub fn is_service(&self) -> bool {
        matches!(self.kind, StepKind::Service(_))
    }

    /// Client-side wall-clock budget: timeout plus the warm-up grace,
    /// with the service-specific startup override applied when present.
    pub fn budget(&self) -> Duration {
        let timeout = match &self.kind {
            StepKind::Service(svc) => svc.service.max_startup_time.unwrap_or(self.timeout),
            StepKind::Task { .. } => self.timeout,
        };
        Duration::from_secs(timeout + self.wait_before_start_time)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling_time)
    }
}
