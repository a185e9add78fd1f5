//! Step outcome types
//!
//! The poller normalizes raw Kubernetes status into these values; the
//! executor aggregates them per stage; the CLI turns them into messages and
//! exit codes. Nothing here is persisted; a `Run` lives only as long as
//! the process that created it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Observable state of an in-flight step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepState {
    /// Submitted, no pod observed yet.
    Pending,
    /// A pod exists and is still within the warm-up window or running its
    /// init container.
    Installing,
    /// The user container is running.
    Running,
}

/// Terminal outcome of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    Succeeded,
    Failed,
    TimedOut,
    /// The poller was asked to stop before the step reached a terminal
    /// Kubernetes state.
    Cancelled,
}

impl StepOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, StepOutcome::Succeeded)
    }
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StepOutcome::Succeeded => "Succeeded",
            StepOutcome::Failed => "Failed",
            StepOutcome::TimedOut => "TimedOut",
            StepOutcome::Cancelled => "Cancelled",
        };
        f.write_str(label)
    }
}

/// Per-step result collected at the stage barrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub stage: String,
    pub step: String,
    /// Name of the Job or Deployment backing the step.
    pub workload: String,
    pub outcome: StepOutcome,
    /// Human-readable diagnostic for non-success outcomes.
    pub message: Option<String>,
    /// Tail of the pod logs captured on failure.
    pub logs: Option<String>,
}

/// In-memory record of one workflow execution.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: Uuid,
    pub workflow: String,
    pub namespace: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// True when this run created the namespace (and may drop it again).
    pub namespace_created: bool,
    pub reports: Vec<StepReport>,
}

impl Run {
    pub fn new(workflow: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow: workflow.into(),
            namespace: namespace.into(),
            started_at: chrono::Utc::now(),
            namespace_created: false,
            reports: Vec::new(),
        }
    }

    pub fn failed_reports(&self) -> impl Iterator<Item = &StepReport> {
        self.reports
            .iter()
            .filter(|r| !r.outcome.is_success())
    }
}
