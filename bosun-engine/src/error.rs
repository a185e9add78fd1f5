//! Engine error kinds
//!
//! The poller normalizes raw status into step outcomes, the executor
//! aggregates them into these kinds, and only the CLI's outer frame turns
//! a kind into a user-visible message and exit code.

use thiserror::Error;

use bosun_core::domain::outcome::{StepOutcome, StepReport};
use bosun_core::error::{ConfigError, SourceError};
use bosun_k8s::ClusterError;

/// Errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Config malformed, names colliding, files missing
    #[error(transparent)]
    Validation(#[from] ConfigError),

    /// Repository fetch problems (bad url, 401/404 on download)
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Something that must hold before stage 1 does not
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The cluster rejected or dropped a request
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// One or more steps of a stage failed
    #[error("{0}")]
    StepFailure(StageFailure),

    /// Every failing step of the stage ran out of its time budget
    #[error("{0}")]
    Timeout(StageFailure),

    /// The operator interrupted the run
    #[error("workflow execution cancelled")]
    Cancelled,

    /// Task panics and other should-not-happen conditions
    #[error("internal error: {0}")]
    Internal(String),
}

/// Aggregate failure of one stage, naming every failed step.
#[derive(Debug)]
pub struct StageFailure {
    pub workflow: String,
    pub stage: String,
    pub reports: Vec<StepReport>,
}

impl StageFailure {
    pub fn all_timed_out(&self) -> bool {
        self.reports
            .iter()
            .all(|r| r.outcome == StepOutcome::TimedOut)
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.reports.iter().map(|r| r.step.as_str()).collect();
        write!(
            f,
            "stage {:?} of workflow {:?} aborted; failed step(s): {}",
            self.stage,
            self.workflow,
            names.join(", ")
        )?;
        for report in &self.reports {
            write!(f, "\n\nstep={} ({})", report.step, report.outcome)?;
            if let Some(message) = &report.message {
                write!(f, ": {message}")?;
            }
            if let Some(logs) = &report.logs {
                if !logs.is_empty() {
                    write!(f, "\nlogs:\n{logs}")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(step: &str, outcome: StepOutcome) -> StepReport {
        StepReport {
            stage: "train".to_string(),
            step: step.to_string(),
            workload: format!("wf-train-{step}"),
            outcome,
            message: Some("pod failed".to_string()),
            logs: Some("Traceback: boom".to_string()),
        }
    }

    #[test]
    fn test_failure_names_every_step() {
        let failure = StageFailure {
            workflow: "wf".to_string(),
            stage: "train".to_string(),
            reports: vec![report("deepar", StepOutcome::Failed)],
        };
        let rendered = failure.to_string();
        assert!(rendered.contains("deepar"));
        assert!(rendered.contains("Traceback: boom"));
    }

    #[test]
    fn test_all_timed_out() {
        let mixed = StageFailure {
            workflow: "wf".to_string(),
            stage: "train".to_string(),
            reports: vec![
                report("a", StepOutcome::TimedOut),
                report("b", StepOutcome::Failed),
            ],
        };
        assert!(!mixed.all_timed_out());

        let pure = StageFailure {
            workflow: "wf".to_string(),
            stage: "train".to_string(),
            reports: vec![report("a", StepOutcome::TimedOut)],
        };
        assert!(pure.all_timed_out());
    }
}
