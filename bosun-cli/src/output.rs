//! Human-readable output for get commands and run summaries

use colored::Colorize;
use tabled::{Table, Tabled};

use bosun_core::domain::outcome::{Run, StepOutcome};
use bosun_k8s::{Object, STAGE_LABEL, STEP_LABEL, WORKFLOW_LABEL};

#[derive(Tabled)]
pub struct StepRow {
    pub namespace: String,
    pub workflow: String,
    pub stage: String,
    pub step: String,
    pub kind: String,
    pub name: String,
    pub status: String,
    pub executable: String,
}

#[derive(Tabled)]
pub struct WorkflowRow {
    pub namespace: String,
    pub name: String,
    pub url: String,
}

#[derive(Tabled)]
pub struct CronRow {
    pub namespace: String,
    pub name: String,
    pub schedule: String,
    pub url: String,
}

#[derive(Tabled)]
pub struct SecretRow {
    pub namespace: String,
    pub name: String,
    pub workflow: String,
    pub keys: String,
}

/// Row for one step workload; `None` for objects without a workflow label.
pub fn step_row(object: &Object) -> Option<StepRow> {
    let workflow = object.label(WORKFLOW_LABEL)?;
    Some(StepRow {
        namespace: object.namespace().to_string(),
        workflow: workflow.to_string(),
        stage: object.label(STAGE_LABEL).unwrap_or("-").to_string(),
        step: object.label(STEP_LABEL).unwrap_or("-").to_string(),
        kind: object.kind().to_string(),
        name: object.name().to_string(),
        status: workload_status(object),
        executable: object.annotation("executable").unwrap_or("-").to_string(),
    })
}

/// Coarse display status of a Job or Deployment.
pub fn workload_status(object: &Object) -> String {
    match object {
        Object::Job(job) => {
            let Some(status) = job.status.as_ref() else {
                return "Pending".to_string();
            };
            if status.succeeded.unwrap_or(0) >= 1 {
                "Succeeded".to_string()
            } else if status.failed.unwrap_or(0) >= 1 {
                "Failed".to_string()
            } else if status.active.unwrap_or(0) >= 1 {
                "Active".to_string()
            } else {
                "Pending".to_string()
            }
        }
        Object::Deployment(deployment) => {
            let desired = deployment
                .spec
                .as_ref()
                .and_then(|spec| spec.replicas)
                .unwrap_or(1);
            let available = deployment
                .status
                .as_ref()
                .and_then(|status| status.available_replicas)
                .unwrap_or(0);
            if available >= desired {
                "Available".to_string()
            } else {
                format!("Rollout {available}/{desired}")
            }
        }
        _ => "-".to_string(),
    }
}

/// Print rows as a table, or a dimmed notice when there is nothing to show.
pub fn print_table<T: Tabled>(rows: Vec<T>, empty_message: &str) {
    if rows.is_empty() {
        println!("{}", empty_message.yellow());
    } else {
        println!("{}", Table::new(rows));
    }
}

/// Summary printed after a successful run.
pub fn print_run_summary(run: &Run) {
    println!(
        "{}",
        format!("✓ workflow {} completed successfully", run.workflow).green().bold()
    );
    println!("  Namespace: {}", run.namespace.as_str().cyan());
    println!("  Started:   {}", run.started_at.format("%Y-%m-%d %H:%M:%S"));
    for report in &run.reports {
        let outcome = match report.outcome {
            StepOutcome::Succeeded => report.outcome.to_string().green(),
            StepOutcome::Failed | StepOutcome::TimedOut => report.outcome.to_string().red(),
            StepOutcome::Cancelled => report.outcome.to_string().yellow(),
        };
        println!(
            "  {} {}/{} [{}] {}",
            "▸".cyan(),
            report.stage,
            report.step.bold(),
            outcome,
            report.workload.as_str().dimmed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{Job, JobStatus};

    #[test]
    fn test_job_status_display() {
        let job = |status: JobStatus| Object::Job(Job { status: Some(status), ..Default::default() });
        assert_eq!(
            workload_status(&job(JobStatus { succeeded: Some(1), ..Default::default() })),
            "Succeeded"
        );
        assert_eq!(
            workload_status(&job(JobStatus { failed: Some(1), ..Default::default() })),
            "Failed"
        );
        assert_eq!(
            workload_status(&job(JobStatus { active: Some(1), ..Default::default() })),
            "Active"
        );
    }
}
