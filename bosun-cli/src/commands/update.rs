//! Update command handlers
//!
//! Update is replace-by-name: the workflow is re-validated and re-executed
//! with `Ensure` semantics (deployments roll, stale jobs are replaced). A
//! cron workflow keeps its existing schedule unless a new one is given.
//! Secret updates merge new fields over the existing data.

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;

use bosun_core::names;
use bosun_core::schedule::validate_schedule;
use bosun_engine::EngineError;
use bosun_k8s::{ClusterOps, Kind, Object, Selector};

use super::common::{self, WorkflowArgs};
use super::create::{build_secret, ensure_cron_runner, SecretArgs};
use crate::output;

/// Update subcommands
#[derive(Subcommand)]
pub enum UpdateCommands {
    /// Re-validate and re-run an existing workflow
    #[command(visible_alias = "w")]
    Workflow(WorkflowArgs),
    /// Update a scheduled workflow (keeps the schedule unless given)
    #[command(name = "cw")]
    Cw(UpdateCronArgs),
    /// Merge new data fields into an existing secret
    Secret(SecretArgs),
}

#[derive(Args, Debug, Clone)]
pub struct UpdateCronArgs {
    #[command(flatten)]
    pub workflow: WorkflowArgs,

    /// Five-field cron schedule; the existing one is kept when omitted
    #[arg(short = 's', long)]
    pub schedule: Option<String>,
}

/// Handle update commands
pub async fn handle_update_command(command: UpdateCommands) -> Result<()> {
    match command {
        UpdateCommands::Workflow(args) => update_workflow(args).await,
        UpdateCommands::Cw(args) => update_cron_workflow(args).await,
        UpdateCommands::Secret(args) => update_secret(args).await,
    }
}

async fn update_workflow(mut args: WorkflowArgs) -> Result<()> {
    args.normalize();
    let source = common::parse_source(&args, false)?;

    if args.check {
        let (workflow, _) = common::resolve_workflow(&args, &source, None).await?;
        println!(
            "{}",
            format!("✓ config for workflow {} is valid", workflow.name).green().bold()
        );
        return Ok(());
    }

    let cluster = common::connect().await?;
    let (workflow, archive) =
        common::resolve_workflow(&args, &source, Some(cluster.as_ref())).await?;

    if !common::workflow_exists(cluster.as_ref(), &workflow.namespace, &workflow.name).await? {
        return Err(EngineError::Precondition(format!(
            "no workflow {} exists in {} namespace",
            workflow.name, workflow.namespace
        ))
        .into());
    }

    let run = common::execute(&workflow, &archive, cluster).await?;
    output::print_run_summary(&run);
    Ok(())
}

async fn update_cron_workflow(mut args: UpdateCronArgs) -> Result<()> {
    args.workflow.normalize();
    if let Some(schedule) = &args.schedule {
        validate_schedule(schedule)?;
    }
    let source = common::parse_source(&args.workflow, false)?;

    let cluster = common::connect().await?;
    let (workflow, _archive) =
        common::resolve_workflow(&args.workflow, &source, Some(cluster.as_ref())).await?;

    if !common::cron_exists(cluster.as_ref(), &workflow.namespace, &workflow.name).await? {
        return Err(EngineError::Precondition(format!(
            "no cron workflow {} exists in {} namespace",
            workflow.name, workflow.namespace
        ))
        .into());
    }

    let schedule = match args.schedule {
        Some(schedule) => schedule,
        None => existing_schedule(cluster.as_ref(), &workflow.namespace, &workflow.name).await?,
    };

    ensure_cron_runner(cluster.as_ref(), &workflow, &schedule, &args.workflow.file).await?;

    println!("{}", "✓ cron workflow updated".green().bold());
    println!("  Name:     {}", workflow.name.bold());
    println!("  Schedule: {}", schedule.as_str().cyan());
    Ok(())
}

async fn existing_schedule(
    cluster: &dyn ClusterOps,
    namespace: &str,
    workflow: &str,
) -> Result<String> {
    let crons = cluster
        .list(Kind::CronJob, namespace, &Selector::workflow(workflow))
        .await?;
    crons
        .first()
        .and_then(|object| object.as_cron_job())
        .and_then(|cron| cron.spec.as_ref())
        .map(|spec| spec.schedule.clone())
        .ok_or_else(|| {
            EngineError::Precondition(format!(
                "cron workflow {workflow} in {namespace} namespace has no schedule"
            ))
            .into()
        })
}

async fn update_secret(args: SecretArgs) -> Result<()> {
    let name = names::normalize(&args.name);
    let namespace = names::normalize(&args.namespace);

    let cluster = common::connect().await?;
    let Some(existing) = cluster.get(Kind::Secret, &namespace, &name).await? else {
        return Err(EngineError::Precondition(format!(
            "secret {name} does not exist in {namespace} namespace"
        ))
        .into());
    };

    let mut args = args;
    // Keep the existing workflow binding unless a new one was given.
    if args.workflow.is_none() {
        args.workflow = existing.label("workflow").map(String::from);
    }

    let mut object = build_secret(&name, &namespace, &args)?;
    // Carry the live base64 data forward; stringData wins on overlapping
    // keys at write time, which gives merge semantics without decoding.
    if let (Object::Secret(replacement), Some(live)) = (&mut object, existing.as_secret()) {
        replacement.data = live.data.clone();
    }
    cluster.ensure(object).await?;

    println!(
        "{}",
        format!("✓ secret {name} updated in {namespace} namespace").green().bold()
    );
    Ok(())
}
