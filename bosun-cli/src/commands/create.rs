//! Create command handlers
//!
//! `create workflow` runs the workflow to completion with the CLI acting as
//! the controller; `create cw` materializes a CronJob that re-enters the
//! CLI on schedule; `create secret` manages opaque and docker-registry
//! secrets, optionally bound to a workflow's lifecycle.

use std::collections::BTreeMap;

use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};
use colored::Colorize;

use bosun_core::domain::workflow::Workflow;
use bosun_core::names;
use bosun_core::schedule::validate_schedule;
use bosun_engine::EngineError;
use bosun_k8s::bundle::{
    self, repo_secret_name, DOCKER_SECRET_TYPE, OPAQUE_SECRET_TYPE,
};
use bosun_k8s::{ClusterOps, Kind};

use super::common::{self, parse_key_val, WorkflowArgs};
use crate::output;
use crate::{DEFAULT_NAMESPACE, VERSION};

/// Create subcommands
#[derive(Subcommand)]
pub enum CreateCommands {
    /// Create a workflow and run its stages to completion
    #[command(visible_alias = "w")]
    Workflow(WorkflowArgs),
    /// Create a scheduled workflow backed by a CronJob
    #[command(name = "cw")]
    Cw(CronWorkflowArgs),
    /// Create a secret
    Secret(SecretArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CronWorkflowArgs {
    #[command(flatten)]
    pub workflow: WorkflowArgs,

    /// Five-field cron schedule, e.g. "0 12 * * *"
    #[arg(short = 's', long)]
    pub schedule: String,
}

#[derive(Args, Debug, Clone)]
pub struct SecretArgs {
    /// Name of the secret
    pub name: String,

    /// Data fields as KEY=value pairs
    #[arg(value_parser = parse_key_val)]
    pub data: Vec<(String, String)>,

    /// Namespace to put the secret in
    #[arg(short = 'n', long, visible_alias = "ns", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Bind the secret to a workflow so it is swept with it
    #[arg(short = 'w', long)]
    pub workflow: Option<String>,

    /// Type of the secret
    #[arg(long = "type", value_enum, default_value_t = SecretType::Opaque)]
    pub secret_type: SecretType,

    /// Registry server (docker-registry secrets)
    #[arg(long)]
    pub docker_server: Option<String>,

    /// Registry username (docker-registry secrets)
    #[arg(long)]
    pub docker_username: Option<String>,

    /// Registry password (docker-registry secrets)
    #[arg(long)]
    pub docker_password: Option<String>,

    /// Registry email (docker-registry secrets)
    #[arg(long)]
    pub docker_email: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SecretType {
    Opaque,
    DockerRegistry,
}

/// Handle create commands
pub async fn handle_create_command(command: CreateCommands) -> Result<()> {
    match command {
        CreateCommands::Workflow(args) => create_workflow(args).await,
        CreateCommands::Cw(args) => create_cron_workflow(args).await,
        CreateCommands::Secret(args) => create_secret(args).await,
    }
}

async fn create_workflow(mut args: WorkflowArgs) -> Result<()> {
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

    if common::workflow_exists(cluster.as_ref(), &workflow.namespace, &workflow.name).await? {
        return Err(EngineError::Precondition(format!(
            "workflow {} already exists in {} namespace",
            workflow.name, workflow.namespace
        ))
        .into());
    }

    let run = common::execute(&workflow, &archive, cluster).await?;
    output::print_run_summary(&run);
    Ok(())
}

async fn create_cron_workflow(mut args: CronWorkflowArgs) -> Result<()> {
    args.workflow.normalize();
    validate_schedule(&args.schedule)?;
    let source = common::parse_source(&args.workflow, false)?;

    if args.workflow.check {
        let (workflow, _) = common::resolve_workflow(&args.workflow, &source, None).await?;
        println!(
            "{}",
            format!("✓ config for cron workflow {} is valid", workflow.name).green().bold()
        );
        return Ok(());
    }

    let cluster = common::connect().await?;
    let (workflow, _archive) =
        common::resolve_workflow(&args.workflow, &source, Some(cluster.as_ref())).await?;

    if common::workflow_exists(cluster.as_ref(), &workflow.namespace, &workflow.name).await? {
        return Err(EngineError::Precondition(format!(
            "cron workflow {} already exists in {} namespace",
            workflow.name, workflow.namespace
        ))
        .into());
    }

    ensure_cron_runner(cluster.as_ref(), &workflow, &args.schedule, &args.workflow.file).await?;

    println!("{}", "✓ cron workflow created".green().bold());
    println!("  Name:      {}", workflow.name.bold());
    println!("  Namespace: {}", workflow.namespace.as_str().cyan());
    println!("  Schedule:  {}", args.schedule.as_str().cyan());
    Ok(())
}

/// Namespace, repo secret and CronJob for a scheduled workflow.
pub(super) async fn ensure_cron_runner(
    cluster: &dyn ClusterOps,
    workflow: &Workflow,
    schedule: &str,
    file: &str,
) -> Result<()> {
    if cluster
        .get(Kind::Namespace, "", &workflow.namespace)
        .await?
        .is_none()
    {
        cluster
            .ensure(bundle::namespace_object(&workflow.namespace))
            .await?;
    }

    let repo_secret = bundle::repo_secret_object(
        &workflow.name,
        &workflow.namespace,
        &workflow.source,
    );
    let secret_name = repo_secret.as_ref().map(|_| repo_secret_name(&workflow.name));
    if let Some(secret) = repo_secret {
        cluster.ensure(secret).await?;
    }

    cluster
        .ensure(bundle::cron_runner_object(
            &workflow.name,
            &workflow.namespace,
            schedule,
            &workflow.source,
            file,
            VERSION,
            secret_name.as_deref(),
        ))
        .await?;
    Ok(())
}

async fn create_secret(args: SecretArgs) -> Result<()> {
    let name = names::normalize(&args.name);
    let namespace = names::normalize(&args.namespace);

    let cluster = common::connect().await?;
    if cluster.get(Kind::Secret, &namespace, &name).await?.is_some() {
        return Err(EngineError::Precondition(format!(
            "secret {name} already exists in {namespace} namespace"
        ))
        .into());
    }

    if cluster.get(Kind::Namespace, "", &namespace).await?.is_none() {
        cluster.ensure(bundle::namespace_object(&namespace)).await?;
    }

    let object = build_secret(&name, &namespace, &args)?;
    cluster.ensure(object).await?;

    println!(
        "{}",
        format!("✓ secret {name} created in {namespace} namespace").green().bold()
    );
    Ok(())
}

/// Build the secret object from CLI arguments.
pub(super) fn build_secret(
    name: &str,
    namespace: &str,
    args: &SecretArgs,
) -> Result<bosun_k8s::Object> {
    let workflow = args.workflow.as_deref().map(names::normalize);

    let (data, secret_type) = match args.secret_type {
        SecretType::Opaque => {
            if args.data.is_empty() {
                anyhow::bail!("an opaque secret needs at least one KEY=value pair");
            }
            let data: BTreeMap<String, String> = args.data.iter().cloned().collect();
            (data, OPAQUE_SECRET_TYPE)
        }
        SecretType::DockerRegistry => {
            let (server, username, password) = match (
                args.docker_server.as_deref(),
                args.docker_username.as_deref(),
                args.docker_password.as_deref(),
            ) {
                (Some(server), Some(username), Some(password)) => (server, username, password),
                _ => anyhow::bail!(
                    "docker-registry secrets need --docker-server, --docker-username \
                     and --docker-password"
                ),
            };
            let mut auth = serde_json::json!({
                "username": username,
                "password": password,
            });
            if let Some(email) = &args.docker_email {
                auth["email"] = serde_json::json!(email);
            }
            let config = serde_json::json!({ "auths": { server: auth } });
            let data = BTreeMap::from([(".dockerconfigjson".to_string(), config.to_string())]);
            (data, DOCKER_SECRET_TYPE)
        }
    };

    Ok(bundle::secret_object(
        name,
        namespace,
        data,
        workflow.as_deref(),
        secret_type,
    ))
}
