//! Get command handlers
//!
//! Read-only views over the labelled cluster objects: the steps of one
//! workflow (optionally with pod logs), the workflows and cron workflows of
//! a namespace, and its secrets.

use std::collections::BTreeMap;

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;

use bosun_core::names;
use bosun_k8s::bundle::CONTAINER_NAME;
use bosun_k8s::{ClusterOps, Kind, Selector, WORKFLOW_LABEL};

use super::common;
use crate::output::{self, CronRow, SecretRow, WorkflowRow};
use crate::DEFAULT_NAMESPACE;

const LOG_TAIL_LINES: i64 = 200;

/// Get subcommands
#[derive(Subcommand)]
pub enum GetCommands {
    /// Show the steps of one workflow
    #[command(visible_alias = "w")]
    Workflow(GetWorkflowArgs),
    /// List workflows in the namespace
    Workflows(NamespaceArgs),
    /// List cron workflows in the namespace
    #[command(name = "cw")]
    Cw(NamespaceArgs),
    /// List secrets in the namespace
    Secrets(NamespaceArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GetWorkflowArgs {
    /// Name of the workflow
    pub name: String,

    /// Namespace the workflow lives in
    #[arg(short = 'n', long, visible_alias = "ns", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Also print the pod logs of every step
    #[arg(long)]
    pub logs: bool,
}

#[derive(Args, Debug, Clone)]
pub struct NamespaceArgs {
    /// Namespace to list
    #[arg(short = 'n', long, visible_alias = "ns", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,
}

/// Handle get commands
pub async fn handle_get_command(command: GetCommands) -> Result<()> {
    match command {
        GetCommands::Workflow(args) => get_workflow(args).await,
        GetCommands::Workflows(args) => get_workflows(args).await,
        GetCommands::Cw(args) => get_cron_workflows(args).await,
        GetCommands::Secrets(args) => get_secrets(args).await,
    }
}

async fn get_workflow(args: GetWorkflowArgs) -> Result<()> {
    let name = names::normalize(&args.name);
    let namespace = names::normalize(&args.namespace);
    let cluster = common::connect().await?;
    let selector = Selector::workflow(&name);

    let mut rows = Vec::new();
    for kind in [Kind::Deployment, Kind::Job] {
        for object in cluster.list(kind, &namespace, &selector).await? {
            rows.extend(output::step_row(&object));
        }
    }
    output::print_table(rows, &format!("no workflow {name} found in {namespace} namespace"));

    if args.logs {
        for pod in cluster.list(Kind::Pod, &namespace, &selector).await? {
            println!("\n{}", format!("=== logs: {} ===", pod.name()).bold());
            let logs = cluster
                .pod_logs(&namespace, pod.name(), Some(CONTAINER_NAME), LOG_TAIL_LINES)
                .await?;
            if logs.is_empty() {
                println!("{}", "(no logs yet)".dimmed());
            } else {
                println!("{logs}");
            }
        }
    }
    Ok(())
}

async fn get_workflows(args: NamespaceArgs) -> Result<()> {
    let namespace = names::normalize(&args.namespace);
    let cluster = common::connect().await?;

    // name -> source url annotation
    let mut workflows: BTreeMap<String, String> = BTreeMap::new();
    for kind in [Kind::Job, Kind::Deployment] {
        for object in cluster
            .list(kind, &namespace, &Selector::any_workflow())
            .await?
        {
            if let Some(workflow) = object.label(WORKFLOW_LABEL) {
                let url = object.annotation("url").unwrap_or_default().to_string();
                workflows.entry(workflow.to_string()).or_insert(url);
            }
        }
    }

    let rows: Vec<WorkflowRow> = workflows
        .into_iter()
        .map(|(name, url)| WorkflowRow { namespace: namespace.clone(), name, url })
        .collect();
    output::print_table(rows, &format!("no workflows found in {namespace} namespace"));
    Ok(())
}

async fn get_cron_workflows(args: NamespaceArgs) -> Result<()> {
    let namespace = names::normalize(&args.namespace);
    let cluster = common::connect().await?;

    let rows: Vec<CronRow> = cluster
        .list(Kind::CronJob, &namespace, &Selector::any_workflow())
        .await?
        .iter()
        .map(|object| CronRow {
            namespace: namespace.clone(),
            name: object.name().to_string(),
            schedule: object
                .as_cron_job()
                .and_then(|cron| cron.spec.as_ref())
                .map(|spec| spec.schedule.clone())
                .unwrap_or_default(),
            url: object.annotation("url").unwrap_or_default().to_string(),
        })
        .collect();
    output::print_table(rows, &format!("no cron workflows found in {namespace} namespace"));
    Ok(())
}

async fn get_secrets(args: NamespaceArgs) -> Result<()> {
    let namespace = names::normalize(&args.namespace);
    let cluster = common::connect().await?;

    let rows: Vec<SecretRow> = cluster
        .list(Kind::Secret, &namespace, &Selector::new())
        .await?
        .iter()
        .filter_map(|object| {
            let secret = object.as_secret()?;
            let mut keys: Vec<&str> = secret
                .data
                .iter()
                .flat_map(|data| data.keys())
                .chain(secret.string_data.iter().flat_map(|data| data.keys()))
                .map(String::as_str)
                .collect();
            keys.sort_unstable();
            keys.dedup();
            Some(SecretRow {
                namespace: namespace.clone(),
                name: object.name().to_string(),
                workflow: object.label(WORKFLOW_LABEL).unwrap_or("-").to_string(),
                keys: keys.join("\n"),
            })
        })
        .collect();
    output::print_table(rows, &format!("no secrets found in {namespace} namespace"));
    Ok(())
}
