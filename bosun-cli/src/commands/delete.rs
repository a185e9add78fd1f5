//! Delete command handlers
//!
//! Deletion is sweeper-driven: every object under the workflow's label goes
//! away, workflow-scoped secrets included. Absent objects are success.

use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;

use bosun_core::names;
use bosun_engine::Sweeper;
use bosun_k8s::{ClusterOps, Kind};

use super::common;
use crate::DEFAULT_NAMESPACE;

/// Delete subcommands
#[derive(Subcommand)]
pub enum DeleteCommands {
    /// Delete a workflow and everything it owns
    #[command(visible_alias = "w")]
    Workflow(DeleteArgs),
    /// Delete a cron workflow and everything it owns
    #[command(name = "cw")]
    Cw(DeleteArgs),
    /// Delete a secret
    Secret(DeleteArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Name of the object to delete
    pub name: String,

    /// Namespace the object lives in
    #[arg(short = 'n', long, visible_alias = "ns", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,
}

/// Handle delete commands
pub async fn handle_delete_command(command: DeleteCommands) -> Result<()> {
    match command {
        DeleteCommands::Workflow(args) => delete_workflow(args, "workflow").await,
        DeleteCommands::Cw(args) => delete_workflow(args, "cron workflow").await,
        DeleteCommands::Secret(args) => delete_secret(args).await,
    }
}

async fn delete_workflow(args: DeleteArgs, what: &str) -> Result<()> {
    let name = names::normalize(&args.name);
    let namespace = names::normalize(&args.namespace);

    let cluster = common::connect().await?;
    let sweeper = Sweeper::new(cluster as Arc<dyn ClusterOps>);
    sweeper.sweep_workflow(&namespace, &name, false).await?;

    println!(
        "{}",
        format!("✓ {what} {name} deleted from {namespace} namespace").green().bold()
    );
    Ok(())
}

async fn delete_secret(args: DeleteArgs) -> Result<()> {
    let name = names::normalize(&args.name);
    let namespace = names::normalize(&args.namespace);

    let cluster = common::connect().await?;
    cluster.delete(Kind::Secret, &namespace, &name).await?;

    println!(
        "{}",
        format!("✓ secret {name} deleted from {namespace} namespace").green().bold()
    );
    Ok(())
}
