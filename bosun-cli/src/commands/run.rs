//! Run command handler
//!
//! The entrypoint the scheduled runner image invokes: fetch the config,
//! re-validate it and drive the executor from inside the cluster. The PAT
//! comes in through the repo secret's env field rather than `--token`.

use anyhow::Result;
use clap::Args;

use super::common::{self, WorkflowArgs};
use crate::output;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub workflow: WorkflowArgs,
}

/// Handle the run command
pub async fn handle_run_command(mut args: RunArgs) -> Result<()> {
    args.workflow.normalize();
    let source = common::parse_source(&args.workflow, true)?;

    let cluster = common::connect().await?;
    let (workflow, archive) =
        common::resolve_workflow(&args.workflow, &source, Some(cluster.as_ref())).await?;

    let run = common::execute(&workflow, &archive, cluster).await?;
    output::print_run_summary(&run);
    Ok(())
}
