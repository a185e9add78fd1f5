//! Commands module
//!
//! Verb-noun command tree (`create workflow`, `get secrets`, ...) with one
//! handler file per verb, plus the `run` entrypoint used by the scheduled
//! runner image.

mod common;
mod create;
mod delete;
mod get;
mod run;
mod update;

pub use create::CreateCommands;
pub use delete::DeleteCommands;
pub use get::GetCommands;
pub use run::RunArgs;
pub use update::UpdateCommands;

use anyhow::Result;
use clap::Subcommand;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create a workflow, cron workflow or secret
    Create {
        #[command(subcommand)]
        command: CreateCommands,
    },
    /// Update a workflow, cron workflow or secret
    Update {
        #[command(subcommand)]
        command: UpdateCommands,
    },
    /// Delete a workflow, cron workflow or secret
    Delete {
        #[command(subcommand)]
        command: DeleteCommands,
    },
    /// Show workflows, steps and secrets
    Get {
        #[command(subcommand)]
        command: GetCommands,
    },
    /// Fetch the config and execute the workflow (used by the runner image)
    #[command(hide = true)]
    Run(RunArgs),
}

/// Route a command to its handler.
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Create { command } => create::handle_create_command(command).await,
        Commands::Update { command } => update::handle_update_command(command).await,
        Commands::Delete { command } => delete::handle_delete_command(command).await,
        Commands::Get { command } => get::handle_get_command(command).await,
        Commands::Run(args) => run::handle_run_command(args).await,
    }
}
