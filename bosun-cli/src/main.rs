//! Bosun CLI
//!
//! Command-line controller for bosun workflows: compiles a YAML workflow
//! description into Kubernetes objects, drives the run, and reports status.
//! This outer frame is the only place where engine errors become user
//! messages and exit codes.

mod commands;
mod output;

use clap::Parser;
use colored::Colorize;

use bosun_core::error::{ConfigError, SourceError};
use bosun_engine::EngineError;
use bosun_k8s::ClusterError;

use commands::Commands;

pub(crate) const VERSION: &str = env!("CARGO_PKG_VERSION");
pub(crate) const DEFAULT_NAMESPACE: &str = "bosun";

#[derive(Parser)]
#[command(name = "bosun")]
#[command(version)]
#[command(about = "Deploy ML workflows to Kubernetes as stages of parallel steps", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "bosun=info,bosun_core=info,bosun_k8s=info,bosun_engine=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    if let Err(err) = commands::handle_command(cli.command).await {
        eprintln!("{} {err:#}", "error:".red().bold());
        std::process::exit(exit_code(&err));
    }
}

/// Stable mapping from error kinds to exit codes:
/// 2 validation, 3 cluster, 4 step failure, 5 timeout, 6 cancelled, 1 other.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(engine) = err.downcast_ref::<EngineError>() {
        return match engine {
            EngineError::Validation(_)
            | EngineError::Source(_)
            | EngineError::Precondition(_) => 2,
            EngineError::Cluster(_) => 3,
            EngineError::StepFailure(_) => 4,
            EngineError::Timeout(_) => 5,
            EngineError::Cancelled => 6,
            EngineError::Internal(_) => 1,
        };
    }
    if err.downcast_ref::<ConfigError>().is_some() || err.downcast_ref::<SourceError>().is_some() {
        return 2;
    }
    if err.downcast_ref::<ClusterError>().is_some() {
        return 3;
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exit_code_mapping() {
        let validation: anyhow::Error =
            EngineError::Validation(ConfigError::Schema("bad".to_string())).into();
        assert_eq!(exit_code(&validation), 2);

        let cluster: anyhow::Error = EngineError::Cluster(ClusterError::Api {
            status: 403,
            message: "denied".to_string(),
        })
        .into();
        assert_eq!(exit_code(&cluster), 3);

        let cancelled: anyhow::Error = EngineError::Cancelled.into();
        assert_eq!(exit_code(&cancelled), 6);

        let bare_config: anyhow::Error = ConfigError::Schema("bad".to_string()).into();
        assert_eq!(exit_code(&bare_config), 2);

        let other = anyhow::anyhow!("boom");
        assert_eq!(exit_code(&other), 1);
    }
}
