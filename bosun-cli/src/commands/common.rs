//! Shared plumbing for workflow-shaped commands
//!
//! Create, update and run all follow the same path: parse the source ref,
//! download and validate the config (twice: the first pass learns which
//! repository files and secrets are referenced, the second enforces the
//! cross-checks), then hand the validated workflow to the engine.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use bosun_core::config::{load_workflow, ValidationContext};
use bosun_core::domain::outcome::Run;
use bosun_core::domain::workflow::Workflow;
use bosun_core::names;
use bosun_core::source::{download_config, fetcher_for, probe_files, Archive, SourceRef};
use bosun_engine::{Executor, StepLogBook};
use bosun_k8s::{ClusterOps, Kind, KubeCluster, Selector};

use crate::{DEFAULT_NAMESPACE, VERSION};

/// Options shared by every command that resolves a workflow from a repo.
#[derive(Args, Debug, Clone)]
pub struct WorkflowArgs {
    /// Name of the workflow
    pub name: String,

    /// HTTPS url of the remote repository
    pub url: String,

    /// Kubernetes namespace to deploy into
    #[arg(short = 'n', long, visible_alias = "ns", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Path of the workflow config file inside the repository
    #[arg(short = 'f', long, default_value = "config.yaml")]
    pub file: String,

    /// Branch of the remote repository
    #[arg(short = 'b', long, default_value = "master")]
    pub branch: String,

    /// PAT token for private repositories
    #[arg(short = 't', long)]
    pub token: Option<String>,

    /// GitLab project id (required for private gitlab repos)
    #[arg(long)]
    pub id: Option<String>,

    /// Validate the config and stop before any cluster mutation
    #[arg(long)]
    pub check: bool,
}

impl WorkflowArgs {
    pub fn normalize(&mut self) {
        self.name = names::normalize(&self.name);
        self.namespace = names::normalize(&self.namespace);
    }
}

/// Parse the source ref. With `env_token` set, a missing `--token` falls
/// back to the provider's token env variable; that is how the scheduled
/// runner pod picks up the PAT injected from the repo secret.
pub fn parse_source(args: &WorkflowArgs, env_token: bool) -> Result<SourceRef> {
    let mut token = args.token.clone();
    if token.is_none() && env_token {
        let probe = SourceRef::parse(&args.url, &args.branch, None, args.id.clone())?;
        token = std::env::var(probe.provider.token_env()).ok();
    }
    Ok(SourceRef::parse(&args.url, &args.branch, token, args.id.clone())?)
}

/// Download, validate and default the workflow config. Secret references
/// are cross-checked only when a cluster handle is supplied (`--check`
/// passes `None` and stays offline apart from the repo itself).
pub async fn resolve_workflow(
    args: &WorkflowArgs,
    source: &SourceRef,
    cluster: Option<&dyn ClusterOps>,
) -> Result<(Workflow, Archive)> {
    let fetcher = fetcher_for(source.provider);
    let raw = download_config(fetcher, source, &args.file).await?;

    let preliminary = load_workflow(
        &raw,
        &args.name,
        &args.namespace,
        source.clone(),
        &ValidationContext { cli_version: Some(VERSION), ..Default::default() },
    )?;

    let referenced: HashSet<String> = preliminary
        .steps()
        .flat_map(|step| [step.executable.clone(), step.dependencies.clone()])
        .collect();
    let known_files = probe_files(fetcher, source, referenced.iter().map(String::as_str)).await?;

    let known_secrets = match cluster {
        Some(cluster) => {
            let secrets = cluster
                .list(Kind::Secret, &preliminary.namespace, &Selector::new())
                .await?;
            Some(
                secrets
                    .into_iter()
                    .map(|object| object.name().to_string())
                    .collect::<HashSet<String>>(),
            )
        }
        None => None,
    };

    let ctx = ValidationContext {
        known_secrets: known_secrets.as_ref(),
        known_files: Some(&known_files),
        cli_version: Some(VERSION),
    };
    let workflow = load_workflow(&raw, &args.name, &args.namespace, source.clone(), &ctx)?;
    let archive = fetcher.tarball(&workflow.source)?;
    Ok((workflow, archive))
}

pub async fn connect() -> Result<Arc<KubeCluster>> {
    Ok(Arc::new(KubeCluster::connect().await?))
}

/// A workflow exists when any workload object carries its label.
pub async fn workflow_exists(
    cluster: &dyn ClusterOps,
    namespace: &str,
    workflow: &str,
) -> Result<bool> {
    for kind in [Kind::Job, Kind::Deployment, Kind::CronJob] {
        let objects = cluster
            .list(kind, namespace, &Selector::workflow(workflow))
            .await?;
        if !objects.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}

pub async fn cron_exists(
    cluster: &dyn ClusterOps,
    namespace: &str,
    workflow: &str,
) -> Result<bool> {
    let crons = cluster
        .list(Kind::CronJob, namespace, &Selector::workflow(workflow))
        .await?;
    Ok(!crons.is_empty())
}

/// Run the workflow with signal-driven cancellation wired up.
pub async fn execute(
    workflow: &Workflow,
    archive: &Archive,
    cluster: Arc<dyn ClusterOps>,
) -> Result<Run> {
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let executor = Executor::new(cluster, Arc::new(StepLogBook::new()), cancel, VERSION);
    Ok(executor.run(workflow, archive).await?)
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if wait_for_signal().await {
            warn!("interrupt received, stopping the workflow run");
            cancel.cancel();
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                result = tokio::signal::ctrl_c() => result.is_ok(),
                _ = term.recv() => true,
            }
        }
        Err(_) => tokio::signal::ctrl_c().await.is_ok(),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}

/// Parse a single KEY=value pair.
pub fn parse_key_val(s: &str) -> Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{s}`"))?;
    if pos == 0 {
        anyhow::bail!("invalid KEY=value: empty key in `{s}`");
    }
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("USER=admin").unwrap(),
            ("USER".to_string(), "admin".to_string())
        );
        assert_eq!(
            parse_key_val("TOKEN=a=b=c").unwrap(),
            ("TOKEN".to_string(), "a=b=c".to_string())
        );
        assert!(parse_key_val("no-separator").is_err());
        assert!(parse_key_val("=value").is_err());
    }

    #[test]
    fn test_workflow_args_normalize() {
        let mut args = WorkflowArgs {
            name: "Demand Forecast".to_string(),
            url: "https://github.com/acme/models".to_string(),
            namespace: "ML Team".to_string(),
            file: "config.yaml".to_string(),
            branch: "master".to_string(),
            token: None,
            id: None,
            check: false,
        };
        args.normalize();
        assert_eq!(args.name, "demand-forecast");
        assert_eq!(args.namespace, "ml-team");
    }
}
