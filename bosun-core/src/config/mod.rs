//! Workflow config loading and validation
//!
//! Turning the user's YAML into a [`Workflow`] happens in three phases:
//!
//! 1. structural decode: strict serde with unknown fields rejected, so a
//!    typo fails loudly instead of silently falling back to a default
//! 2. normalization: DNS-sanitize every name and fill in defaults
//! 3. semantic validation: the invariants the synthesizer relies on,
//!    cross-checked against caller-provided known-secret/known-file sets

use std::collections::{BTreeMap, HashSet};

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::warn;

use crate::domain::workflow::{ServiceConfig, ServiceStep, Stage, Step, StepKind, Workflow};
use crate::error::ConfigError;
use crate::names;
use crate::source::SourceRef;

/// Defaults applied during normalization.
pub mod defaults {
    pub const CPU_REQUEST: f64 = 0.5;
    pub const MEMORY_REQUEST: u64 = 500;
    pub const TIMEOUT: u64 = 20;
    pub const POLLING_TIME: u64 = 1;
    pub const WAIT_BEFORE_START_TIME: u64 = 0;
    pub const REPLICAS: u32 = 1;
    pub const BACKOFF_LIMIT: u32 = 0;
    pub const REVISION_HISTORY_LIMIT: u32 = 1;
    pub const PORT: u16 = 5000;
    pub const INGRESS: bool = false;
}

/// External facts the semantic phase checks against. A `None` set skips
/// that check (used by `--check`, which runs without cluster access).
#[derive(Debug, Default)]
pub struct ValidationContext<'a> {
    pub known_secrets: Option<&'a HashSet<String>>,
    pub known_files: Option<&'a HashSet<String>>,
    pub cli_version: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWorkflow {
    version: String,
    #[serde(default)]
    name: Option<String>,
    stages: IndexMap<String, Vec<RawStep>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    step_name: String,
    path_to_executable: String,
    dependency_path: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    command: Option<Vec<String>>,
    #[serde(default)]
    envs: BTreeMap<String, String>,
    #[serde(default)]
    secrets: Vec<String>,
    #[serde(default)]
    cpu_request: Option<f64>,
    #[serde(default)]
    memory_request: Option<u64>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    polling_time: Option<u64>,
    #[serde(default)]
    wait_before_start_time: Option<u64>,
    #[serde(default)]
    backoff_limit: Option<u32>,
    #[serde(default)]
    replicas: Option<u32>,
    #[serde(default)]
    revision_history_limit: Option<u32>,
    #[serde(default)]
    min_ready_seconds: Option<u32>,
    #[serde(default)]
    service: Option<RawService>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawService {
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    ingress: Option<bool>,
    #[serde(default)]
    max_startup_time: Option<u64>,
}

/// Load, normalize and validate a workflow description.
///
/// `fallback_name` is the CLI-supplied workflow name, used when the config
/// omits `name`. The source ref has already been parsed by the caller.
pub fn load_workflow(
    raw: &[u8],
    fallback_name: &str,
    namespace: &str,
    source: SourceRef,
    ctx: &ValidationContext<'_>,
) -> Result<Workflow, ConfigError> {
    let decoded: RawWorkflow = serde_yaml::from_slice(raw)?;
    let workflow = normalize(decoded, fallback_name, namespace, source)?;
    validate(&workflow, ctx)?;
    Ok(workflow)
}

fn normalize(
    raw: RawWorkflow,
    fallback_name: &str,
    namespace: &str,
    source: SourceRef,
) -> Result<Workflow, ConfigError> {
    let name = normalized_name(raw.name.as_deref().unwrap_or(fallback_name), "workflow")?;
    let namespace = normalized_name(namespace, "namespace")?;

    if raw.stages.is_empty() {
        return Err(ConfigError::Schema("stages must not be empty".to_string()));
    }

    let mut stages = Vec::with_capacity(raw.stages.len());
    let mut stage_names = HashSet::new();
    for (stage_name, raw_steps) in raw.stages {
        let stage_name = normalized_name(&stage_name, "stage")?;
        if !stage_names.insert(stage_name.clone()) {
            return Err(ConfigError::NameCollision(format!("stage {stage_name:?}")));
        }
        if raw_steps.is_empty() {
            return Err(ConfigError::Schema(format!(
                "stage {stage_name:?} has no steps"
            )));
        }
        let steps = raw_steps
            .into_iter()
            .map(|raw_step| normalize_step(raw_step, &stage_name))
            .collect::<Result<Vec<_>, _>>()?;
        stages.push(Stage { name: stage_name, steps });
    }

    Ok(Workflow { name, namespace, version: raw.version, source, stages })
}

fn normalize_step(raw: RawStep, stage: &str) -> Result<Step, ConfigError> {
    let name = normalized_name(&raw.step_name, "step")?;

    let kind = match raw.service {
        Some(service) => {
            if raw.backoff_limit.is_some() {
                return Err(ConfigError::Schema(format!(
                    "service step {name:?} in stage {stage:?} must not set backoff_limit"
                )));
            }
            StepKind::Service(ServiceStep {
                replicas: raw.replicas.unwrap_or(defaults::REPLICAS),
                revision_history_limit: raw
                    .revision_history_limit
                    .unwrap_or(defaults::REVISION_HISTORY_LIMIT),
                min_ready_seconds: raw.min_ready_seconds.unwrap_or(0),
                service: ServiceConfig {
                    port: service.port.unwrap_or(defaults::PORT),
                    ingress: service.ingress.unwrap_or(defaults::INGRESS),
                    max_startup_time: service.max_startup_time,
                },
            })
        }
        None => {
            for (field, set) in [
                ("replicas", raw.replicas.is_some()),
                ("revision_history_limit", raw.revision_history_limit.is_some()),
                ("min_ready_seconds", raw.min_ready_seconds.is_some()),
            ] {
                if set {
                    return Err(ConfigError::Schema(format!(
                        "task step {name:?} in stage {stage:?} must not set {field} \
                         (add a service block to make it a service step)"
                    )));
                }
            }
            StepKind::Task { backoff_limit: raw.backoff_limit.unwrap_or(defaults::BACKOFF_LIMIT) }
        }
    };

    Ok(Step {
        name,
        executable: raw.path_to_executable,
        dependencies: raw.dependency_path,
        image: raw.image,
        command: raw.command,
        envs: raw.envs,
        secrets: raw
            .secrets
            .into_iter()
            .map(|s| normalized_name(&s, "secret"))
            .collect::<Result<Vec<_>, _>>()?,
        cpu_request: raw.cpu_request.unwrap_or(defaults::CPU_REQUEST),
        memory_request: raw.memory_request.unwrap_or(defaults::MEMORY_REQUEST),
        timeout: raw.timeout.unwrap_or(defaults::TIMEOUT),
        polling_time: raw.polling_time.unwrap_or(defaults::POLLING_TIME),
        wait_before_start_time: raw
            .wait_before_start_time
            .unwrap_or(defaults::WAIT_BEFORE_START_TIME),
        kind,
    })
}

fn normalized_name(raw: &str, what: &str) -> Result<String, ConfigError> {
    let name = names::normalize(raw);
    if name.is_empty() {
        return Err(ConfigError::Schema(format!(
            "{what} name {raw:?} is empty after normalization"
        )));
    }
    Ok(name)
}

fn validate(workflow: &Workflow, ctx: &ValidationContext<'_>) -> Result<(), ConfigError> {
    if let Some(cli_version) = ctx.cli_version {
        if workflow.version != cli_version {
            warn!(
                config_version = %workflow.version,
                cli_version,
                "config version does not match the cli version"
            );
        }
    }

    // Step names must be unique across the whole workflow: cross-stage
    // duplicates would collide on the app=<step> service selector.
    let mut step_names = HashSet::new();
    for stage in &workflow.stages {
        for step in &stage.steps {
            if !step_names.insert(step.name.clone()) {
                return Err(ConfigError::NameCollision(format!(
                    "step {:?} in stage {:?}",
                    step.name, stage.name
                )));
            }
            validate_step(workflow, stage, step, ctx)?;
        }
    }
    Ok(())
}

fn validate_step(
    workflow: &Workflow,
    stage: &Stage,
    step: &Step,
    ctx: &ValidationContext<'_>,
) -> Result<(), ConfigError> {
    let at = || format!("step {:?} in stage {:?}", step.name, stage.name);

    if !step.executable.ends_with(".py") && !step.executable.ends_with(".ipynb") {
        return Err(ConfigError::Schema(format!(
            "{}: path_to_executable {:?} must have a py or ipynb extension",
            at(),
            step.executable
        )));
    }
    if !step.dependencies.ends_with(".txt") {
        return Err(ConfigError::Schema(format!(
            "{}: dependency_path {:?} must have a txt extension",
            at(),
            step.dependencies
        )));
    }
    if step.cpu_request <= 0.0 {
        return Err(ConfigError::Schema(format!("{}: cpu_request must be > 0", at())));
    }
    if step.memory_request == 0 {
        return Err(ConfigError::Schema(format!("{}: memory_request must be > 0", at())));
    }
    if step.polling_time < 1 || step.timeout < step.polling_time {
        return Err(ConfigError::Schema(format!(
            "{}: timeout ({}) must be >= polling_time ({}) and polling_time >= 1",
            at(),
            step.timeout,
            step.polling_time
        )));
    }
    if let StepKind::Service(svc) = &step.kind {
        if svc.replicas == 0 {
            return Err(ConfigError::Schema(format!("{}: replicas must be > 0", at())));
        }
    }

    if let Some(known) = ctx.known_secrets {
        for secret in &step.secrets {
            if !known.contains(secret) {
                return Err(ConfigError::SecretNotFound {
                    name: secret.clone(),
                    namespace: workflow.namespace.clone(),
                });
            }
        }
    }
    if let Some(known) = ctx.known_files {
        for file in [&step.executable, &step.dependencies] {
            if !known.contains(file) {
                return Err(ConfigError::MissingFile(file.clone()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
version: 0.3.1
name: Demand Forecast
stages:
  Train Models:
    - step_name: sarimax
      path_to_executable: models/sarimax.py
      dependency_path: requirements.txt
      envs:
        N_ESTIMATORS: "40"
    - step_name: DeepAR
      path_to_executable: models/deepar.py
      dependency_path: requirements.txt
      cpu_request: 1.5
      memory_request: 2000
      timeout: 120
  serve:
    - step_name: api
      path_to_executable: app/main.py
      dependency_path: requirements.txt
      replicas: 2
      min_ready_seconds: 5
      service:
        port: 8000
        ingress: true
"#;

    fn source() -> SourceRef {
        SourceRef::parse("https://github.com/acme/models", "master", None, None).unwrap()
    }

    fn load(config: &str) -> Result<Workflow, ConfigError> {
        load_workflow(config.as_bytes(), "demand", "bosun", source(), &ValidationContext::default())
    }

    #[test]
    fn test_load_full_config() {
        let workflow = load(CONFIG).unwrap();
        assert_eq!(workflow.name, "demand-forecast");
        assert_eq!(workflow.stages.len(), 2);
        assert_eq!(workflow.stages[0].name, "train-models");
        assert_eq!(workflow.stages[0].steps[1].name, "deepar");
        assert_eq!(workflow.stages[0].steps[1].timeout, 120);

        let api = &workflow.stages[1].steps[0];
        match &api.kind {
            StepKind::Service(svc) => {
                assert_eq!(svc.replicas, 2);
                assert_eq!(svc.service.port, 8000);
                assert!(svc.service.ingress);
            }
            StepKind::Task { .. } => panic!("api should be a service step"),
        }
    }

    #[test]
    fn test_defaults_applied() {
        let workflow = load(CONFIG).unwrap();
        let sarimax = &workflow.stages[0].steps[0];
        assert_eq!(sarimax.cpu_request, defaults::CPU_REQUEST);
        assert_eq!(sarimax.memory_request, defaults::MEMORY_REQUEST);
        assert_eq!(sarimax.timeout, defaults::TIMEOUT);
        assert_eq!(sarimax.polling_time, defaults::POLLING_TIME);
        assert!(matches!(sarimax.kind, StepKind::Task { backoff_limit: 0 }));
    }

    #[test]
    fn test_name_falls_back_to_cli_name() {
        let config = CONFIG.replace("name: Demand Forecast\n", "");
        let workflow = load(&config).unwrap();
        assert_eq!(workflow.name, "demand");
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let config = format!("{CONFIG}\nextra: true\n");
        assert!(matches!(load(&config), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_step_key_rejected() {
        let config = CONFIG.replace("cpu_request: 1.5", "cpu_requests: 1.5");
        assert!(matches!(load(&config), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_empty_stages_rejected() {
        let config = "version: 0.3.1\nstages: {}\n";
        assert!(matches!(load(config), Err(ConfigError::Schema(_))));
    }

    #[test]
    fn test_task_step_with_replicas_rejected() {
        let config = CONFIG.replace(
            "      envs:\n        N_ESTIMATORS: \"40\"",
            "      replicas: 3",
        );
        assert!(matches!(load(&config), Err(ConfigError::Schema(_))));
    }

    #[test]
    fn test_service_step_with_backoff_rejected() {
        let config = CONFIG.replace("      service:", "      backoff_limit: 2\n      service:");
        assert!(matches!(load(&config), Err(ConfigError::Schema(_))));
    }

    #[test]
    fn test_bad_executable_extension_rejected() {
        let config = CONFIG.replace("models/sarimax.py", "models/sarimax.sh");
        assert!(matches!(load(&config), Err(ConfigError::Schema(_))));
    }

    #[test]
    fn test_timeout_below_polling_rejected() {
        let config = CONFIG.replace("timeout: 120", "timeout: 120\n      polling_time: 200");
        assert!(matches!(load(&config), Err(ConfigError::Schema(_))));
    }

    #[test]
    fn test_step_name_collision_after_normalization() {
        let config = CONFIG.replace("step_name: DeepAR", "step_name: Sarimax");
        assert!(matches!(load(&config), Err(ConfigError::NameCollision(_))));
    }

    #[test]
    fn test_cross_stage_step_collision_rejected() {
        let config = CONFIG.replace("step_name: api", "step_name: sarimax");
        assert!(matches!(load(&config), Err(ConfigError::NameCollision(_))));
    }

    #[test]
    fn test_missing_secret_rejected() {
        let config = CONFIG.replace(
            "      envs:\n        N_ESTIMATORS: \"40\"",
            "      secrets: [db-creds]",
        );
        let known = HashSet::new();
        let ctx = ValidationContext { known_secrets: Some(&known), ..Default::default() };
        let result = load_workflow(config.as_bytes(), "demand", "bosun", source(), &ctx);
        assert!(matches!(result, Err(ConfigError::SecretNotFound { .. })));
    }

    #[test]
    fn test_missing_file_rejected() {
        let known: HashSet<String> = ["requirements.txt".to_string()].into();
        let ctx = ValidationContext { known_files: Some(&known), ..Default::default() };
        let result = load_workflow(CONFIG.as_bytes(), "demand", "bosun", source(), &ctx);
        assert!(matches!(result, Err(ConfigError::MissingFile(_))));
    }

    #[test]
    fn test_stage_order_is_insertion_order() {
        let workflow = load(CONFIG).unwrap();
        let names: Vec<&str> = workflow.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["train-models", "serve"]);
    }
}
