//! Resource synthesis
//!
//! Each validated step becomes a *bundle*: a Job for task steps, a
//! Deployment plus Service (and optionally an Ingress) for service steps.
//! Synthesis is pure: given the same workflow and context the produced
//! manifests are byte-identical, which the tests below pin down.
//!
//! Resource *requests* are set without limits, preserving the QoS behavior
//! of the system this replaces.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, Job, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvFromSource, EnvVar, LocalObjectReference, Namespace,
    PodSpec, PodTemplateSpec, ResourceRequirements, Secret, SecretEnvSource, Service, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use bosun_core::domain::workflow::{ServiceStep, Step, StepKind};
use bosun_core::names;
use bosun_core::source::{Archive, SourceRef};

use crate::object::{Kind, Object};
use crate::selector::{Selector, APP_LABEL, STAGE_LABEL, STEP_LABEL, WORKFLOW_LABEL};

/// Name of the user container in every synthesized pod.
pub const CONTAINER_NAME: &str = "bosun";
/// Name of the source-fetch init container.
pub const INIT_CONTAINER_NAME: &str = "fetch-source";

const INIT_IMAGE: &str = "busybox:1.36";
const SOURCE_VOLUME: &str = "source";
const SOURCE_DIR: &str = "/home/app";

const CLIENT_IMAGE_REPO: &str = "bosun/client";
const RUNNER_IMAGE_REPO: &str = "bosun/runner";

const RUNNER_BACKOFF_LIMIT: i32 = 2;
const RUNNER_TTL_AFTER_FINISHED: i32 = 604_800;
const RUNNER_HISTORY_LIMIT: i32 = 2;

const URL_ANNOTATION: &str = "url";
const EXECUTABLE_ANNOTATION: &str = "executable";

pub const OPAQUE_SECRET_TYPE: &str = "Opaque";
pub const DOCKER_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// Name of the workflow-scoped secret carrying the repo PAT.
pub fn repo_secret_name(workflow: &str) -> String {
    format!("repo-{workflow}")
}

/// Everything synthesis needs besides the step itself.
#[derive(Debug, Clone)]
pub struct SynthContext<'a> {
    pub workflow: &'a str,
    pub namespace: &'a str,
    /// Source URL as the user supplied it; kept as an annotation.
    pub source_url: &'a str,
    pub archive: &'a Archive,
    /// `repo-<workflow>` when the source is private.
    pub repo_secret: Option<&'a str>,
    /// Most recent docker-registry secret in the namespace, if any.
    pub image_pull_secret: Option<&'a str>,
    /// Engine version; tags the default client/runner images.
    pub version: &'a str,
}

/// The Kubernetes objects synthesized from one step.
#[derive(Debug, Clone)]
pub struct StepBundle {
    pub stage: String,
    pub step: String,
    pub workload: Workload,
}

#[derive(Debug, Clone)]
pub enum Workload {
    Task(Job),
    Service {
        deployment: Deployment,
        service: Service,
        ingress: Option<Ingress>,
    },
}

impl StepBundle {
    /// Objects in creation order.
    pub fn objects(&self) -> Vec<Object> {
        match &self.workload {
            Workload::Task(job) => vec![Object::Job(job.clone())],
            Workload::Service { deployment, service, ingress } => {
                let mut objects = vec![
                    Object::Deployment(deployment.clone()),
                    Object::Service(service.clone()),
                ];
                if let Some(ingress) = ingress {
                    objects.push(Object::Ingress(ingress.clone()));
                }
                objects
            }
        }
    }

    pub fn workload_kind(&self) -> Kind {
        match self.workload {
            Workload::Task(_) => Kind::Job,
            Workload::Service { .. } => Kind::Deployment,
        }
    }

    pub fn workload_name(&self) -> String {
        let name = match &self.workload {
            Workload::Task(job) => job.metadata.name.as_deref(),
            Workload::Service { deployment, .. } => deployment.metadata.name.as_deref(),
        };
        name.unwrap_or_default().to_string()
    }

    /// Selector matching the pods this step's workload owns.
    pub fn pod_selector(&self, workflow: &str) -> Selector {
        Selector::workflow(workflow)
            .eq(STAGE_LABEL, self.stage.clone())
            .eq(STEP_LABEL, self.step.clone())
    }
}

/// Synthesize the bundle for one step of one stage.
pub fn synthesize_step(ctx: &SynthContext<'_>, stage: &str, step: &Step) -> StepBundle {
    let name = names::workload_name(ctx.workflow, stage, &step.name);
    let workload = match &step.kind {
        StepKind::Task { backoff_limit } => {
            Workload::Task(task_job(ctx, stage, step, &name, *backoff_limit))
        }
        StepKind::Service(svc) => {
            let deployment = service_deployment(ctx, stage, step, &name, svc);
            let service = service_object(ctx, stage, step, &name, svc.service.port);
            let ingress = svc
                .service
                .ingress
                .then(|| ingress_object(ctx, stage, step, &name, svc.service.port));
            Workload::Service { deployment, service, ingress }
        }
    };
    StepBundle { stage: stage.to_string(), step: step.name.clone(), workload }
}

fn step_labels(ctx: &SynthContext<'_>, stage: &str, step: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (WORKFLOW_LABEL.to_string(), ctx.workflow.to_string()),
        (STAGE_LABEL.to_string(), stage.to_string()),
        (STEP_LABEL.to_string(), step.to_string()),
    ])
}

fn step_annotations(ctx: &SynthContext<'_>, step: &Step) -> BTreeMap<String, String> {
    BTreeMap::from([
        (URL_ANNOTATION.to_string(), ctx.source_url.to_string()),
        (EXECUTABLE_ANNOTATION.to_string(), step.executable.clone()),
    ])
}

fn task_job(
    ctx: &SynthContext<'_>,
    stage: &str,
    step: &Step,
    name: &str,
    backoff_limit: u32,
) -> Job {
    Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ctx.namespace.to_string()),
            labels: Some(step_labels(ctx, stage, &step.name)),
            annotations: Some(step_annotations(ctx, step)),
            ..Default::default()
        },
        spec: Some(JobSpec {
            template: pod_template(ctx, stage, step, "Never", false),
            completions: Some(1),
            backoff_limit: Some(backoff_limit as i32),
            // No activeDeadlineSeconds: the timeout is enforced
            // client-side by the poller.
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service_deployment(
    ctx: &SynthContext<'_>,
    stage: &str,
    step: &Step,
    name: &str,
    svc: &ServiceStep,
) -> Deployment {
    let mut selector_labels = step_labels(ctx, stage, &step.name);
    selector_labels.insert(APP_LABEL.to_string(), step.name.clone());
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ctx.namespace.to_string()),
            labels: Some(step_labels(ctx, stage, &step.name)),
            annotations: Some(step_annotations(ctx, step)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(svc.replicas as i32),
            selector: LabelSelector {
                match_labels: Some(selector_labels),
                ..Default::default()
            },
            template: pod_template(ctx, stage, step, "Always", true),
            min_ready_seconds: Some(svc.min_ready_seconds as i32),
            revision_history_limit: Some(svc.revision_history_limit as i32),
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service_object(
    ctx: &SynthContext<'_>,
    stage: &str,
    step: &Step,
    name: &str,
    port: u16,
) -> Service {
    let mut selector = step_labels(ctx, stage, &step.name);
    selector.insert(APP_LABEL.to_string(), step.name.clone());
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ctx.namespace.to_string()),
            labels: Some(step_labels(ctx, stage, &step.name)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                port: i32::from(port),
                target_port: Some(IntOrString::Int(i32::from(port))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn ingress_object(
    ctx: &SynthContext<'_>,
    stage: &str,
    step: &Step,
    name: &str,
    port: u16,
) -> Ingress {
    let host = format!("{}.{}.{}.local", step.name, ctx.workflow, ctx.namespace);
    Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ctx.namespace.to_string()),
            labels: Some(step_labels(ctx, stage, &step.name)),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: Some("nginx".to_string()),
            rules: Some(vec![IngressRule {
                host: Some(host),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: name.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(i32::from(port)),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pod_template(
    ctx: &SynthContext<'_>,
    stage: &str,
    step: &Step,
    restart_policy: &str,
    with_app_label: bool,
) -> PodTemplateSpec {
    let mut labels = step_labels(ctx, stage, &step.name);
    if with_app_label {
        labels.insert(APP_LABEL.to_string(), step.name.clone());
    }

    let image = step
        .image
        .clone()
        .unwrap_or_else(|| format!("{CLIENT_IMAGE_REPO}:{}", ctx.version));

    let env: Vec<EnvVar> = step
        .envs
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    let env_from: Vec<EnvFromSource> = step.secrets.iter().map(|s| secret_env(s)).collect();

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(image),
        image_pull_policy: Some("Always".to_string()),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
        args: Some(vec![launcher_script(step)]),
        working_dir: Some(SOURCE_DIR.to_string()),
        env: (!env.is_empty()).then_some(env),
        env_from: (!env_from.is_empty()).then_some(env_from),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity(format!("{}", step.cpu_request))),
                ("memory".to_string(), Quantity(format!("{}Mi", step.memory_request))),
            ])),
            ..Default::default()
        }),
        volume_mounts: Some(vec![source_mount()]),
        ..Default::default()
    };

    let init_container = Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: Some(INIT_IMAGE.to_string()),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
        args: Some(vec![init_script(ctx.archive)]),
        env_from: ctx
            .repo_secret
            .map(|secret| vec![secret_env(secret)]),
        volume_mounts: Some(vec![source_mount()]),
        ..Default::default()
    };

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            init_containers: Some(vec![init_container]),
            restart_policy: Some(restart_policy.to_string()),
            image_pull_secrets: ctx.image_pull_secret.map(|name| {
                vec![LocalObjectReference { name: Some(name.to_string()) }]
            }),
            volumes: Some(vec![Volume {
                name: SOURCE_VOLUME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

fn secret_env(name: &str) -> EnvFromSource {
    EnvFromSource {
        secret_ref: Some(SecretEnvSource {
            name: Some(name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn source_mount() -> VolumeMount {
    VolumeMount {
        name: SOURCE_VOLUME.to_string(),
        mount_path: SOURCE_DIR.to_string(),
        ..Default::default()
    }
}

fn init_script(archive: &Archive) -> String {
    let header = archive
        .auth_header
        .as_deref()
        .map(|header| format!(" --header \"{header}\""))
        .unwrap_or_default();
    format!(
        "set -e && \
         wget -q{header} -O /tmp/source.tar.gz \"{url}\" && \
         tar -xzf /tmp/source.tar.gz --strip-components=1 -C {dir}",
        url = archive.url,
        dir = SOURCE_DIR,
    )
}

fn launcher_script(step: &Step) -> String {
    let run = match &step.command {
        Some(command) => command.join(" "),
        None if step.executable.ends_with(".ipynb") => format!(
            "jupyter nbconvert --to notebook --execute {} --output /tmp/out.ipynb",
            step.executable
        ),
        None => format!("python {}", step.executable),
    };
    format!(
        "cd {dir} && python -m pip install -r {deps} && {run}",
        dir = SOURCE_DIR,
        deps = step.dependencies,
    )
}

/// Bare namespace object.
pub fn namespace_object(name: &str) -> Object {
    Object::Namespace(Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    })
}

/// An opaque or docker-registry secret, optionally tagged with its owning
/// workflow so the sweeper claims it on workflow deletion.
pub fn secret_object(
    name: &str,
    namespace: &str,
    data: BTreeMap<String, String>,
    workflow: Option<&str>,
    secret_type: &str,
) -> Object {
    let labels = workflow
        .map(|wf| BTreeMap::from([(WORKFLOW_LABEL.to_string(), wf.to_string())]));
    Object::Secret(Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels,
            ..Default::default()
        },
        string_data: Some(data),
        type_: Some(secret_type.to_string()),
        ..Default::default()
    })
}

/// The workflow-scoped PAT secret referenced by init containers.
pub fn repo_secret_object(workflow: &str, namespace: &str, source: &SourceRef) -> Option<Object> {
    let token = source.token.as_ref()?;
    let data = BTreeMap::from([(source.provider.token_env().to_string(), token.clone())]);
    Some(secret_object(
        &repo_secret_name(workflow),
        namespace,
        data,
        Some(workflow),
        OPAQUE_SECRET_TYPE,
    ))
}

/// CronJob whose pod re-enters the CLI in `run` mode on schedule.
pub fn cron_runner_object(
    workflow: &str,
    namespace: &str,
    schedule: &str,
    source: &SourceRef,
    file: &str,
    version: &str,
    repo_secret: Option<&str>,
) -> Object {
    let labels = BTreeMap::from([(WORKFLOW_LABEL.to_string(), workflow.to_string())]);
    let mut args = vec![
        "run".to_string(),
        workflow.to_string(),
        source.url.clone(),
        "--namespace".to_string(),
        namespace.to_string(),
        "--branch".to_string(),
        source.branch.clone(),
        "--file".to_string(),
        file.to_string(),
    ];
    if let Some(id) = &source.project_id {
        args.push("--id".to_string());
        args.push(id.clone());
    }

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(format!("{RUNNER_IMAGE_REPO}:{version}")),
        image_pull_policy: Some("Always".to_string()),
        command: Some(vec!["bosun".to_string()]),
        args: Some(args),
        env_from: repo_secret.map(|secret| vec![secret_env(secret)]),
        ..Default::default()
    };

    let job_spec = JobSpec {
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels.clone()),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![container],
                restart_policy: Some("Never".to_string()),
                ..Default::default()
            }),
        },
        backoff_limit: Some(RUNNER_BACKOFF_LIMIT),
        ttl_seconds_after_finished: Some(RUNNER_TTL_AFTER_FINISHED),
        ..Default::default()
    };

    Object::CronJob(CronJob {
        metadata: ObjectMeta {
            name: Some(workflow.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            annotations: Some(BTreeMap::from([(
                URL_ANNOTATION.to_string(),
                source.url.clone(),
            )])),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule: schedule.to_string(),
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(job_spec),
            },
            successful_jobs_history_limit: Some(RUNNER_HISTORY_LIMIT),
            failed_jobs_history_limit: Some(RUNNER_HISTORY_LIMIT),
            ..Default::default()
        }),
        ..Default::default()
    })
}
