//! Uniform object model over the kinds the engine manages

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

/// The fixed set of kinds the engine creates, reads or deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Namespace,
    Secret,
    Job,
    Deployment,
    Service,
    Ingress,
    CronJob,
    Pod,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Namespace => "Namespace",
            Kind::Secret => "Secret",
            Kind::Job => "Job",
            Kind::Deployment => "Deployment",
            Kind::Service => "Service",
            Kind::Ingress => "Ingress",
            Kind::CronJob => "CronJob",
            Kind::Pod => "Pod",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One manifest of any managed kind, with uniform metadata access.
#[derive(Debug, Clone)]
pub enum Object {
    Namespace(Namespace),
    Secret(Secret),
    Job(Job),
    Deployment(Deployment),
    Service(Service),
    Ingress(Ingress),
    CronJob(CronJob),
    Pod(Pod),
}

impl Object {
    pub fn kind(&self) -> Kind {
        match self {
            Object::Namespace(_) => Kind::Namespace,
            Object::Secret(_) => Kind::Secret,
            Object::Job(_) => Kind::Job,
            Object::Deployment(_) => Kind::Deployment,
            Object::Service(_) => Kind::Service,
            Object::Ingress(_) => Kind::Ingress,
            Object::CronJob(_) => Kind::CronJob,
            Object::Pod(_) => Kind::Pod,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Object::Namespace(o) => &o.metadata,
            Object::Secret(o) => &o.metadata,
            Object::Job(o) => &o.metadata,
            Object::Deployment(o) => &o.metadata,
            Object::Service(o) => &o.metadata,
            Object::Ingress(o) => &o.metadata,
            Object::CronJob(o) => &o.metadata,
            Object::Pod(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Object::Namespace(o) => &mut o.metadata,
            Object::Secret(o) => &mut o.metadata,
            Object::Job(o) => &mut o.metadata,
            Object::Deployment(o) => &mut o.metadata,
            Object::Service(o) => &mut o.metadata,
            Object::Ingress(o) => &mut o.metadata,
            Object::CronJob(o) => &mut o.metadata,
            Object::Pod(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Empty for cluster-scoped objects (namespaces).
    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    pub fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata().labels.as_ref()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels().and_then(|l| l.get(key)).map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata()
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    pub fn creation_timestamp(&self) -> Option<&Time> {
        self.metadata().creation_timestamp.as_ref()
    }

    pub fn as_job(&self) -> Option<&Job> {
        match self {
            Object::Job(job) => Some(job),
            _ => None,
        }
    }

    pub fn as_deployment(&self) -> Option<&Deployment> {
        match self {
            Object::Deployment(deployment) => Some(deployment),
            _ => None,
        }
    }

    pub fn as_service(&self) -> Option<&Service> {
        match self {
            Object::Service(service) => Some(service),
            _ => None,
        }
    }

    pub fn as_ingress(&self) -> Option<&Ingress> {
        match self {
            Object::Ingress(ingress) => Some(ingress),
            _ => None,
        }
    }

    pub fn as_secret(&self) -> Option<&Secret> {
        match self {
            Object::Secret(secret) => Some(secret),
            _ => None,
        }
    }

    pub fn as_cron_job(&self) -> Option<&CronJob> {
        match self {
            Object::CronJob(cron) => Some(cron),
            _ => None,
        }
    }

    pub fn as_pod(&self) -> Option<&Pod> {
        match self {
            Object::Pod(pod) => Some(pod),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_access() {
        let job = Job {
            metadata: ObjectMeta {
                name: Some("wf-train-sarimax".to_string()),
                namespace: Some("bosun".to_string()),
                labels: Some(BTreeMap::from([("workflow".to_string(), "wf".to_string())])),
                ..Default::default()
            },
            ..Default::default()
        };
        let object = Object::Job(job);
        assert_eq!(object.kind(), Kind::Job);
        assert_eq!(object.name(), "wf-train-sarimax");
        assert_eq!(object.namespace(), "bosun");
        assert_eq!(object.label("workflow"), Some("wf"));
        assert!(object.as_job().is_some());
        assert!(object.as_deployment().is_none());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(Kind::CronJob.to_string(), "CronJob");
    }
}
