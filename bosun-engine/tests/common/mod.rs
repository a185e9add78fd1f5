//! In-memory fake cluster for engine tests
//!
//! Holds objects in a plain map, applies scripted mutations when their
//! (paused-clock) time arrives, and broadcasts ensured objects to watch
//! subscribers. Tests run under `#[tokio::test(start_paused = true)]`, so
//! scripted seconds elapse instantly and deterministically.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::DeploymentStatus;
use k8s_openapi::api::batch::v1::JobStatus;
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};

use bosun_k8s::{ClusterOps, Kind, Object, ObjectStream, Result, Selector};

pub type Store = HashMap<(Kind, String, String), Object>;

type Script = Box<dyn FnOnce(&mut Store) + Send>;

pub struct FakeCluster {
    start: Instant,
    store: Mutex<Store>,
    scripts: Mutex<Vec<(Duration, Script)>>,
    watch_tx: broadcast::Sender<Object>,
    logs: Mutex<HashMap<(String, String), String>>,
    /// Every ensure in arrival order, with elapsed time.
    pub ensured: Mutex<Vec<(Kind, String, String, Duration)>>,
    /// Every delete in arrival order, with elapsed time.
    pub deleted: Mutex<Vec<(Kind, String, String, Duration)>>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        let (watch_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            start: Instant::now(),
            store: Mutex::new(HashMap::new()),
            scripts: Mutex::new(Vec::new()),
            watch_tx,
            logs: Mutex::new(HashMap::new()),
            ensured: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        })
    }

    /// Schedule a store mutation at `secs` after cluster creation.
    pub fn at(&self, secs: u64, script: impl FnOnce(&mut Store) + Send + 'static) {
        self.scripts
            .lock()
            .unwrap()
            .push((Duration::from_secs(secs), Box::new(script)));
    }

    pub fn set_pod_logs(&self, namespace: &str, pod: &str, logs: &str) {
        self.logs
            .lock()
            .unwrap()
            .insert((namespace.to_string(), pod.to_string()), logs.to_string());
    }

    pub fn contains(&self, kind: Kind, namespace: &str, name: &str) -> bool {
        self.apply_due();
        self.store
            .lock()
            .unwrap()
            .contains_key(&(kind, namespace.to_string(), name.to_string()))
    }

    pub fn names_of(&self, kind: Kind) -> Vec<String> {
        self.apply_due();
        let mut names: Vec<String> = self
            .store
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, _, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn deleted_names(&self, kind: Kind) -> Vec<String> {
        self.deleted
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _, _, _)| *k == kind)
            .map(|(_, _, name, _)| name.clone())
            .collect()
    }

    pub fn deleted_at(&self, kind: Kind, name: &str) -> Option<Duration> {
        self.deleted
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _, n, _)| *k == kind && n == name)
            .map(|(_, _, _, at)| *at)
    }

    pub fn ensured_at(&self, kind: Kind, name: &str) -> Option<Duration> {
        self.ensured
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _, n, _)| *k == kind && n == name)
            .map(|(_, _, _, at)| *at)
    }

    fn apply_due(&self) {
        let now = self.start.elapsed();
        let mut scripts = self.scripts.lock().unwrap();
        let mut store = self.store.lock().unwrap();
        let mut remaining = Vec::new();
        for (at, script) in scripts.drain(..) {
            if at <= now {
                script(&mut store);
            } else {
                remaining.push((at, script));
            }
        }
        *scripts = remaining;
    }

    fn key(object: &Object) -> (Kind, String, String) {
        (
            object.kind(),
            object.namespace().to_string(),
            object.name().to_string(),
        )
    }
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn ensure(&self, object: Object) -> Result<()> {
        self.apply_due();
        let (kind, namespace, name) = Self::key(&object);
        self.ensured
            .lock()
            .unwrap()
            .push((kind, namespace.clone(), name.clone(), self.start.elapsed()));
        self.store
            .lock()
            .unwrap()
            .insert((kind, namespace, name), object.clone());
        let _ = self.watch_tx.send(object);
        Ok(())
    }

    async fn get(&self, kind: Kind, namespace: &str, name: &str) -> Result<Option<Object>> {
        self.apply_due();
        Ok(self
            .store
            .lock()
            .unwrap()
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list(&self, kind: Kind, namespace: &str, selector: &Selector) -> Result<Vec<Object>> {
        self.apply_due();
        let store = self.store.lock().unwrap();
        let mut objects: Vec<Object> = store
            .iter()
            .filter(|((k, ns, _), object)| {
                *k == kind && ns == namespace && selector.matches(object.labels())
            })
            .map(|(_, object)| object.clone())
            .collect();
        objects.sort_by_key(|o| o.name().to_string());
        Ok(objects)
    }

    async fn delete(&self, kind: Kind, namespace: &str, name: &str) -> Result<()> {
        self.apply_due();
        self.store
            .lock()
            .unwrap()
            .remove(&(kind, namespace.to_string(), name.to_string()));
        self.deleted
            .lock()
            .unwrap()
            .push((kind, namespace.to_string(), name.to_string(), self.start.elapsed()));
        Ok(())
    }

    async fn watch(
        &self,
        kind: Kind,
        namespace: &str,
        selector: &Selector,
    ) -> Result<ObjectStream> {
        let rx = self.watch_tx.subscribe();
        let namespace = namespace.to_string();
        let selector = selector.clone();
        let stream = futures::stream::unfold(
            (rx, kind, namespace, selector),
            |(mut rx, kind, namespace, selector)| async move {
                loop {
                    match rx.recv().await {
                        Ok(object) => {
                            if object.kind() == kind
                                && object.namespace() == namespace
                                && selector.matches(object.labels())
                            {
                                return Some((Ok(object), (rx, kind, namespace, selector)));
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            },
        )
        .boxed();
        Ok(stream)
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        _container: Option<&str>,
        _tail_lines: i64,
    ) -> Result<String> {
        self.apply_due();
        Ok(self
            .logs
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), pod.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Script helpers
// ---------------------------------------------------------------------------

/// A pod carrying the step's ownership labels, in the given phase.
pub fn step_pod(
    namespace: &str,
    name: &str,
    workflow: &str,
    stage: &str,
    step: &str,
    phase: &str,
) -> Object {
    let labels = BTreeMap::from([
        ("workflow".to_string(), workflow.to_string()),
        ("stage".to_string(), stage.to_string()),
        ("step".to_string(), step.to_string()),
    ]);
    Object::Pod(Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn insert(store: &mut Store, object: Object) {
    let key = (
        object.kind(),
        object.namespace().to_string(),
        object.name().to_string(),
    );
    store.insert(key, object);
}

pub fn set_job_status(
    store: &mut Store,
    namespace: &str,
    name: &str,
    succeeded: Option<i32>,
    failed: Option<i32>,
) {
    let key = (Kind::Job, namespace.to_string(), name.to_string());
    if let Some(Object::Job(job)) = store.get_mut(&key) {
        job.status = Some(JobStatus { succeeded, failed, ..Default::default() });
    }
}

pub fn set_deployment_available(store: &mut Store, namespace: &str, name: &str, available: i32) {
    let key = (Kind::Deployment, namespace.to_string(), name.to_string());
    if let Some(Object::Deployment(deployment)) = store.get_mut(&key) {
        deployment.status = Some(DeploymentStatus {
            available_replicas: Some(available),
            ..Default::default()
        });
    }
}
