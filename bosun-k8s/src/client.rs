//! Cluster client
//!
//! [`ClusterOps`] is the only doorway between the engine and Kubernetes:
//! create-or-replace, read, list, delete, watch and pod logs, over the fixed
//! set of kinds in [`Kind`]. The engine never holds raw `kube` types, which
//! keeps the fake used in tests honest.

use std::fmt::Debug;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams, WatchEvent, WatchParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ClusterError, Result};
use crate::object::{Kind, Object};
use crate::selector::Selector;

/// A finite, restartable stream of object snapshots from a watch call.
pub type ObjectStream = BoxStream<'static, Result<Object>>;

/// Capability surface over the cluster.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Create the object, or replace it by name if it already exists.
    async fn ensure(&self, object: Object) -> Result<()>;

    /// Read one object; `Ok(None)` when absent.
    async fn get(&self, kind: Kind, namespace: &str, name: &str) -> Result<Option<Object>>;

    /// List objects of a kind matching the selector.
    async fn list(&self, kind: Kind, namespace: &str, selector: &Selector) -> Result<Vec<Object>>;

    /// Delete one object; deleting an absent object is success.
    async fn delete(&self, kind: Kind, namespace: &str, name: &str) -> Result<()>;

    /// Watch objects of a kind matching the selector. The stream is finite
    /// (the server eventually closes it) and the call is restartable.
    async fn watch(&self, kind: Kind, namespace: &str, selector: &Selector)
        -> Result<ObjectStream>;

    /// Read the tail of a pod's logs. Pods or containers that do not exist
    /// (yet) yield an empty string rather than an error.
    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: i64,
    ) -> Result<String>;
}

/// Namespaced kinds the generic helpers below can serve.
trait NamespacedKind:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + DeserializeOwned
    + Serialize
    + Debug
    + Send
    + Sync
    + 'static
{
}

impl<T> NamespacedKind for T where
    T: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static
{
}

/// The real client, backed by `kube`. `KUBECONFIG` (or in-cluster service
/// account credentials) select the target cluster.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|err| ClusterError::Config(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: NamespacedKind>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn ensure_in<K: NamespacedKind>(&self, mut desired: K) -> Result<()> {
        let namespace = desired.meta().namespace.clone().unwrap_or_default();
        let name = desired.meta().name.clone().unwrap_or_default();
        let api = self.api::<K>(&namespace);
        match api.create(&PostParams::default(), &desired).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                // Replace requires the live resourceVersion.
                let existing = api.get(&name).await?;
                desired.meta_mut().resource_version = existing.meta().resource_version.clone();
                api.replace(&name, &PostParams::default(), &desired).await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_in<K: NamespacedKind>(
        &self,
        namespace: &str,
        name: &str,
        wrap: fn(K) -> Object,
    ) -> Result<Option<Object>> {
        Ok(self.api::<K>(namespace).get_opt(name).await?.map(wrap))
    }

    async fn list_in<K: NamespacedKind>(
        &self,
        namespace: &str,
        selector: &Selector,
        wrap: fn(K) -> Object,
    ) -> Result<Vec<Object>> {
        let list = self
            .api::<K>(namespace)
            .list(&list_params(selector))
            .await?;
        Ok(list.items.into_iter().map(wrap).collect())
    }

    async fn delete_in<K: NamespacedKind>(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = ClusterError::from(err);
                if err.is_not_found() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn watch_in<K: NamespacedKind>(
        &self,
        namespace: &str,
        selector: &Selector,
        wrap: fn(K) -> Object,
    ) -> Result<ObjectStream> {
        let params = WatchParams::default().labels(&selector.to_query());
        let events = self.api::<K>(namespace).watch(&params, "0").await?;
        let stream = events
            .map_err(ClusterError::from)
            .try_filter_map(move |event| async move {
                Ok(match event {
                    WatchEvent::Added(obj) | WatchEvent::Modified(obj) => Some(wrap(obj)),
                    _ => None,
                })
            })
            .boxed();
        Ok(stream)
    }

    async fn ensure_namespace(&self, namespace: Namespace) -> Result<()> {
        let api = Api::<Namespace>::all(self.client.clone());
        match api.create(&PostParams::default(), &namespace).await {
            Ok(_) => Ok(()),
            // A namespace has no spec worth replacing.
            Err(kube::Error::Api(response)) if response.code == 409 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn list_params(selector: &Selector) -> ListParams {
    if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(&selector.to_query())
    }
}

#[async_trait]
impl ClusterOps for KubeCluster {
    async fn ensure(&self, object: Object) -> Result<()> {
        match object {
            Object::Namespace(o) => self.ensure_namespace(o).await,
            Object::Secret(o) => self.ensure_in(o).await,
            Object::Job(o) => self.ensure_in(o).await,
            Object::Deployment(o) => self.ensure_in(o).await,
            Object::Service(o) => self.ensure_in(o).await,
            Object::Ingress(o) => self.ensure_in(o).await,
            Object::CronJob(o) => self.ensure_in(o).await,
            Object::Pod(o) => self.ensure_in(o).await,
        }
    }

    async fn get(&self, kind: Kind, namespace: &str, name: &str) -> Result<Option<Object>> {
        match kind {
            Kind::Namespace => {
                let api = Api::<Namespace>::all(self.client.clone());
                Ok(api.get_opt(name).await?.map(Object::Namespace))
            }
            Kind::Secret => self.get_in(namespace, name, Object::Secret).await,
            Kind::Job => self.get_in(namespace, name, Object::Job).await,
            Kind::Deployment => self.get_in(namespace, name, Object::Deployment).await,
            Kind::Service => self.get_in(namespace, name, Object::Service).await,
            Kind::Ingress => self.get_in(namespace, name, Object::Ingress).await,
            Kind::CronJob => self.get_in(namespace, name, Object::CronJob).await,
            Kind::Pod => self.get_in(namespace, name, Object::Pod).await,
        }
    }

    async fn list(&self, kind: Kind, namespace: &str, selector: &Selector) -> Result<Vec<Object>> {
        match kind {
            Kind::Namespace => {
                let api = Api::<Namespace>::all(self.client.clone());
                let list = api.list(&list_params(selector)).await?;
                Ok(list.items.into_iter().map(Object::Namespace).collect())
            }
            Kind::Secret => self.list_in(namespace, selector, Object::Secret).await,
            Kind::Job => self.list_in(namespace, selector, Object::Job).await,
            Kind::Deployment => self.list_in(namespace, selector, Object::Deployment).await,
            Kind::Service => self.list_in(namespace, selector, Object::Service).await,
            Kind::Ingress => self.list_in(namespace, selector, Object::Ingress).await,
            Kind::CronJob => self.list_in(namespace, selector, Object::CronJob).await,
            Kind::Pod => self.list_in(namespace, selector, Object::Pod).await,
        }
    }

    async fn delete(&self, kind: Kind, namespace: &str, name: &str) -> Result<()> {
        match kind {
            Kind::Namespace => {
                let api = Api::<Namespace>::all(self.client.clone());
                match api.delete(name, &DeleteParams::background()).await {
                    Ok(_) => Ok(()),
                    Err(err) => {
                        let err = ClusterError::from(err);
                        if err.is_not_found() {
                            Ok(())
                        } else {
                            Err(err)
                        }
                    }
                }
            }
            Kind::Secret => self.delete_in::<Secret>(namespace, name).await,
            Kind::Job => self.delete_in::<Job>(namespace, name).await,
            Kind::Deployment => self.delete_in::<Deployment>(namespace, name).await,
            Kind::Service => self.delete_in::<Service>(namespace, name).await,
            Kind::Ingress => self.delete_in::<Ingress>(namespace, name).await,
            Kind::CronJob => self.delete_in::<CronJob>(namespace, name).await,
            Kind::Pod => self.delete_in::<Pod>(namespace, name).await,
        }
    }

    async fn watch(
        &self,
        kind: Kind,
        namespace: &str,
        selector: &Selector,
    ) -> Result<ObjectStream> {
        match kind {
            Kind::Namespace => {
                let params = WatchParams::default().labels(&selector.to_query());
                let api = Api::<Namespace>::all(self.client.clone());
                let events = api.watch(&params, "0").await?;
                Ok(events
                    .map_err(ClusterError::from)
                    .try_filter_map(|event| async move {
                        Ok(match event {
                            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                                Some(Object::Namespace(obj))
                            }
                            _ => None,
                        })
                    })
                    .boxed())
            }
            Kind::Secret => self.watch_in(namespace, selector, Object::Secret).await,
            Kind::Job => self.watch_in(namespace, selector, Object::Job).await,
            Kind::Deployment => self.watch_in(namespace, selector, Object::Deployment).await,
            Kind::Service => self.watch_in(namespace, selector, Object::Service).await,
            Kind::Ingress => self.watch_in(namespace, selector, Object::Ingress).await,
            Kind::CronJob => self.watch_in(namespace, selector, Object::CronJob).await,
            Kind::Pod => self.watch_in(namespace, selector, Object::Pod).await,
        }
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: i64,
    ) -> Result<String> {
        let api: Api<Pod> = self.api(namespace);
        let params = LogParams {
            container: container.map(String::from),
            tail_lines: Some(tail_lines),
            ..Default::default()
        };
        match api.logs(pod, &params).await {
            Ok(logs) => Ok(logs),
            Err(err) => {
                let err = ClusterError::from(err);
                match &err {
                    // Absent pods and not-yet-started containers have no
                    // logs to offer; that is not a step failure.
                    ClusterError::Api { status: 404, .. }
                    | ClusterError::Api { status: 400, .. } => Ok(String::new()),
                    _ => Err(err),
                }
            }
        }
    }
}
