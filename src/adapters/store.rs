//! Store abstractions over the Kubernetes API
//!
//! The reconciler only talks to these traits, so tests can swap in in-memory
//! stores while production uses the real client.

use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Patch, PatchParams, PostParams},
    runtime::reflector::{ObjectRef, Store},
    Api, Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use crate::crd::Envoy;
use crate::error::{Error, Result};

/// Field manager recorded on every write
pub const FIELD_MANAGER: &str = "envoy-operator";

/// Get/create/replace access to one kind of child resource
///
/// `get` must report a missing object as [`Error::NotFound`] so callers can
/// tell it apart from every other failure.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    /// Fetch an object by namespace and name
    async fn get(&self, namespace: &str, name: &str) -> Result<K>;

    /// Create a new object
    async fn create(&self, namespace: &str, obj: &K) -> Result<K>;

    /// Replace an existing object as a whole
    async fn update(&self, namespace: &str, obj: &K) -> Result<K>;
}

/// Read access to managed resources plus their status sink
#[async_trait]
pub trait ManagedStore<K>: Send + Sync {
    /// Fetch the current desired state by namespace and name
    async fn get(&self, namespace: &str, name: &str) -> Result<K>;

    /// Persist the object's status
    async fn update_status(&self, namespace: &str, obj: &K) -> Result<K>;
}

/// [`ObjectStore`] backed by the Kubernetes API
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await?
            .ok_or_else(|| Error::not_found(K::kind(&()), format!("{}/{}", namespace, name)))
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&post_params(), obj).await?)
    }

    async fn update(&self, namespace: &str, obj: &K) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.replace(&obj.name_any(), &post_params(), obj).await?)
    }
}

/// [`ManagedStore`] for Envoy resources that reads from the watcher's cache
pub struct CachedEnvoyStore {
    client: Client,
    cache: Store<Envoy>,
}

impl CachedEnvoyStore {
    pub fn new(client: Client, cache: Store<Envoy>) -> Self {
        Self { client, cache }
    }
}

#[async_trait]
impl ManagedStore<Envoy> for CachedEnvoyStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Envoy> {
        self.cache
            .get(&ObjectRef::new(name).within(namespace))
            .map(|envoy| envoy.as_ref().clone())
            .ok_or_else(|| Error::not_found("Envoy", format!("{}/{}", namespace, name)))
    }

    async fn update_status(&self, namespace: &str, obj: &Envoy) -> Result<Envoy> {
        let api: Api<Envoy> = Api::namespaced(self.client.clone(), namespace);
        // The CRD serves status as a subresource, so the whole status object is
        // sent to the status endpoint without a resourceVersion precondition.
        let status = json!({ "status": obj.status });
        Ok(api
            .patch_status(
                &obj.name_any(),
                &PatchParams {
                    field_manager: Some(FIELD_MANAGER.to_string()),
                    ..Default::default()
                },
                &Patch::Merge(status),
            )
            .await?)
    }
}
