//! In-memory stores that record every call made against them

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use envoy_operator::adapters::{ManagedStore, ObjectStore, WorkloadSettings};
use envoy_operator::controllers::Context;
use envoy_operator::crd::{DiscoverySpec, Envoy, EnvoySpec, EnvoyStatus};
use envoy_operator::{Error, Result};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::ResourceExt;

pub const NAMESPACE: &str = "proxies";
pub const ENVOY_NAME: &str = "front-proxy";

/// One call issued against a fake store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Get(&'static str, String),
    Create(&'static str, String),
    Update(&'static str, String),
    UpdateStatus(String),
}

impl Call {
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Call::Get(..))
    }
}

/// Shared, ordered record of calls across all stores
#[derive(Default)]
pub struct CallLog(Mutex<Vec<Call>>);

impl CallLog {
    fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn mutating(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// Fake child-resource store keyed by (namespace, name)
pub struct FakeStore<K> {
    kind: &'static str,
    log: Arc<CallLog>,
    objects: Mutex<BTreeMap<(String, String), K>>,
    get_error: Mutex<Option<String>>,
    create_error: Mutex<Option<u16>>,
    update_error: Mutex<Option<u16>>,
    /// Applied to objects on create and update, standing in for the API server
    on_write: fn(&mut K),
}

impl<K: Clone> FakeStore<K> {
    pub fn new(kind: &'static str, log: Arc<CallLog>, on_write: fn(&mut K)) -> Self {
        Self {
            kind,
            log,
            objects: Mutex::new(BTreeMap::new()),
            get_error: Mutex::new(None),
            create_error: Mutex::new(None),
            update_error: Mutex::new(None),
            on_write,
        }
    }

    pub fn insert(&self, namespace: &str, name: &str, obj: K) {
        self.objects
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), obj);
    }

    pub fn object(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Make every `get` fail with a non-NotFound error until cleared
    pub fn fail_gets(&self, message: Option<&str>) {
        *self.get_error.lock().unwrap() = message.map(str::to_string);
    }

    /// Make every `create` fail with an API error of the given status code until cleared
    pub fn fail_creates(&self, code: Option<u16>) {
        *self.create_error.lock().unwrap() = code;
    }

    /// Make every `update` fail with an API error of the given status code until cleared
    pub fn fail_updates(&self, code: Option<u16>) {
        *self.update_error.lock().unwrap() = code;
    }
}

/// Error the Kubernetes client reports for a rejected request
pub fn api_error(code: u16) -> Error {
    Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("request rejected with {}", code),
        reason: if code == 404 { "NotFound" } else { "InternalError" }.to_string(),
        code,
    }))
}

#[async_trait]
impl<K> ObjectStore<K> for FakeStore<K>
where
    K: kube::Resource + Clone + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K> {
        self.log.push(Call::Get(self.kind, name.to_string()));
        if let Some(message) = self.get_error.lock().unwrap().clone() {
            return Err(Error::store(message));
        }
        self.object(namespace, name)
            .ok_or_else(|| Error::not_found(self.kind, format!("{}/{}", namespace, name)))
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.name_any();
        self.log.push(Call::Create(self.kind, name.clone()));
        if let Some(code) = *self.create_error.lock().unwrap() {
            return Err(api_error(code));
        }
        let mut stored = obj.clone();
        (self.on_write)(&mut stored);
        self.insert(namespace, &name, stored.clone());
        Ok(stored)
    }

    async fn update(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.name_any();
        self.log.push(Call::Update(self.kind, name.clone()));
        if let Some(code) = *self.update_error.lock().unwrap() {
            return Err(api_error(code));
        }
        let mut stored = obj.clone();
        (self.on_write)(&mut stored);
        self.insert(namespace, &name, stored.clone());
        Ok(stored)
    }
}

/// Fake Envoy store with hooks for dispatcher tests
pub struct FakeEnvoys {
    log: Arc<CallLog>,
    objects: Mutex<BTreeMap<(String, String), Envoy>>,
    get_error: Mutex<Option<String>>,
    panic_on_get: AtomicBool,
    on_get: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl FakeEnvoys {
    fn new(log: Arc<CallLog>) -> Self {
        Self {
            log,
            objects: Mutex::new(BTreeMap::new()),
            get_error: Mutex::new(None),
            panic_on_get: AtomicBool::new(false),
            on_get: Mutex::new(None),
        }
    }

    pub fn insert(&self, envoy: Envoy) {
        let key = (envoy.namespace().unwrap(), envoy.name_any());
        self.objects.lock().unwrap().insert(key, envoy);
    }

    pub fn object(&self, namespace: &str, name: &str) -> Option<Envoy> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn fail_gets(&self, message: Option<&str>) {
        *self.get_error.lock().unwrap() = message.map(str::to_string);
    }

    pub fn panic_on_get(&self, panic: bool) {
        self.panic_on_get.store(panic, Ordering::SeqCst);
    }

    /// Run `hook` inside every `get`, e.g. to simulate a change mid-reconcile
    pub fn on_get(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_get.lock().unwrap() = Some(Box::new(hook));
    }
}

#[async_trait]
impl ManagedStore<Envoy> for FakeEnvoys {
    async fn get(&self, namespace: &str, name: &str) -> Result<Envoy> {
        self.log.push(Call::Get("Envoy", name.to_string()));
        if self.panic_on_get.load(Ordering::SeqCst) {
            panic!("envoy store exploded");
        }
        if let Some(hook) = self.on_get.lock().unwrap().as_ref() {
            hook();
        }
        if let Some(message) = self.get_error.lock().unwrap().clone() {
            return Err(Error::store(message));
        }
        self.object(namespace, name)
            .ok_or_else(|| Error::not_found("Envoy", format!("{}/{}", namespace, name)))
    }

    async fn update_status(&self, _namespace: &str, obj: &Envoy) -> Result<Envoy> {
        self.log.push(Call::UpdateStatus(obj.name_any()));
        self.insert(obj.clone());
        Ok(obj.clone())
    }
}

/// Pretend the API server immediately reports all but one replica available
fn observe_deployment(deployment: &mut Deployment) {
    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    deployment.status = Some(DeploymentStatus {
        replicas: Some(desired),
        available_replicas: Some((desired - 1).max(0)),
        ..Default::default()
    });
}

fn no_op<K>(_: &mut K) {}

/// A complete fake cluster sharing one call log
pub struct FakeCluster {
    pub log: Arc<CallLog>,
    pub envoys: Arc<FakeEnvoys>,
    pub config_maps: Arc<FakeStore<ConfigMap>>,
    pub deployments: Arc<FakeStore<Deployment>>,
    pub services: Arc<FakeStore<Service>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        let log = Arc::new(CallLog::default());
        Self {
            envoys: Arc::new(FakeEnvoys::new(log.clone())),
            config_maps: Arc::new(FakeStore::new("ConfigMap", log.clone(), no_op)),
            deployments: Arc::new(FakeStore::new("Deployment", log.clone(), observe_deployment)),
            services: Arc::new(FakeStore::new("Service", log.clone(), no_op)),
            log,
        }
    }

    pub fn context(&self) -> Context {
        Context {
            envoys: self.envoys.clone(),
            config_maps: self.config_maps.clone(),
            deployments: self.deployments.clone(),
            services: self.services.clone(),
            workload: WorkloadSettings::default(),
        }
    }
}

pub fn envoy_spec(replicas: i32) -> EnvoySpec {
    EnvoySpec {
        name: "edge".to_string(),
        config_map_name: "edge-bootstrap".to_string(),
        replicas,
        discovery: DiscoverySpec {
            service_name: "xds_cluster".to_string(),
            host: "xds.control-plane.svc".to_string(),
            port: 18000,
        },
    }
}

pub fn envoy(spec: EnvoySpec) -> Envoy {
    let mut envoy = Envoy::new(ENVOY_NAME, spec);
    envoy.metadata.namespace = Some(NAMESPACE.to_string());
    envoy.metadata.uid = Some("0b7e7c1a-5c1f-4d4e-9f77-6f0f8c0b1a2d".to_string());
    envoy
}

pub fn with_status(mut envoy: Envoy, available_replicas: i32) -> Envoy {
    envoy.status = Some(EnvoyStatus { available_replicas });
    envoy
}
