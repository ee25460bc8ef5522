//! Kubernetes controller for the Envoy CRD
//!
//! This module wires the watcher, the work queue and the worker pool that
//! together drive reconciliation.

pub mod dispatcher;
mod envoy_controller;
pub mod watcher;

pub use envoy_controller::run as run_envoy_controller;

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::reflector::Store;
use kube::Client;

use crate::adapters::{CachedEnvoyStore, KubeStore, ManagedStore, ObjectStore, WorkloadSettings};
use crate::crd::Envoy;
use crate::queue::ExponentialBackoff;

/// Shared context handed to every worker
pub struct Context {
    /// Envoy resources (desired state and status sink)
    pub envoys: Arc<dyn ManagedStore<Envoy>>,
    /// Bootstrap ConfigMaps
    pub config_maps: Arc<dyn ObjectStore<ConfigMap>>,
    /// Proxy Deployments
    pub deployments: Arc<dyn ObjectStore<Deployment>>,
    /// Proxy Services
    pub services: Arc<dyn ObjectStore<Service>>,
    /// Settings applied to generated Deployments
    pub workload: WorkloadSettings,
}

impl Context {
    /// Create a context backed by the Kubernetes API and the Envoy cache
    pub fn new(client: Client, cache: Store<Envoy>, workload: WorkloadSettings) -> Self {
        Self {
            envoys: Arc::new(CachedEnvoyStore::new(client.clone(), cache)),
            config_maps: Arc::new(KubeStore::<ConfigMap>::new(client.clone())),
            deployments: Arc::new(KubeStore::<Deployment>::new(client.clone())),
            services: Arc::new(KubeStore::<Service>::new(client)),
            workload,
        }
    }
}

/// Runtime settings of the controller
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    /// Number of concurrent workers
    pub workers: usize,
    /// Per-key failure backoff
    pub backoff: ExponentialBackoff,
    /// How long to wait for in-flight reconciles on shutdown
    pub drain_timeout: Duration,
    /// Settings applied to generated Deployments
    pub workload: WorkloadSettings,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            namespace: None,
            workers: 2,
            backoff: ExponentialBackoff::default(),
            drain_timeout: Duration::from_secs(30),
            workload: WorkloadSettings::default(),
        }
    }
}
