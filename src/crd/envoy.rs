//! Envoy Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Envoy resource specification
///
/// Equality is structural over the spec fields only; the watcher relies on it to
/// drop update events that carry no change to desired state.
#[derive(CustomResource, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "example.com",
    version = "v1",
    kind = "Envoy",
    plural = "envoys",
    singular = "envoy",
    namespaced,
    status = "EnvoyStatus",
    printcolumn = r#"{"name": "Desired", "type": "integer", "jsonPath": ".spec.replicas"}"#,
    printcolumn = r#"{"name": "Available", "type": "integer", "jsonPath": ".status.availableReplicas"}"#,
    printcolumn = r#"{"name": "ConfigMap", "type": "string", "jsonPath": ".spec.configMapName"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EnvoySpec {
    /// Name shared by the Deployment and Service
    pub name: String,

    /// Name of the ConfigMap holding the bootstrap document
    pub config_map_name: String,

    /// Desired number of proxy replicas
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Upstream xDS management server coordinates
    pub discovery: DiscoverySpec,
}

fn default_replicas() -> i32 {
    1
}

/// Discovery coordinates of the xDS management server
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySpec {
    /// Cluster name the dynamic discovery stanzas point at
    pub service_name: String,

    /// Hostname of the management server
    pub host: String,

    /// Port of the management server
    pub port: u16,
}

/// Envoy status
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyStatus {
    /// Available replicas observed on the Deployment
    #[serde(default)]
    pub available_replicas: i32,
}

impl Envoy {
    /// Available replicas currently recorded in status
    pub fn recorded_available_replicas(&self) -> Option<i32> {
        self.status.as_ref().map(|s| s.available_replicas)
    }
}
