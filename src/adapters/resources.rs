//! Child resource builders
//!
//! Converts an Envoy spec into the ConfigMap, Deployment and Service that run
//! the proxy. Names are derived from the spec on every call and never cached.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, PodSpec, PodTemplateSpec, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::Resource;

use crate::crd::Envoy;
use crate::error::Result;

use super::bootstrap::{self, BOOTSTRAP_KEY};

/// Default proxy image
pub const DEFAULT_IMAGE: &str = "envoyproxy/envoy:v1.10.0";

const CONTAINER_NAME: &str = "envoy";
const CONFIG_VOLUME: &str = "envoy-yaml";
const CONFIG_MOUNT_PATH: &str = "/etc/envoy.yaml";
const PORT_NAME: &str = "http";
const CONTAINER_PORT: i32 = 8080;
const SERVICE_PORT: i32 = 80;

const LABEL_NAME: &str = "app.kubernetes.io/name";
const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Settings applied to every generated Deployment
#[derive(Debug, Clone)]
pub struct WorkloadSettings {
    /// Container image for the proxy
    pub image: String,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
        }
    }
}

/// Labels selecting the pods of one Envoy
pub fn selector_labels(envoy: &Envoy) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), "envoy".to_string()),
        (LABEL_INSTANCE.to_string(), envoy.spec.name.clone()),
    ])
}

fn labels(envoy: &Envoy) -> BTreeMap<String, String> {
    let mut labels = selector_labels(envoy);
    labels.insert(LABEL_MANAGED_BY.to_string(), "envoy-operator".to_string());
    labels
}

/// Metadata shared by all children: name, labels and a controller owner
/// reference so Kubernetes garbage-collects the children with their Envoy.
fn child_metadata(envoy: &Envoy, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: envoy.meta().namespace.clone(),
        labels: Some(labels(envoy)),
        owner_references: envoy.controller_owner_ref(&()).map(|owner| vec![owner]),
        ..Default::default()
    }
}

/// ConfigMap holding the rendered bootstrap document
pub fn config_map(envoy: &Envoy) -> Result<ConfigMap> {
    let document = bootstrap::render(&bootstrap::synthesize(&envoy.spec.discovery))?;

    Ok(ConfigMap {
        metadata: child_metadata(envoy, &envoy.spec.config_map_name),
        data: Some(BTreeMap::from([(BOOTSTRAP_KEY.to_string(), document)])),
        ..Default::default()
    })
}

/// Deployment running the proxy with the bootstrap ConfigMap mounted
pub fn deployment(envoy: &Envoy, settings: &WorkloadSettings) -> Deployment {
    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(settings.image.clone()),
        command: Some(vec!["envoy".to_string()]),
        args: Some(vec!["-c".to_string(), CONFIG_MOUNT_PATH.to_string()]),
        ports: Some(vec![ContainerPort {
            name: Some(PORT_NAME.to_string()),
            protocol: Some("TCP".to_string()),
            container_port: CONTAINER_PORT,
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: CONFIG_MOUNT_PATH.to_string(),
            sub_path: Some(BOOTSTRAP_KEY.to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Deployment {
        metadata: child_metadata(envoy, &envoy.spec.name),
        spec: Some(DeploymentSpec {
            replicas: Some(envoy.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(envoy)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(envoy)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: CONFIG_VOLUME.to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: envoy.spec.config_map_name.clone(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service exposing the proxy's HTTP port
pub fn service(envoy: &Envoy) -> Service {
    Service {
        metadata: child_metadata(envoy, &envoy.spec.name),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME.to_string()),
                protocol: Some("TCP".to_string()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::Int(CONTAINER_PORT)),
                ..Default::default()
            }]),
            selector: Some(selector_labels(envoy)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Desired replica count recorded on a live Deployment
pub fn desired_replicas(deployment: &Deployment) -> Option<i32> {
    deployment.spec.as_ref().and_then(|s| s.replicas)
}

/// Available replicas observed on a Deployment
pub fn available_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{DiscoverySpec, EnvoySpec};

    fn envoy(uid: Option<&str>) -> Envoy {
        let mut envoy = Envoy::new(
            "front-proxy",
            EnvoySpec {
                name: "edge".to_string(),
                config_map_name: "edge-bootstrap".to_string(),
                replicas: 3,
                discovery: DiscoverySpec {
                    service_name: "xds".to_string(),
                    host: "xds.svc".to_string(),
                    port: 18000,
                },
            },
        );
        envoy.metadata.namespace = Some("proxies".to_string());
        envoy.metadata.uid = uid.map(str::to_string);
        envoy
    }

    #[test]
    fn test_config_map_holds_bootstrap_under_fixed_key() {
        let cm = config_map(&envoy(None)).unwrap();

        assert_eq!(cm.metadata.name.as_deref(), Some("edge-bootstrap"));
        let data = cm.data.unwrap();
        assert_eq!(data.len(), 1);
        let doc: serde_json::Value = serde_json::from_str(&data["envoy.yaml"]).unwrap();
        assert_eq!(doc["static_resources"]["clusters"][0]["name"], "xds");
    }

    #[test]
    fn test_deployment_references_config_map() {
        let d = deployment(&envoy(None), &WorkloadSettings::default());

        assert_eq!(d.metadata.name.as_deref(), Some("edge"));
        assert_eq!(desired_replicas(&d), Some(3));
        let pod = d.spec.unwrap().template.spec.unwrap();
        let volume = &pod.volumes.unwrap()[0];
        assert_eq!(volume.config_map.as_ref().unwrap().name, "edge-bootstrap");
        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some(DEFAULT_IMAGE));
        assert_eq!(
            container.volume_mounts.as_ref().unwrap()[0].sub_path.as_deref(),
            Some("envoy.yaml")
        );
    }

    #[test]
    fn test_service_selects_deployment_pods() {
        let e = envoy(None);
        let svc = service(&e);
        let d = deployment(&e, &WorkloadSettings::default());

        let spec = svc.spec.unwrap();
        assert_eq!(spec.selector, d.spec.unwrap().selector.match_labels);
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 80);
        assert_eq!(port.target_port, Some(IntOrString::Int(8080)));
    }

    #[test]
    fn test_owner_reference_set_when_uid_known() {
        let cm = config_map(&envoy(Some("1234"))).unwrap();
        let owners = cm.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Envoy");
        assert_eq!(owners[0].uid, "1234");
        assert_eq!(owners[0].controller, Some(true));

        assert!(service(&envoy(None)).metadata.owner_references.is_none());
    }

    #[test]
    fn test_available_replicas_defaults_to_zero() {
        assert_eq!(available_replicas(&Deployment::default()), 0);
    }
}
