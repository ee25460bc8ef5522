//! Envoy bootstrap document synthesis
//!
//! Turns discovery coordinates into the static bootstrap that Envoy reads at
//! startup. Field names and nesting follow Envoy's v2 bootstrap schema and must
//! not change: the proxy parses this document directly.

use serde::{Deserialize, Serialize};

use crate::crd::DiscoverySpec;
use crate::error::Result;

/// Key under which the bootstrap document is stored in the ConfigMap
pub const BOOTSTRAP_KEY: &str = "envoy.yaml";

const API_TYPE: &str = "GRPC";
const NODE_CLUSTER: &str = "service_1";
const NODE_ID: &str = "test-id";
const CLUSTER_TYPE: &str = "STRICT_DNS";
const CONNECT_TIMEOUT: &str = "5s";
const ADMIN_ACCESS_LOG_PATH: &str = "/dev/stderr";
const ADMIN_ADDRESS: &str = "127.0.0.1";
const ADMIN_PORT: u16 = 15000;

/// Top-level bootstrap document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bootstrap {
    pub node: Node,
    pub static_resources: StaticResources,
    pub dynamic_resources: DynamicResources,
    pub admin: Admin,
}

/// Identity Envoy presents to the management server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub cluster: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticResources {
    pub clusters: Vec<Cluster>,
}

/// Statically defined upstream cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    #[serde(rename = "type")]
    pub cluster_type: String,
    pub connect_timeout: String,
    pub hosts: Vec<Host>,
    /// Present and empty to mark the cluster as HTTP/2, which gRPC streams need
    pub http2_protocol_options: Http2ProtocolOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Http2ProtocolOptions {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub socket_address: SocketAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketAddress {
    pub address: String,
    pub port_value: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicResources {
    pub ads_config: ApiConfigSource,
    pub cds_config: ConfigSource,
    pub lds_config: ConfigSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSource {
    pub api_config_source: ApiConfigSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfigSource {
    pub api_type: String,
    pub grpc_services: GrpcService,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrpcService {
    pub envoy_grpc: EnvoyGrpc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvoyGrpc {
    pub cluster_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admin {
    pub access_log_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_path: Option<String>,
    pub address: AdminAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAddress {
    pub socket_address: SocketAddress,
}

fn grpc_source(cluster_name: &str) -> ApiConfigSource {
    ApiConfigSource {
        api_type: API_TYPE.to_string(),
        grpc_services: GrpcService {
            envoy_grpc: EnvoyGrpc {
                cluster_name: cluster_name.to_string(),
            },
        },
    }
}

fn static_resources(discovery: &DiscoverySpec) -> StaticResources {
    StaticResources {
        clusters: vec![Cluster {
            name: discovery.service_name.clone(),
            cluster_type: CLUSTER_TYPE.to_string(),
            connect_timeout: CONNECT_TIMEOUT.to_string(),
            hosts: vec![Host {
                socket_address: SocketAddress {
                    address: discovery.host.clone(),
                    port_value: discovery.port,
                },
            }],
            http2_protocol_options: Http2ProtocolOptions::default(),
        }],
    }
}

fn dynamic_resources(discovery: &DiscoverySpec) -> DynamicResources {
    let cluster_name = discovery.service_name.as_str();
    DynamicResources {
        ads_config: grpc_source(cluster_name),
        cds_config: ConfigSource {
            api_config_source: grpc_source(cluster_name),
        },
        lds_config: ConfigSource {
            api_config_source: grpc_source(cluster_name),
        },
    }
}

fn admin() -> Admin {
    Admin {
        access_log_path: ADMIN_ACCESS_LOG_PATH.to_string(),
        profile_path: None,
        address: AdminAddress {
            socket_address: SocketAddress {
                address: ADMIN_ADDRESS.to_string(),
                port_value: ADMIN_PORT,
            },
        },
    }
}

/// Build the bootstrap document for a set of discovery coordinates
pub fn synthesize(discovery: &DiscoverySpec) -> Bootstrap {
    Bootstrap {
        node: Node {
            cluster: NODE_CLUSTER.to_string(),
            id: NODE_ID.to_string(),
        },
        static_resources: static_resources(discovery),
        dynamic_resources: dynamic_resources(discovery),
        admin: admin(),
    }
}

/// Serialize a bootstrap document for storage in the ConfigMap.
///
/// JSON is emitted; Envoy accepts it under a `.yaml` name since JSON is valid YAML.
pub fn render(bootstrap: &Bootstrap) -> Result<String> {
    Ok(serde_json::to_string(bootstrap)?)
}
