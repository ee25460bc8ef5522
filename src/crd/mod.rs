//! Custom Resource Definitions for the Envoy Operator

mod envoy;

pub use envoy::*;

use kube::CustomResourceExt;

use crate::error::Result;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>> {
    let crds = vec![Envoy::crd()];
    crds.iter()
        .map(|crd| serde_yaml::to_string(crd).map_err(|e| crate::Error::config(e.to_string())))
        .collect()
}
