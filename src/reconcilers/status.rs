//! Envoy status writer

use k8s_openapi::api::apps::v1::Deployment;
use tracing::info;

use crate::adapters::available_replicas;
use crate::controllers::Context;
use crate::crd::{Envoy, EnvoyStatus};
use crate::error::Result;

use super::envoy::ChildAction;

/// Whether the recorded status has to be rewritten.
///
/// Always true after the Deployment was created or updated. Otherwise only when
/// the observed available count drifted from what status records, so an
/// unchanged cluster produces no writes.
pub fn needs_write_back(envoy: &Envoy, deployment: &Deployment, action: ChildAction) -> bool {
    match action {
        ChildAction::Created | ChildAction::Updated => true,
        ChildAction::Unchanged => {
            envoy.recorded_available_replicas() != Some(available_replicas(deployment))
        }
    }
}

/// Copy the Deployment's available replicas into the Envoy status and persist it
pub async fn write_back(
    namespace: &str,
    envoy: &Envoy,
    deployment: &Deployment,
    ctx: &Context,
) -> Result<Envoy> {
    let available = available_replicas(deployment);

    let mut updated = envoy.clone();
    updated.status = Some(EnvoyStatus {
        available_replicas: available,
    });

    let persisted = ctx.envoys.update_status(namespace, &updated).await?;
    info!(available_replicas = available, "Updated Envoy status");
    Ok(persisted)
}
