//! Envoy reconciler
//!
//! Converges the children of one Envoy resource:
//! - Spec validation
//! - Bootstrap ConfigMap (must exist before the Deployment that mounts it)
//! - Deployment replica count
//! - Service
//! - Status write-back
//!
//! Each step is idempotent and nothing is rolled back on failure. A failed
//! reconcile is simply retried from the top.

use k8s_openapi::api::apps::v1::Deployment;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{self, desired_replicas};
use crate::controllers::Context;
use crate::crd::Envoy;
use crate::error::{Error, Result};
use crate::metrics;
use crate::queue::ObjectKey;

use super::status;

/// What a reconcile did to one child resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildAction {
    Created,
    Updated,
    Unchanged,
}

impl ChildAction {
    fn as_str(self) -> &'static str {
        match self {
            ChildAction::Created => "created",
            ChildAction::Updated => "updated",
            ChildAction::Unchanged => "unchanged",
        }
    }
}

/// Result of a successful reconcile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Spec failed validation; nothing was touched and no retry is wanted
    Invalid(String),
    /// All children exist in their desired shape
    Converged {
        config_map: ChildAction,
        deployment: ChildAction,
        service: ChildAction,
        status_written: bool,
    },
}

/// Validate the Envoy spec
pub fn validate(envoy: &Envoy) -> Result<()> {
    let spec = &envoy.spec;

    if spec.name.is_empty() {
        return Err(Error::validation("spec.name must not be empty"));
    }

    if spec.config_map_name.is_empty() {
        return Err(Error::validation("spec.configMapName must not be empty"));
    }

    if spec.replicas < 0 {
        return Err(Error::validation(format!(
            "Invalid replicas {}: must not be negative",
            spec.replicas
        )));
    }

    if spec.discovery.service_name.is_empty() || spec.discovery.host.is_empty() {
        return Err(Error::validation(
            "spec.discovery requires both serviceName and host",
        ));
    }

    if spec.discovery.port == 0 {
        return Err(Error::validation("spec.discovery.port must be greater than 0"));
    }

    Ok(())
}

/// Drive the children of `envoy` toward its spec
#[instrument(skip(key, envoy, ctx), fields(key = %key))]
pub async fn reconcile(key: &ObjectKey, envoy: &Envoy, ctx: &Context) -> Result<Outcome> {
    if let Err(e) = validate(envoy) {
        warn!(error = %e, "Invalid spec, skipping until it changes");
        return Ok(Outcome::Invalid(e.to_string()));
    }

    let namespace = key.namespace.as_str();

    let config_map = converge_config_map(namespace, envoy, ctx).await?;
    let (deployment, live_deployment) = converge_deployment(namespace, envoy, ctx).await?;
    let service = converge_service(namespace, envoy, ctx).await?;

    let status_written = if status::needs_write_back(envoy, &live_deployment, deployment) {
        status::write_back(namespace, envoy, &live_deployment, ctx).await?;
        true
    } else {
        false
    };

    info!(
        config_map = config_map.as_str(),
        deployment = deployment.as_str(),
        service = service.as_str(),
        status_written,
        "Envoy converged"
    );

    Ok(Outcome::Converged {
        config_map,
        deployment,
        service,
        status_written,
    })
}

/// Create the bootstrap ConfigMap if it is missing.
///
/// An existing ConfigMap is left alone even if the discovery coordinates moved.
async fn converge_config_map(namespace: &str, envoy: &Envoy, ctx: &Context) -> Result<ChildAction> {
    let desired = adapters::config_map(envoy)?;
    let name = envoy.spec.config_map_name.as_str();

    match ctx.config_maps.get(namespace, name).await {
        Ok(_) => {
            debug!(config_map = name, "ConfigMap present");
            Ok(ChildAction::Unchanged)
        }
        Err(e) if e.is_not_found() => {
            ctx.config_maps.create(namespace, &desired).await?;
            record("ConfigMap", ChildAction::Created);
            info!(config_map = name, "Created ConfigMap");
            Ok(ChildAction::Created)
        }
        Err(e) => Err(e),
    }
}

/// Create the Deployment or fix its replica count. Returns the Deployment as
/// last observed, which feeds the status write-back.
async fn converge_deployment(
    namespace: &str,
    envoy: &Envoy,
    ctx: &Context,
) -> Result<(ChildAction, Deployment)> {
    let desired = adapters::deployment(envoy, &ctx.workload);
    let name = envoy.spec.name.as_str();

    match ctx.deployments.get(namespace, name).await {
        Ok(live) if desired_replicas(&live) == Some(envoy.spec.replicas) => {
            debug!(deployment = name, "Deployment replicas match");
            Ok((ChildAction::Unchanged, live))
        }
        Ok(live) => {
            let updated = ctx.deployments.update(namespace, &desired).await?;
            record("Deployment", ChildAction::Updated);
            info!(
                deployment = name,
                from = ?desired_replicas(&live),
                to = envoy.spec.replicas,
                "Updated Deployment replicas"
            );
            Ok((ChildAction::Updated, updated))
        }
        Err(e) if e.is_not_found() => {
            let created = ctx.deployments.create(namespace, &desired).await?;
            record("Deployment", ChildAction::Created);
            info!(deployment = name, replicas = envoy.spec.replicas, "Created Deployment");
            Ok((ChildAction::Created, created))
        }
        Err(e) => Err(e),
    }
}

/// Create the Service if it is missing. Its shape never changes afterwards.
async fn converge_service(namespace: &str, envoy: &Envoy, ctx: &Context) -> Result<ChildAction> {
    let name = envoy.spec.name.as_str();

    match ctx.services.get(namespace, name).await {
        Ok(_) => Ok(ChildAction::Unchanged),
        Err(e) if e.is_not_found() => {
            ctx.services
                .create(namespace, &adapters::service(envoy))
                .await?;
            record("Service", ChildAction::Created);
            info!(service = name, "Created Service");
            Ok(ChildAction::Created)
        }
        Err(e) => Err(e),
    }
}

fn record(kind: &str, action: ChildAction) {
    metrics::CHILD_OPERATIONS
        .with_label_values(&[kind, action.as_str()])
        .inc();
}
