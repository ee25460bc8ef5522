//! Operator configuration
//!
//! Command-line flags with environment fallbacks, plus resolution of the
//! credentials used to reach the API server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::info;

use crate::adapters::{WorkloadSettings, DEFAULT_IMAGE};
use crate::controllers::ControllerSettings;
use crate::error::{Error, Result};
use crate::queue::ExponentialBackoff;

/// Environment variable consulted when no kubeconfig path is given
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Command-line configuration of the operator
#[derive(Debug, Clone, Parser)]
#[command(name = "envoy-operator", version, about = "Kubernetes operator for Envoy proxies")]
pub struct OperatorConfig {
    /// Path to a kubeconfig file. Falls back to $KUBECONFIG, then in-cluster credentials.
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Only watch Envoy resources in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Number of concurrent reconcile workers
    #[arg(long, env = "ENVOY_OPERATOR_WORKERS", default_value_t = 2,
          value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: u16,

    /// Port serving /metrics, /healthz and /readyz
    #[arg(long, env = "ENVOY_OPERATOR_METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    /// Container image for generated Deployments
    #[arg(long, env = "ENVOY_IMAGE", default_value = DEFAULT_IMAGE)]
    pub envoy_image: String,

    /// Retry delay after a key's first failed reconcile, in seconds
    #[arg(long, default_value_t = 5)]
    pub backoff_floor_secs: u64,

    /// Upper bound on the retry delay, in seconds
    #[arg(long, default_value_t = 60)]
    pub backoff_ceiling_secs: u64,

    /// Time allowed for in-flight reconciles to finish on shutdown, in seconds
    #[arg(long, default_value_t = 30)]
    pub drain_timeout_secs: u64,
}

/// Where API server credentials come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Explicit kubeconfig path
    Path(PathBuf),
    /// Kubeconfig named by the environment
    Env,
    /// Service account mounted into the pod
    InCluster,
}

impl CredentialSource {
    /// Pick the credential source: explicit path, then environment, then in-cluster
    pub fn resolve(explicit: Option<&Path>, env_value: Option<&str>) -> Self {
        match (explicit, env_value) {
            (Some(path), _) => CredentialSource::Path(path.to_path_buf()),
            (None, Some(value)) if !value.trim().is_empty() => CredentialSource::Env,
            _ => CredentialSource::InCluster,
        }
    }

    /// Load client configuration from this source
    pub async fn load(&self) -> Result<Config> {
        let options = KubeConfigOptions::default();
        match self {
            CredentialSource::Path(path) => {
                let kubeconfig = Kubeconfig::read_from(path)?;
                Ok(Config::from_custom_kubeconfig(kubeconfig, &options).await?)
            }
            CredentialSource::Env => {
                let kubeconfig = Kubeconfig::from_env()?.ok_or_else(|| {
                    Error::config(format!("{} is set but names no kubeconfig", KUBECONFIG_ENV))
                })?;
                Ok(Config::from_custom_kubeconfig(kubeconfig, &options).await?)
            }
            CredentialSource::InCluster => Ok(Config::incluster()?),
        }
    }
}

impl OperatorConfig {
    /// Credential source for this configuration and the current environment
    pub fn credential_source(&self) -> CredentialSource {
        let env_value = std::env::var(KUBECONFIG_ENV).ok();
        CredentialSource::resolve(self.kubeconfig.as_deref(), env_value.as_deref())
    }

    /// Build a Kubernetes client from the resolved credentials
    pub async fn client(&self) -> Result<Client> {
        let source = self.credential_source();
        info!(source = ?source, "Loading Kubernetes credentials");
        let config = source.load().await?;
        Ok(Client::try_from(config)?)
    }

    /// Controller settings derived from the flags
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            namespace: self.namespace.clone(),
            workers: usize::from(self.workers),
            backoff: ExponentialBackoff::new(
                Duration::from_secs(self.backoff_floor_secs),
                Duration::from_secs(self.backoff_ceiling_secs),
            ),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            workload: WorkloadSettings {
                image: self.envoy_image.clone(),
            },
        }
    }
}
