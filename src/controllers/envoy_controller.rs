//! Envoy controller
//!
//! Watches Envoy resources and runs the worker pool that reconciles them.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    api::ListParams,
    runtime::reflector::{self, Store},
    Api, Client,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::controllers::{dispatcher, watcher, Context, ControllerSettings};
use crate::crd::Envoy;
use crate::error::{Error, Result};
use crate::metrics;
use crate::queue::WorkQueue;

/// Run the Envoy controller until `shutdown` is cancelled
pub async fn run(
    client: Client,
    settings: ControllerSettings,
    shutdown: CancellationToken,
) -> Result<()> {
    let api: Api<Envoy> = match &settings.namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    };
    let deployments: Api<Deployment> = match &settings.namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    };

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("Envoy CRD not installed: {}", e);
        return Err(e.into());
    }

    info!(
        namespace = settings.namespace.as_deref().unwrap_or("*"),
        workers = settings.workers,
        "Starting Envoy controller"
    );

    let (cache, writer) = reflector::store::<Envoy>();
    let queue = WorkQueue::new(settings.backoff);
    let watch = tokio::spawn(watcher::run(api, cache.clone(), writer, queue.clone()));

    if !wait_for_cache_sync(&cache, &shutdown).await? {
        watch.abort();
        return Ok(());
    }
    let owned_watch = tokio::spawn(watcher::run_owned(deployments, queue.clone()));
    info!("Envoy cache synced");
    metrics::MANAGED_RESOURCES.set(cache.state().len() as f64);
    metrics::set_ready(true);

    let ctx = Arc::new(Context::new(client, cache, settings.workload.clone()));
    let mut workers = JoinSet::new();
    for id in 0..settings.workers {
        workers.spawn(dispatcher::run_worker(id, queue.clone(), ctx.clone()));
    }

    shutdown.cancelled().await;
    info!("Shutting down Envoy controller");
    metrics::set_ready(false);
    queue.shut_down();
    watch.abort();
    owned_watch.abort();

    drain(workers, &settings).await;
    Ok(())
}

/// Wait for the initial list to land in the cache. Returns false on shutdown.
async fn wait_for_cache_sync(cache: &Store<Envoy>, shutdown: &CancellationToken) -> Result<bool> {
    tokio::select! {
        ready = cache.wait_until_ready() => {
            ready.map_err(|_| Error::store("Envoy cache writer dropped before initial sync"))?;
            Ok(true)
        }
        _ = shutdown.cancelled() => Ok(false),
    }
}

/// Give in-flight reconciles a bounded amount of time to finish
async fn drain(mut workers: JoinSet<()>, settings: &ControllerSettings) {
    let in_flight = async {
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Worker exited abnormally");
            }
        }
    };

    match tokio::time::timeout(settings.drain_timeout, in_flight).await {
        Ok(()) => info!("All workers drained"),
        Err(_) => {
            warn!(
                timeout_secs = settings.drain_timeout.as_secs(),
                "Drain timed out, abandoning in-flight reconciles"
            );
        }
    }
}
