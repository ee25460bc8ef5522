//! Worker loop
//!
//! Each worker takes one key at a time from the queue, loads the current Envoy
//! from the cache and reconciles it. The key is released on every exit path,
//! including a panicking reconcile.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info};

use crate::controllers::Context;
use crate::error::{Error, Result};
use crate::metrics;
use crate::queue::{ObjectKey, WorkQueue};
use crate::reconcilers::{self, Outcome};

const KIND: &str = "Envoy";

/// Holds a key in flight and hands it back to the queue when dropped
struct InFlight<'a> {
    queue: &'a WorkQueue,
    key: ObjectKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.queue.done(&self.key);
    }
}

/// Run a worker until the queue shuts down
pub async fn run_worker(id: usize, queue: WorkQueue, ctx: Arc<Context>) {
    debug!(worker = id, "Worker started");
    while process_next_item(&queue, &ctx).await {}
    info!(worker = id, "Worker stopped");
}

/// Process one key. Returns false once the queue is shutting down.
pub async fn process_next_item(queue: &WorkQueue, ctx: &Context) -> bool {
    let Some(key) = queue.get().await else {
        return false;
    };
    metrics::QUEUE_DEPTH.set(queue.len() as f64);

    let held = InFlight { queue, key };
    let key = &held.key;

    let result = AssertUnwindSafe(sync_envoy(key, ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(Error::Panicked(panic_message(panic.as_ref()))));

    match result {
        Ok(()) => queue.forget(key),
        Err(e) if !e.is_retryable() => {
            error!(key = %key, error = %e, "Reconciliation failed permanently, dropping key");
            metrics::RECONCILIATION_ERRORS.with_label_values(&[KIND]).inc();
            queue.forget(key);
        }
        Err(e) => {
            let delay = queue.add_rate_limited(key.clone());
            error!(
                key = %key,
                error = %e,
                retry_in_secs = delay.as_secs_f64(),
                "Reconciliation failed, scheduling retry"
            );
            metrics::RECONCILIATION_ERRORS.with_label_values(&[KIND]).inc();
            metrics::QUEUE_RETRIES.inc();
        }
    }

    true
}

/// Load the latest Envoy for a key and reconcile it
async fn sync_envoy(key: &ObjectKey, ctx: &Context) -> Result<()> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[KIND])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&[KIND]).inc();

    let envoy = match ctx.envoys.get(&key.namespace, &key.name).await {
        Ok(envoy) => envoy,
        Err(e) if e.is_not_found() => {
            // Children carry an owner reference and are collected by the garbage collector
            info!(key = %key, "Envoy no longer exists, nothing to reconcile");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    match reconcilers::reconcile(key, &envoy, ctx).await? {
        Outcome::Invalid(reason) => {
            debug!(key = %key, reason = %reason, "Envoy spec invalid, not retrying");
        }
        Outcome::Converged { .. } => {
            debug!(key = %key, "Reconciled Envoy");
        }
    }

    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
