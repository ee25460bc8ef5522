//! Envoy change detection
//!
//! Feeds watch events into the reflector cache and enqueues the identity of
//! every object whose desired state changed. Keys are only enqueued once the
//! cache holds the new object, so a worker never reads a spec older than the
//! event that woke it.

use std::collections::BTreeSet;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    runtime::{
        reflector::{store::Writer, ObjectRef, Store},
        watcher::{self, Event},
        WatchStreamExt,
    },
    Api, Resource, ResourceExt,
};
use tracing::{debug, info, warn};

use crate::crd::Envoy;
use crate::queue::{ObjectKey, WorkQueue};

/// Label carried by every child the operator creates
const MANAGED_BY_SELECTOR: &str = "app.kubernetes.io/managed-by=envoy-operator";

/// Translates Envoy watch events into cache updates and queue adds
///
/// Updates whose spec is structurally equal to the cached spec are dropped, so
/// status writes and metadata-only changes do not trigger a reconcile.
pub struct ChangeDetector {
    cache: Store<Envoy>,
    writer: Writer<Envoy>,
    queue: WorkQueue,
    /// Changed keys seen during a relist, enqueued once the relist is complete
    relisted_changes: Vec<ObjectKey>,
    /// Every key seen during a relist
    relisted: BTreeSet<ObjectKey>,
}

impl ChangeDetector {
    pub fn new(cache: Store<Envoy>, writer: Writer<Envoy>, queue: WorkQueue) -> Self {
        Self {
            cache,
            writer,
            queue,
            relisted_changes: Vec::new(),
            relisted: BTreeSet::new(),
        }
    }

    /// Whether `envoy` differs from the cached object with the same identity
    fn spec_changed(&self, envoy: &Envoy) -> bool {
        match self.cache.get(&ObjectRef::from_obj(envoy)) {
            None => true,
            Some(old) => old.spec != envoy.spec,
        }
    }

    pub fn handle_event(&mut self, event: Event<Envoy>) {
        match &event {
            Event::Apply(envoy) => {
                let key = ObjectKey::from_object(envoy);
                let changed = self.spec_changed(envoy);
                self.writer.apply_watcher_event(&event);
                if changed {
                    info!(key = %key, "Envoy changed");
                    self.queue.add(key);
                } else {
                    debug!(key = %key, "Envoy spec unchanged, ignoring event");
                }
            }
            Event::Delete(envoy) => {
                let key = ObjectKey::from_object(envoy);
                self.writer.apply_watcher_event(&event);
                info!(key = %key, "Envoy deleted");
                self.queue.add(key);
            }
            Event::Init => {
                debug!("Envoy watch (re)listing");
                self.relisted_changes.clear();
                self.relisted.clear();
                self.writer.apply_watcher_event(&event);
            }
            Event::InitApply(envoy) => {
                // The reflector buffers relisted objects until InitDone, so the
                // cache still holds the state from before the relist
                let key = ObjectKey::from_object(envoy);
                if self.spec_changed(envoy) {
                    self.relisted_changes.push(key.clone());
                }
                self.relisted.insert(key);
                self.writer.apply_watcher_event(&event);
            }
            Event::InitDone => {
                // Objects that vanished while the watch was down
                let vanished: Vec<ObjectKey> = self
                    .cache
                    .state()
                    .iter()
                    .map(|envoy| ObjectKey::from_object(envoy.as_ref()))
                    .filter(|key| !self.relisted.contains(key))
                    .collect();

                self.writer.apply_watcher_event(&event);
                debug!(
                    changed = self.relisted_changes.len(),
                    vanished = vanished.len(),
                    "Envoy watch list complete"
                );
                for key in self.relisted_changes.drain(..).chain(vanished) {
                    self.queue.add(key);
                }
                self.relisted.clear();
            }
        }
    }
}

/// Watch Envoy resources until the stream ends
pub async fn run(api: Api<Envoy>, cache: Store<Envoy>, writer: Writer<Envoy>, queue: WorkQueue) {
    let mut detector = ChangeDetector::new(cache, writer, queue);
    let mut events = watcher::watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    while let Some(event) = events.next().await {
        match event {
            Ok(event) => detector.handle_event(event),
            Err(e) => warn!(error = %e, "Envoy watch error, will retry"),
        }
    }

    warn!("Envoy watch stream ended");
}

/// Identity of the Envoy controlling a Deployment, if any
pub fn owner_key(deployment: &Deployment) -> Option<ObjectKey> {
    let namespace = deployment.namespace()?;
    deployment
        .owner_references()
        .iter()
        .find(|owner| {
            owner.controller == Some(true)
                && owner.kind == Envoy::kind(&())
                && owner.api_version == Envoy::api_version(&())
        })
        .map(|owner| ObjectKey::new(namespace, owner.name.clone()))
}

/// Watch the Deployments owned by Envoys and enqueue their owners, so status
/// follows availability changes of the workload
pub async fn run_owned(api: Api<Deployment>, queue: WorkQueue) {
    let config = watcher::Config::default().labels(MANAGED_BY_SELECTOR);
    let mut events = watcher::watcher(api, config).default_backoff().boxed();

    while let Some(event) = events.next().await {
        match event {
            Ok(Event::Apply(deployment))
            | Ok(Event::InitApply(deployment))
            | Ok(Event::Delete(deployment)) => {
                if let Some(key) = owner_key(&deployment) {
                    debug!(key = %key, deployment = %deployment.name_any(), "Owned Deployment changed");
                    queue.add(key);
                }
            }
            Ok(Event::Init) | Ok(Event::InitDone) => {}
            Err(e) => warn!(error = %e, "Deployment watch error, will retry"),
        }
    }

    warn!("Deployment watch stream ended");
}
