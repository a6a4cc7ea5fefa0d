//! # Event source and local store
//!
//! Watches Secrets in the source namespace and keeps a local read-only
//! store of them, enqueueing the affected key for every add, update,
//! and delete. The watch stream reconnects internally; a relist after
//! reconnection rebuilds the store and enqueues any keys that vanished
//! while the stream was down.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::{pin_mut, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::Client;
use kube_runtime::watcher;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::annotations::REFLECT_ANNOTATION;
use crate::errors::Error;
use crate::keys::key_for;
use crate::queue::{RateLimiter, WorkQueue};

/// Read-through cache of the watched Secrets, keyed by `namespace/name`.
///
/// Updated only by the event source; shared read-only with the
/// reconcile workers. Reads may be stale: a missing key means the
/// source Secret is gone as far as this controller can tell.
pub struct SecretStore {
    secrets: RwLock<HashMap<String, Secret>>,
    synced: tokio::sync::watch::Sender<bool>,
}

impl SecretStore {
    pub fn new() -> Arc<Self> {
        let (synced, _) = tokio::sync::watch::channel(false);
        Arc::new(Self {
            secrets: RwLock::new(HashMap::new()),
            synced,
        })
    }

    /// Looks up a Secret by its queue key
    pub fn get_by_key(&self, key: &str) -> Option<Secret> {
        self.secrets
            .read()
            .expect("secret store lock poisoned")
            .get(key)
            .cloned()
    }

    /// Inserts or replaces a Secret. Called by the event source.
    pub fn apply(&self, key: &str, secret: Secret) {
        self.secrets
            .write()
            .expect("secret store lock poisoned")
            .insert(key.to_string(), secret);
    }

    /// Removes a Secret. Called by the event source.
    pub fn delete(&self, key: &str) {
        self.secrets
            .write()
            .expect("secret store lock poisoned")
            .remove(key);
    }

    /// Replaces the whole store after a (re)list and marks it synced.
    ///
    /// Returns the keys that were present before but are absent in the
    /// new listing, so the caller can enqueue them for cleanup.
    pub fn replace_all(&self, secrets: HashMap<String, Secret>) -> Vec<String> {
        let mut store = self.secrets.write().expect("secret store lock poisoned");
        let removed = store
            .keys()
            .filter(|key| !secrets.contains_key(*key))
            .cloned()
            .collect();
        *store = secrets;
        drop(store);
        self.synced.send_replace(true);
        removed
    }

    /// True once the initial listing has completed
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Waits for the initial listing, failing if cancelled first.
    pub async fn wait_for_sync(&self, cancel: &CancellationToken) -> Result<(), Error> {
        let mut synced = self.synced.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::CacheSync),
            result = synced.wait_for(|done| *done) => {
                result.map(|_| ()).map_err(|_| Error::CacheSync)
            }
        }
    }
}

/// Source of Secret events feeding the store and the queue.
///
/// Behind a trait so tests can drive the store and queue directly
/// without a cluster.
pub trait EventSource: Send + Sync {
    /// Spawns the watch task; it runs until the token is cancelled.
    fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()>;
}

/// Event source backed by a Kubernetes watch on the source namespace,
/// filtered server-side to Secrets that opted into reflection.
pub struct SecretWatcher {
    client: Client,
    namespace: String,
    store: Arc<SecretStore>,
    queue: Arc<WorkQueue>,
}

impl SecretWatcher {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        store: Arc<SecretStore>,
        queue: Arc<WorkQueue>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            store,
            queue,
        }
    }
}

impl EventSource for SecretWatcher {
    fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let namespace = self.namespace.clone();
        let store = Arc::clone(&self.store);
        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            run_watch(api, namespace, store, queue, cancel).await;
        })
    }
}

async fn run_watch(
    api: Api<Secret>,
    namespace: String,
    store: Arc<SecretStore>,
    queue: Arc<WorkQueue>,
    cancel: CancellationToken,
) {
    let selector = format!("{REFLECT_ANNOTATION}=true");
    let stream = watcher(api, watcher::Config::default().fields(&selector));
    pin_mut!(stream);

    info!(%namespace, "watching secrets");
    let mut pending: HashMap<String, Secret> = HashMap::new();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = stream.next() => event,
        };
        let Some(event) = event else {
            warn!(%namespace, "secret watch stream ended");
            break;
        };
        match event {
            Ok(watcher::Event::Init) => pending.clear(),
            Ok(watcher::Event::InitApply(secret)) => {
                if let Some(key) = key_for(&secret) {
                    pending.insert(key.clone(), secret);
                    queue.add_rate_limited(&key);
                }
            }
            Ok(watcher::Event::InitDone) => {
                let removed = store.replace_all(std::mem::take(&mut pending));
                for key in removed {
                    debug!(key, "secret disappeared during relist");
                    queue.add_rate_limited(&key);
                }
            }
            Ok(watcher::Event::Apply(secret)) => {
                if let Some(key) = key_for(&secret) {
                    store.apply(&key, secret);
                    queue.add_rate_limited(&key);
                }
            }
            Ok(watcher::Event::Delete(secret)) => {
                if let Some(key) = key_for(&secret) {
                    store.delete(&key);
                    queue.add_rate_limited(&key);
                }
            }
            Err(err) => {
                // the watcher reconnects on its own; surfaced errors
                // are transient
                warn!(%namespace, error = %err, "error watching secrets");
            }
        }
    }
    debug!(%namespace, "secret watch stopped");
}
