//! # Reflector
//!
//! The controller loop that owns the queue, the store, and the
//! reconcile workers. Keys flow in from the event source, workers
//! drain them through [`Reflector::reconcile`], and the error policy
//! requeues failures with backoff until the retry budget runs out.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::annotations::{resolve_destinations, REFLECT_ANNOTATION};
use crate::client::ClusterClient;
use crate::constants::{
    DEFAULT_REFLECT_CONCURRENCY, DEFAULT_RETRIES, DEFAULT_WORKER_CONCURRENCY,
    WORKER_RESTART_DELAY,
};
use crate::delete::{cascade_delete, find_existing_secret_namespaces};
use crate::errors::Error;
use crate::keys::split_key;
use crate::queue::{RateLimiter, WorkQueue};
use crate::reflect::reflect_to_namespaces;
use crate::watch::{EventSource, SecretStore};

/// Tunables for the controller loop. Concurrency values are clamped to
/// at least one when the reflector is built.
#[derive(Debug, Clone)]
pub struct ReflectorConfig {
    /// Number of workers draining the work queue
    pub worker_concurrency: usize,
    /// Fan-out batch size for per-namespace operations
    pub reflect_concurrency: usize,
    /// Times a failing key is requeued before it is dropped
    pub retries: u32,
    /// Delete replicas when their source is deleted
    pub cascade_delete: bool,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            reflect_concurrency: DEFAULT_REFLECT_CONCURRENCY,
            retries: DEFAULT_RETRIES,
            cascade_delete: false,
        }
    }
}

/// The core reflector which takes care of watching and syncing secrets
pub struct Reflector {
    client: Arc<dyn ClusterClient>,
    source: Box<dyn EventSource>,
    store: Arc<SecretStore>,
    queue: Arc<WorkQueue>,
    worker_concurrency: usize,
    reflect_concurrency: usize,
    retries: u32,
    cascade_delete: bool,
}

impl Reflector {
    /// Creates a reflector from its collaborators.
    ///
    /// The API client and the event source enter here so tests can
    /// substitute in-memory implementations.
    pub fn new(
        client: Arc<dyn ClusterClient>,
        source: Box<dyn EventSource>,
        store: Arc<SecretStore>,
        queue: Arc<WorkQueue>,
        config: ReflectorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            source,
            store,
            queue,
            worker_concurrency: config.worker_concurrency.max(1),
            reflect_concurrency: config.reflect_concurrency.max(1),
            retries: config.retries,
            cascade_delete: config.cascade_delete,
        })
    }

    /// Runs the controller until the token is cancelled.
    ///
    /// Spawns the event source, waits for the initial cache sync, then
    /// drains the queue with the configured number of workers. On
    /// cancellation the queue shuts down and in-flight items finish
    /// before this returns. Fails fast if the cache cannot sync.
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) -> Result<(), Error> {
        let watch = self.source.spawn(cancel.clone());

        self.store.wait_for_sync(&cancel).await?;
        info!(workers = self.worker_concurrency, "caches synced, starting workers");

        let workers: Vec<_> = (0..self.worker_concurrency)
            .map(|id| spawn_worker(Arc::clone(&self), id, cancel.clone()))
            .collect();

        cancel.cancelled().await;
        info!("shutting down, draining work queue");
        self.queue.shut_down();
        for worker in workers {
            let _ = worker.await;
        }
        let _ = watch.await;
        Ok(())
    }

    async fn worker(&self) {
        while self.next().await {}
    }

    /// Processes one key from the queue. Returns false on shutdown.
    async fn next(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let result = self.reconcile(&key).await;
        // handle_err must run before done so a forget always precedes
        // any re-add of the same key
        self.handle_err(result, &key);
        self.queue.done(&key);
        true
    }

    /// The business logic for a single key.
    ///
    /// Resolves the source Secret from the local store, decides
    /// between replication and cascade delete, and fans out across the
    /// destination namespaces.
    pub async fn reconcile(&self, key: &str) -> Result<(), Error> {
        let (_, name) = split_key(key);

        let Some(secret) = self.store.get_by_key(key) else {
            if !self.cascade_delete {
                debug!(key, "secret gone and cascade delete disabled, nothing to do");
                return Ok(());
            }
            let namespaces = find_existing_secret_namespaces(self.client.as_ref(), name).await?;
            debug!(key, count = namespaces.len(), "cascading delete to owned replicas");
            return cascade_delete(
                self.client.as_ref(),
                name,
                &namespaces,
                self.reflect_concurrency,
            )
            .await;
        };

        // a stale queue entry may outlive the opt-in
        let annotations = secret.metadata.annotations.clone().unwrap_or_default();
        if annotations.get(REFLECT_ANNOTATION).map(String::as_str) != Some("true") {
            debug!(key, "secret is not opted into reflection");
            return Ok(());
        }

        let namespaces = resolve_destinations(self.client.as_ref(), &annotations).await?;
        reflect_to_namespaces(
            self.client.as_ref(),
            &secret,
            &namespaces,
            self.reflect_concurrency,
        )
        .await
    }

    /// Applies the retry policy for one reconciliation outcome.
    ///
    /// Success clears the key's backoff history. Failures requeue with
    /// backoff until the retry budget is exhausted, at which point the
    /// key is dropped and the failure reported.
    fn handle_err(&self, result: Result<(), Error>, key: &str) {
        let Err(err) = result else {
            self.queue.forget(key);
            return;
        };

        if self.queue.num_requeues(key) < self.retries {
            warn!(key, error = %err, "error while reconciling, requeueing");
            self.queue.add_rate_limited(key);
            return;
        }

        self.queue.forget(key);
        error!(key, error = %err, "dropping secret out of the queue");
    }
}

/// Supervises one worker, restarting it after a pause if it panics.
fn spawn_worker(
    reflector: Arc<Reflector>,
    id: usize,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let run = tokio::spawn({
                let reflector = Arc::clone(&reflector);
                async move { reflector.worker().await }
            });
            match run.await {
                // the queue shut down, nothing left to do
                Ok(()) => break,
                Err(err) if err.is_panic() => {
                    error!(worker = id, "worker panicked, restarting");
                }
                Err(_) => break,
            }
            if cancel.is_cancelled() {
                break;
            }
            tokio::time::sleep(WORKER_RESTART_DELAY).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::SecretStore;
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::Secret;
    use std::time::Duration;

    struct StubClient;

    #[async_trait]
    impl ClusterClient for StubClient {
        async fn get_secret(&self, _: &str, _: &str) -> Result<Option<Secret>, Error> {
            Ok(None)
        }
        async fn create_secret(&self, _: &str, _: &Secret) -> Result<(), Error> {
            Ok(())
        }
        async fn update_secret(&self, _: &str, _: &Secret) -> Result<(), Error> {
            Ok(())
        }
        async fn delete_secret(&self, _: &str, _: &str) -> Result<(), Error> {
            Ok(())
        }
        async fn list_namespaces(&self) -> Result<Vec<String>, Error> {
            Ok(Vec::new())
        }
    }

    struct SyncedSource(Arc<SecretStore>);

    impl EventSource for SyncedSource {
        fn spawn(&self, _cancel: CancellationToken) -> JoinHandle<()> {
            let store = Arc::clone(&self.0);
            tokio::spawn(async move {
                store.replace_all(Default::default());
            })
        }
    }

    fn reflector(retries: u32) -> Arc<Reflector> {
        let store = SecretStore::new();
        Reflector::new(
            Arc::new(StubClient),
            Box::new(SyncedSource(Arc::clone(&store))),
            store,
            WorkQueue::new(),
            ReflectorConfig {
                retries,
                ..ReflectorConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_handle_err_forgets_on_success() {
        let reflector = reflector(5);
        reflector.queue.add_rate_limited("src/alpha");
        assert_eq!(reflector.queue.num_requeues("src/alpha"), 1);

        reflector.handle_err(Ok(()), "src/alpha");
        assert_eq!(reflector.queue.num_requeues("src/alpha"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_err_requeues_until_budget_exhausted() {
        let reflector = reflector(2);

        // two failures fit the budget and requeue
        reflector.handle_err(Err(Error::CacheSync), "src/alpha");
        assert_eq!(reflector.queue.num_requeues("src/alpha"), 1);
        reflector.handle_err(Err(Error::CacheSync), "src/alpha");
        assert_eq!(reflector.queue.num_requeues("src/alpha"), 2);

        // the third failure drops the key and clears its history
        reflector.handle_err(Err(Error::CacheSync), "src/alpha");
        assert_eq!(reflector.queue.num_requeues("src/alpha"), 0);
    }

    #[tokio::test]
    async fn test_concurrency_clamped_to_one() {
        let store = SecretStore::new();
        let reflector = Reflector::new(
            Arc::new(StubClient),
            Box::new(SyncedSource(Arc::clone(&store))),
            store,
            WorkQueue::new(),
            ReflectorConfig {
                worker_concurrency: 0,
                reflect_concurrency: 0,
                ..ReflectorConfig::default()
            },
        );
        assert_eq!(reflector.worker_concurrency, 1);
        assert_eq!(reflector.reflect_concurrency, 1);
    }

    #[tokio::test]
    async fn test_start_fails_when_cache_never_syncs() {
        struct NeverSynced;
        impl EventSource for NeverSynced {
            fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
                tokio::spawn(async move { cancel.cancelled().await })
            }
        }

        let reflector = Reflector::new(
            Arc::new(StubClient),
            Box::new(NeverSynced),
            SecretStore::new(),
            WorkQueue::new(),
            ReflectorConfig::default(),
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&reflector).start(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert!(matches!(
            handle.await.expect("start task"),
            Err(Error::CacheSync)
        ));
    }

    #[tokio::test]
    async fn test_start_drains_and_stops_on_cancel() {
        let reflector = reflector(5);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&reflector).start(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert!(handle.await.expect("start task").is_ok());
    }
}
