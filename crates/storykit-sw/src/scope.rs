//! Worker global scope: shared stores plus tracked lifetime extensions.
//!
//! Work registered with [`WorkerScope::wait_until`] runs detached from the
//! event that started it. [`WorkerScope::settle`] is the host's handle to
//! keep the worker alive until all of it has finished.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use storykit_core::StoryKitConfig;
use storykit_net::Fetcher;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheStorage};
use crate::clients::Clients;
use crate::lifecycle::LifecycleManager;
use crate::registration::ServiceWorkerRegistration;
use crate::router::CacheStrategyRouter;
use crate::ServiceWorkerError;

/// Everything a handler may touch.
pub struct WorkerScope {
    config: StoryKitConfig,
    caches: CacheStorage,
    clients: RwLock<Clients>,
    registration: Arc<ServiceWorkerRegistration>,
    lifecycle: LifecycleManager,
    router: CacheStrategyRouter,
    fetcher: Arc<dyn Fetcher>,
    extensions: Mutex<JoinSet<()>>,
}

impl WorkerScope {
    /// Build a scope from configuration and a network.
    pub fn new(config: StoryKitConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, ServiceWorkerError> {
        config
            .validate()
            .map_err(|e| ServiceWorkerError::Config(e.to_string()))?;
        let manifest = config
            .manifest_urls()
            .map_err(|e| ServiceWorkerError::Config(e.to_string()))?;
        let router = CacheStrategyRouter::from_config(&config)?;
        let registration = ServiceWorkerRegistration::new(
            config.scope.clone(),
            config.push.push_service_url.clone(),
        );

        Ok(Self {
            lifecycle: LifecycleManager::new(config.cache.generation.clone(), manifest),
            caches: CacheStorage::new(),
            clients: RwLock::new(Clients::new()),
            registration: Arc::new(registration),
            router,
            fetcher,
            extensions: Mutex::new(JoinSet::new()),
            config,
        })
    }

    pub fn config(&self) -> &StoryKitConfig {
        &self.config
    }

    pub fn caches(&self) -> &CacheStorage {
        &self.caches
    }

    pub fn clients(&self) -> &RwLock<Clients> {
        &self.clients
    }

    pub fn registration(&self) -> &Arc<ServiceWorkerRegistration> {
        &self.registration
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn router(&self) -> &CacheStrategyRouter {
        &self.router
    }

    pub fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    /// The cache of the current generation.
    pub async fn current_cache(&self) -> Cache {
        self.caches.open(self.lifecycle.generation()).await
    }

    fn lock_extensions(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.extensions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Extend the worker's lifetime until `work` completes.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.lock_extensions();
        // Reap finished extensions so the set does not grow unbounded.
        while let Some(done) = set.try_join_next() {
            if let Err(e) = done {
                warn!(error = %e, "Lifetime extension failed");
            }
        }
        set.spawn(work);
    }

    /// Number of extensions still running or unreaped.
    pub fn pending(&self) -> usize {
        self.lock_extensions().len()
    }

    /// Wait for every registered extension, including ones registered while
    /// waiting. Returns how many were awaited.
    pub async fn settle(&self) -> usize {
        let mut settled = 0;
        loop {
            let mut set = std::mem::take(&mut *self.lock_extensions());
            if set.is_empty() {
                break;
            }
            while let Some(done) = set.join_next().await {
                settled += 1;
                if let Err(e) = done {
                    warn!(error = %e, "Lifetime extension failed");
                }
            }
        }
        debug!(settled, "Scope settled");
        settled
    }
}

impl std::fmt::Debug for WorkerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerScope")
            .field("generation", &self.lifecycle.generation())
            .field("state", &self.lifecycle.state())
            .field("scope", &self.registration.scope.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFetcher;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn scope() -> WorkerScope {
        WorkerScope::new(StoryKitConfig::default(), Arc::new(ScriptedFetcher::new())).unwrap()
    }

    #[tokio::test]
    async fn test_settle_waits_for_extensions() {
        let scope = scope();
        let done = Arc::new(AtomicUsize::new(0));

        for delay in [5u64, 1, 3] {
            let done = done.clone();
            scope.wait_until(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(scope.settle().await, 3);
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(scope.pending(), 0);
    }

    #[tokio::test]
    async fn test_settle_survives_panicking_extension() {
        let scope = scope();
        scope.wait_until(async { panic!("boom") });
        assert_eq!(scope.settle().await, 1);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = StoryKitConfig::default();
        config.cache.generation.clear();
        let result = WorkerScope::new(config, Arc::new(ScriptedFetcher::new()));
        assert!(matches!(result, Err(ServiceWorkerError::Config(_))));
    }
}
