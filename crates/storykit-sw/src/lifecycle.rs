//! Install/activate state machine for one cache generation.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use storykit_net::Fetcher;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::ServiceWorkerError;

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Script parsed, nothing run yet.
    #[default]
    Parsed,
    /// Install event in progress.
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activate event in progress.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Install failed or replaced.
    Redundant,
}

/// What activation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Stale generations that were deleted.
    pub evicted: Vec<String>,
    /// Clients that switched to this worker.
    pub claimed: usize,
}

/// Drives one worker generation through install and activate.
#[derive(Debug)]
pub struct LifecycleManager {
    generation: String,
    manifest: Vec<Url>,
    state: watch::Sender<ServiceWorkerState>,
    skip_waiting: AtomicBool,
}

impl LifecycleManager {
    pub fn new(generation: impl Into<String>, manifest: Vec<Url>) -> Self {
        let (state, _) = watch::channel(ServiceWorkerState::Parsed);
        Self {
            generation: generation.into(),
            manifest,
            state,
            skip_waiting: AtomicBool::new(false),
        }
    }

    /// The current generation id.
    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn manifest(&self) -> &[Url] {
        &self.manifest
    }

    pub fn state(&self) -> ServiceWorkerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch(&self) -> watch::Receiver<ServiceWorkerState> {
        self.state.subscribe()
    }

    /// Whether install asked to activate without waiting for old clients.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    /// Resolve once the worker is activated. Never resolves if install fails,
    /// so callers bound the wait.
    pub async fn ready(&self) -> Result<(), ServiceWorkerError> {
        let mut rx = self.watch();
        rx.wait_for(|s| *s == ServiceWorkerState::Activated)
            .await
            .map(|_| ())
            .map_err(|_| ServiceWorkerError::StateError("lifecycle dropped".to_string()))
    }

    fn transition(&self, next: ServiceWorkerState) {
        let prev = self.state.send_replace(next);
        debug!(generation = %self.generation, from = ?prev, to = ?next, "Lifecycle transition");
    }

    /// Seed the current generation with the static manifest.
    ///
    /// On failure the worker becomes redundant and the empty generation
    /// cache is removed, so no half-populated shell is left behind.
    pub async fn install(
        &self,
        caches: &CacheStorage,
        fetcher: &dyn Fetcher,
    ) -> Result<usize, ServiceWorkerError> {
        match self.state() {
            ServiceWorkerState::Parsed | ServiceWorkerState::Redundant => {}
            other => {
                return Err(ServiceWorkerError::StateError(format!(
                    "cannot install from {other:?}"
                )))
            }
        }

        info!(generation = %self.generation, assets = self.manifest.len(), "Installing");
        self.transition(ServiceWorkerState::Installing);

        let existed = caches.has(&self.generation).await;
        let cache = caches.open(&self.generation).await;

        match cache.seed(fetcher, &self.manifest).await {
            Ok(count) => {
                self.transition(ServiceWorkerState::Installed);
                self.skip_waiting.store(true, Ordering::Release);
                Ok(count)
            }
            Err(e) => {
                warn!(generation = %self.generation, error = %e, "Install failed");
                if !existed && cache.is_empty().await {
                    caches.delete(&self.generation).await;
                }
                self.transition(ServiceWorkerState::Redundant);
                Err(ServiceWorkerError::InstallFailed(e.to_string()))
            }
        }
    }

    /// Evict every other generation, then claim all clients.
    pub async fn activate(
        &self,
        caches: &CacheStorage,
        clients: &RwLock<Clients>,
    ) -> Result<ActivationReport, ServiceWorkerError> {
        match self.state() {
            ServiceWorkerState::Installed => {}
            ServiceWorkerState::Activated => return Ok(ActivationReport::default()),
            other => {
                return Err(ServiceWorkerError::StateError(format!(
                    "cannot activate from {other:?}"
                )))
            }
        }

        info!(generation = %self.generation, "Activating");
        self.transition(ServiceWorkerState::Activating);

        let mut evicted = Vec::new();
        for name in caches.keys().await {
            if name == self.generation {
                continue;
            }
            if caches.delete(&name).await {
                evicted.push(name);
            } else {
                warn!(generation = %name, "Stale generation vanished before delete");
            }
        }

        let claimed = clients.write().await.claim();
        self.transition(ServiceWorkerState::Activated);
        info!(generation = %self.generation, evicted = evicted.len(), claimed, "Activated");

        Ok(ActivationReport { evicted, claimed })
    }
}
