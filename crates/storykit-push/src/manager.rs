//! Push subscription state machine.
//!
//! The persisted flag only ever reflects what the backend confirmed. A failed
//! backend sync leaves the platform subscription in place with the flag
//! cleared; [`PushSubscriptionManager::status`] reports that mismatch rather
//! than repairing it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use storykit_common::with_timeout;
use storykit_sw::{PermissionState, PushSubscription};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::backend::{PushBackend, SubscriptionRecord};
use crate::platform::PushPlatform;
use crate::store::{KeyValueStore, PUSH_ENABLED, PUSH_SUBSCRIPTION, TOKEN};
use crate::{codec, PushError, PushResult};

/// Platform capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Support {
    Supported,
    Unsupported,
}

/// In-memory subscription state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PushState {
    #[default]
    Unsubscribed,
    Subscribing,
    Subscribed,
    Error,
}

/// Snapshot from [`PushSubscriptionManager::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushStatus {
    pub state: PushState,
    /// The platform holds a subscription.
    pub platform_subscribed: bool,
    /// The persisted `pushEnabled` flag.
    pub enabled: bool,
    /// Platform and flag disagree.
    pub mismatch: bool,
}

/// Drives permission, subscription, and backend sync.
pub struct PushSubscriptionManager {
    platform: Arc<dyn PushPlatform>,
    backend: Arc<dyn PushBackend>,
    store: Arc<dyn KeyValueStore>,
    readiness_timeout: Duration,
    vapid_key: RwLock<Option<String>>,
    state: RwLock<PushState>,
}

impl PushSubscriptionManager {
    pub fn new(
        platform: Arc<dyn PushPlatform>,
        backend: Arc<dyn PushBackend>,
        store: Arc<dyn KeyValueStore>,
        readiness_timeout: Duration,
    ) -> Self {
        Self {
            platform,
            backend,
            store,
            readiness_timeout,
            vapid_key: RwLock::new(None),
            state: RwLock::new(PushState::Unsubscribed),
        }
    }

    pub async fn state(&self) -> PushState {
        *self.state.read().await
    }

    async fn set_state(&self, next: PushState) {
        let mut state = self.state.write().await;
        if *state != next {
            debug!(from = ?*state, to = ?next, "Push state transition");
            *state = next;
        }
    }

    pub fn check_support(&self) -> Support {
        if self.platform.is_supported() {
            Support::Supported
        } else {
            Support::Unsupported
        }
    }

    fn ensure_supported(&self) -> PushResult<()> {
        match self.check_support() {
            Support::Supported => Ok(()),
            Support::Unsupported => Err(PushError::Unsupported),
        }
    }

    pub async fn permission(&self) -> PushResult<PermissionState> {
        self.ensure_supported()?;
        Ok(self.platform.permission().await)
    }

    pub async fn request_permission(&self) -> PushResult<PermissionState> {
        self.ensure_supported()?;
        Ok(self.platform.request_permission().await)
    }

    /// The backend's VAPID key, fetched once per manager.
    pub async fn fetch_vapid_key(&self) -> PushResult<String> {
        self.ensure_supported()?;
        if let Some(key) = self.vapid_key.read().await.as_ref() {
            return Ok(key.clone());
        }
        let key = self.backend.vapid_public_key().await?;
        *self.vapid_key.write().await = Some(key.clone());
        Ok(key)
    }

    /// Wait for the worker, at most `readiness_timeout`.
    async fn wait_ready(&self) -> PushResult<()> {
        match with_timeout(self.readiness_timeout, || self.platform.ready()).await {
            Ok(ready) => ready,
            Err(_) => {
                warn!(timeout = ?self.readiness_timeout, "Worker did not become ready");
                Err(PushError::ReadinessTimeout(self.readiness_timeout))
            }
        }
    }

    fn token(&self) -> PushResult<Option<String>> {
        Ok(self.store.get(TOKEN)?.filter(|t| !t.is_empty()))
    }

    /// Subscribe and register with the backend.
    ///
    /// An existing platform subscription is reused, so repeated calls yield
    /// the same endpoint.
    pub async fn subscribe(&self) -> PushResult<SubscriptionRecord> {
        self.ensure_supported()?;
        self.set_state(PushState::Subscribing).await;

        match self.try_subscribe().await {
            Ok(record) => {
                self.set_state(PushState::Subscribed).await;
                info!(endpoint = %record.endpoint, "Push subscription active");
                Ok(record)
            }
            Err(e) => {
                warn!(error = %e, "Subscribe failed");
                if let Err(store_err) = self.store.set(PUSH_ENABLED, "false") {
                    warn!(error = %store_err, "Failed to clear push flag");
                }
                self.set_state(PushState::Error).await;
                Err(e)
            }
        }
    }

    async fn try_subscribe(&self) -> PushResult<SubscriptionRecord> {
        let key = self.fetch_vapid_key().await?;
        self.wait_ready().await?;

        let subscription = match self.platform.get_subscription().await? {
            Some(existing) => {
                debug!(endpoint = %existing.endpoint, "Reusing platform subscription");
                existing
            }
            None => {
                let application_server_key = codec::decode(&key)?;
                self.platform.subscribe(&application_server_key).await?
            }
        };

        let record = SubscriptionRecord::from_platform(&subscription);
        let token = self.token()?.ok_or(PushError::MissingToken)?;
        self.backend.register(&record, &token).await?;

        self.store
            .set(PUSH_SUBSCRIPTION, &serde_json::to_string(&record)?)?;
        self.store.set(PUSH_ENABLED, "true")?;
        Ok(record)
    }

    /// Revoke on the backend (best effort), cancel on the platform, and
    /// clear local state.
    pub async fn unsubscribe(&self) -> PushResult<()> {
        self.ensure_supported()?;
        match self.try_unsubscribe().await {
            Ok(()) => {
                self.set_state(PushState::Unsubscribed).await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Unsubscribe failed");
                self.set_state(PushState::Error).await;
                Err(e)
            }
        }
    }

    async fn try_unsubscribe(&self) -> PushResult<()> {
        self.wait_ready().await?;

        if let Some(subscription) = self.platform.get_subscription().await? {
            self.revoke(&subscription).await;
            self.platform.unsubscribe().await?;
            info!(endpoint = %subscription.endpoint, "Unsubscribed");
        }

        self.store.remove(PUSH_SUBSCRIPTION)?;
        self.store.set(PUSH_ENABLED, "false")?;
        Ok(())
    }

    async fn revoke(&self, subscription: &PushSubscription) {
        let token = match self.token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("No token, skipping backend revoke");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Could not read token, skipping backend revoke");
                return;
            }
        };
        if let Err(e) = self.backend.revoke(&subscription.endpoint, &token).await {
            warn!(endpoint = %subscription.endpoint, error = %e, "Backend revoke failed");
        }
    }

    /// Unsubscribe when subscribed; otherwise ask for permission and
    /// subscribe. Returns whether push is now on.
    pub async fn toggle(&self) -> PushResult<bool> {
        if self.is_subscribed().await? {
            self.unsubscribe().await?;
            return Ok(false);
        }
        match self.request_permission().await? {
            PermissionState::Granted => {
                self.subscribe().await?;
                Ok(true)
            }
            _ => Err(PushError::PermissionDenied),
        }
    }

    /// Whether the platform holds a subscription.
    pub async fn is_subscribed(&self) -> PushResult<bool> {
        self.ensure_supported()?;
        self.wait_ready().await?;
        Ok(self.platform.get_subscription().await?.is_some())
    }

    /// The persisted `pushEnabled` flag.
    pub fn is_enabled(&self) -> PushResult<bool> {
        Ok(self.store.get(PUSH_ENABLED)?.as_deref() == Some("true"))
    }

    /// The locally mirrored record, if any.
    pub fn stored_subscription(&self) -> PushResult<Option<SubscriptionRecord>> {
        match self.store.get(PUSH_SUBSCRIPTION)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn status(&self) -> PushResult<PushStatus> {
        let platform_subscribed = self.is_subscribed().await?;
        let enabled = self.is_enabled()?;
        Ok(PushStatus {
            state: self.state().await,
            platform_subscribed,
            enabled,
            mismatch: platform_subscribed != enabled,
        })
    }

    /// Rebuild the in-memory state at startup from the platform.
    ///
    /// A persisted `true` without a platform subscription is cleared.
    pub async fn restore(&self) -> PushResult<PushState> {
        let platform_subscribed = self.is_subscribed().await?;
        let enabled = self.is_enabled()?;

        let state = if platform_subscribed && enabled {
            PushState::Subscribed
        } else {
            if enabled {
                info!("Clearing stale push flag; platform has no subscription");
                self.store.remove(PUSH_SUBSCRIPTION)?;
                self.store.set(PUSH_ENABLED, "false")?;
            }
            PushState::Unsubscribed
        };
        self.set_state(state).await;
        Ok(state)
    }
}

impl std::fmt::Debug for PushSubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSubscriptionManager")
            .field("readiness_timeout", &self.readiness_timeout)
            .finish_non_exhaustive()
    }
}
