//! Platform push service, as exposed on a registration.
//!
//! Endpoints are issued under a configured push-service URL and the key
//! material is generated locally. Payload encryption is not modelled.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::RngCore;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::ServiceWorkerError;

/// Length of an uncompressed P-256 public key.
pub const P256_UNCOMPRESSED_LEN: usize = 65;
const AUTH_SECRET_LEN: usize = 16;

/// Notification permission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    Granted,
    Denied,
    /// Not decided yet; a prompt will be shown.
    #[default]
    Default,
}

/// Options for `PushManager::subscribe`.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    pub user_visible_only: bool,
    pub application_server_key: Vec<u8>,
}

/// A platform-level push subscription with raw key buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSubscription {
    pub endpoint: Url,
    pub application_server_key: Vec<u8>,
    p256dh: Vec<u8>,
    auth: Vec<u8>,
}

/// Key names accepted by [`PushSubscription::get_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushEncryptionKeyName {
    P256dh,
    Auth,
}

impl PushSubscription {
    /// Raw key material for the given key name.
    pub fn get_key(&self, name: PushEncryptionKeyName) -> &[u8] {
        match name {
            PushEncryptionKeyName::P256dh => &self.p256dh,
            PushEncryptionKeyName::Auth => &self.auth,
        }
    }
}

/// Permission prompt. The host decides what the "user" answers.
#[derive(Debug, Default)]
pub struct NotificationPermission {
    state: RwLock<PermissionState>,
    prompt_answer: RwLock<Option<PermissionState>>,
}

impl NotificationPermission {
    pub async fn state(&self) -> PermissionState {
        *self.state.read().await
    }

    /// Set what the next prompt resolves to.
    pub async fn set_prompt_answer(&self, answer: PermissionState) {
        *self.prompt_answer.write().await = Some(answer);
    }

    /// Prompt when undecided; a decided state is returned unchanged.
    pub async fn request(&self) -> PermissionState {
        let mut state = self.state.write().await;
        if *state == PermissionState::Default {
            if let Some(answer) = *self.prompt_answer.read().await {
                *state = answer;
            }
        }
        debug!(state = ?*state, "Notification permission requested");
        *state
    }
}

/// Push manager of one registration.
#[derive(Debug)]
pub struct PushManager {
    service_url: Url,
    subscription: RwLock<Option<PushSubscription>>,
    subscribe_calls: AtomicUsize,
}

impl PushManager {
    pub fn new(service_url: Url) -> Self {
        Self {
            service_url,
            subscription: RwLock::new(None),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    /// Current subscription, if any.
    pub async fn get_subscription(&self) -> Option<PushSubscription> {
        self.subscription.read().await.clone()
    }

    /// Subscribe, or return the existing subscription for the same key.
    pub async fn subscribe(
        &self,
        permission: PermissionState,
        options: SubscribeOptions,
    ) -> Result<PushSubscription, ServiceWorkerError> {
        self.subscribe_calls.fetch_add(1, Ordering::Relaxed);

        if permission != PermissionState::Granted {
            return Err(ServiceWorkerError::NotAllowed(
                "notification permission not granted".to_string(),
            ));
        }
        if !options.user_visible_only {
            return Err(ServiceWorkerError::NotAllowed(
                "silent push is not supported".to_string(),
            ));
        }
        let key = &options.application_server_key;
        if key.len() != P256_UNCOMPRESSED_LEN || key[0] != 0x04 {
            return Err(ServiceWorkerError::InvalidAccess(format!(
                "application server key must be an uncompressed P-256 point, got {} bytes",
                key.len()
            )));
        }

        let mut current = self.subscription.write().await;
        if let Some(existing) = current.as_ref() {
            if existing.application_server_key == *key {
                return Ok(existing.clone());
            }
            return Err(ServiceWorkerError::StateError(
                "already subscribed with a different application server key".to_string(),
            ));
        }

        let subscription = self.issue(key.clone())?;
        info!(endpoint = %subscription.endpoint, "Push subscription created");
        *current = Some(subscription.clone());
        Ok(subscription)
    }

    /// Drop the subscription. Returns false when there was none.
    pub async fn unsubscribe(&self) -> bool {
        let removed = self.subscription.write().await.take();
        if let Some(ref subscription) = removed {
            info!(endpoint = %subscription.endpoint, "Push subscription cancelled");
        }
        removed.is_some()
    }

    /// Number of `subscribe` calls seen, successful or not.
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::Relaxed)
    }

    fn issue(&self, application_server_key: Vec<u8>) -> Result<PushSubscription, ServiceWorkerError> {
        let mut rng = rand::thread_rng();

        let mut token = [0u8; 16];
        rng.fill_bytes(&mut token);
        let token: String = token.iter().map(|b| format!("{b:02x}")).collect();
        let endpoint = self
            .service_url
            .join(&token)
            .map_err(|e| ServiceWorkerError::StateError(format!("bad push service URL: {e}")))?;

        let mut p256dh = vec![0u8; P256_UNCOMPRESSED_LEN];
        rng.fill_bytes(&mut p256dh);
        p256dh[0] = 0x04;

        let mut auth = vec![0u8; AUTH_SECRET_LEN];
        rng.fill_bytes(&mut auth);

        Ok(PushSubscription {
            endpoint,
            application_server_key,
            p256dh,
            auth,
        })
    }
}
