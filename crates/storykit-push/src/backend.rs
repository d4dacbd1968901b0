//! Story API push endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use storykit_core::{ConfigResult, StoryKitConfig};
use storykit_net::{Fetcher, Request, Response};
use storykit_sw::{PushEncryptionKeyName, PushSubscription};
use tracing::{debug, info};
use url::Url;

use crate::{codec, PushError, PushResult};

/// Subscription keys as the backend expects them: standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// The record sent to the backend and mirrored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub endpoint: Url,
    pub keys: SubscriptionKeys,
}

impl SubscriptionRecord {
    /// Encode a platform subscription for transport.
    pub fn from_platform(subscription: &PushSubscription) -> Self {
        Self {
            endpoint: subscription.endpoint.clone(),
            keys: SubscriptionKeys {
                p256dh: codec::encode(subscription.get_key(PushEncryptionKeyName::P256dh)),
                auth: codec::encode(subscription.get_key(PushEncryptionKeyName::Auth)),
            },
        }
    }
}

/// Backend side of a push subscription.
#[async_trait]
pub trait PushBackend: Send + Sync {
    /// The application server key, base64url.
    async fn vapid_public_key(&self) -> PushResult<String>;

    /// Register a subscription for the user behind `token`.
    async fn register(&self, record: &SubscriptionRecord, token: &str) -> PushResult<()>;

    /// Revoke the subscription for `endpoint`.
    async fn revoke(&self, endpoint: &Url, token: &str) -> PushResult<()>;
}

#[derive(Debug, Deserialize)]
struct VapidEnvelope {
    data: VapidData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VapidData {
    public_key: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    message: Option<String>,
}

/// [`PushBackend`] over the story REST API.
#[derive(Clone)]
pub struct StoryApiClient {
    fetcher: Arc<dyn Fetcher>,
    vapid_url: Url,
    subscribe_url: Url,
}

impl StoryApiClient {
    pub fn new(fetcher: Arc<dyn Fetcher>, vapid_url: Url, subscribe_url: Url) -> Self {
        Self {
            fetcher,
            vapid_url,
            subscribe_url,
        }
    }

    /// Endpoints under the configured API base.
    pub fn from_config(config: &StoryKitConfig, fetcher: Arc<dyn Fetcher>) -> ConfigResult<Self> {
        Ok(Self::new(
            fetcher,
            config.api_endpoint("push/vapid/public-key")?,
            config.api_endpoint("notifications/subscribe")?,
        ))
    }

    fn rejection(response: &Response, fallback: &str) -> PushError {
        let message = response
            .json::<ErrorEnvelope>()
            .ok()
            .and_then(|e| e.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| fallback.to_string());
        PushError::Backend {
            status: response.status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl PushBackend for StoryApiClient {
    async fn vapid_public_key(&self) -> PushResult<String> {
        let response = self.fetcher.fetch(Request::get(self.vapid_url.clone())).await?;
        if !response.ok() {
            return Err(PushError::KeyFetchFailed(format!(
                "{} returned {}",
                self.vapid_url, response.status
            )));
        }
        let envelope: VapidEnvelope = response
            .json()
            .map_err(|e| PushError::KeyFetchFailed(e.to_string()))?;
        debug!(key = %envelope.data.public_key, "VAPID public key fetched");
        Ok(envelope.data.public_key)
    }

    async fn register(&self, record: &SubscriptionRecord, token: &str) -> PushResult<()> {
        let request = Request::post(self.subscribe_url.clone(), Bytes::new())
            .json(record)?
            .bearer(token)?;
        let response = self.fetcher.fetch(request).await?;
        if !response.ok() {
            return Err(Self::rejection(
                &response,
                "Failed to send subscription to server",
            ));
        }
        info!(endpoint = %record.endpoint, "Subscription registered with backend");
        Ok(())
    }

    async fn revoke(&self, endpoint: &Url, token: &str) -> PushResult<()> {
        let request = Request::delete(self.subscribe_url.clone())
            .json(&json!({ "endpoint": endpoint }))?
            .bearer(token)?;
        let response = self.fetcher.fetch(request).await?;
        if !response.ok() {
            return Err(Self::rejection(&response, "Failed to revoke subscription"));
        }
        info!(endpoint = %endpoint, "Subscription revoked on backend");
        Ok(())
    }
}

impl std::fmt::Debug for StoryApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoryApiClient")
            .field("vapid_url", &self.vapid_url.as_str())
            .field("subscribe_url", &self.subscribe_url.as_str())
            .finish_non_exhaustive()
    }
}
