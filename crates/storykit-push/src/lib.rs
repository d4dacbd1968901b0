//! # StoryKit Push
//!
//! Push-notification subscription lifecycle for the story client.
//!
//! [`PushSubscriptionManager`] negotiates permission, fetches the backend's
//! VAPID key, subscribes through the [`PushPlatform`], syncs the endpoint to
//! the [`PushBackend`], and mirrors the result into a [`KeyValueStore`] so it
//! survives restarts.
//!
//! ```text
//! PushSubscriptionManager
//!     ├── PushPlatform   (RegistrationPushPlatform → ServiceWorkerContainer)
//!     ├── PushBackend    (StoryApiClient → Fetcher)
//!     ├── KeyValueStore  (SqliteStore | MemoryStore)
//!     └── codec          (VAPID key decode, subscription key encode)
//! ```

use std::time::Duration;

use storykit_common::StoryKitError;
use storykit_net::NetError;
use storykit_sw::ServiceWorkerError;
use thiserror::Error;

pub mod backend;
pub mod codec;
pub mod manager;
pub mod platform;
pub mod store;

pub use backend::{PushBackend, StoryApiClient, SubscriptionKeys, SubscriptionRecord};
pub use manager::{PushState, PushStatus, PushSubscriptionManager, Support};
pub use platform::{PushPlatform, RegistrationPushPlatform};
pub use store::{KeyValueStore, MemoryStore, SqliteStore, PUSH_ENABLED, PUSH_SUBSCRIPTION, TOKEN};
pub use storykit_sw::PermissionState as Permission;

/// Errors from push subscription operations.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("Push notifications not supported")]
    Unsupported,

    #[error("Notification permission denied")]
    PermissionDenied,

    #[error("Failed to fetch VAPID key: {0}")]
    KeyFetchFailed(String),

    #[error("Service worker not ready after {0:?}")]
    ReadinessTimeout(Duration),

    #[error("Malformed key: {0}")]
    MalformedKey(String),

    #[error("No authentication token")]
    MissingToken,

    #[error("Backend rejected request ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Platform error: {0}")]
    Platform(#[from] ServiceWorkerError),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl PushError {
    /// Whether the caller may try the same operation again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PushError::PermissionDenied
                | PushError::KeyFetchFailed(_)
                | PushError::ReadinessTimeout(_)
                | PushError::Network(_)
                | PushError::Backend { .. }
        )
    }
}

impl From<rusqlite::Error> for PushError {
    fn from(err: rusqlite::Error) -> Self {
        PushError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for PushError {
    fn from(err: serde_json::Error) -> Self {
        PushError::Storage(err.to_string())
    }
}

impl From<PushError> for StoryKitError {
    fn from(err: PushError) -> Self {
        match err {
            PushError::ReadinessTimeout(after) => StoryKitError::Timeout(after),
            PushError::Network(e) => e.into(),
            other => StoryKitError::push_with_source("push operation failed", other),
        }
    }
}

pub type PushResult<T> = Result<T, PushError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_taxonomy() {
        assert!(PushError::ReadinessTimeout(Duration::from_secs(10)).is_retryable());
        assert!(PushError::PermissionDenied.is_retryable());
        assert!(!PushError::Unsupported.is_retryable());
        assert!(!PushError::MalformedKey("x".into()).is_retryable());
    }

    #[test]
    fn test_into_storykit_error() {
        let err: StoryKitError = PushError::ReadinessTimeout(Duration::from_secs(10)).into();
        assert!(matches!(err, StoryKitError::Timeout(_)));

        let err: StoryKitError = PushError::MissingToken.into();
        assert_eq!(err.category(), "push");
    }
}
