//! # StoryKit Worker
//!
//! Offline proxy for the story client, modelled on a service worker.
//!
//! ## Features
//!
//! - **Cache generations**: one named cache per deployment, seeded at install
//! - **Fetch routing**: network-first for the backend API, cache-first for
//!   everything else, with offline fallbacks
//! - **Lifecycle**: install, activate, stale-generation eviction, readiness
//! - **Push**: platform push subscriptions, notifications, and click handling
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer
//!     │
//!     ├── DispatchTable (EventKind → Handler)
//!     └── WorkerScope
//!             ├── CacheStorage ── Cache (generation) ── RequestIdentity → CacheEntry
//!             ├── Clients
//!             ├── ServiceWorkerRegistration (push manager, permission, notifications)
//!             ├── LifecycleManager
//!             ├── CacheStrategyRouter
//!             └── lifetime extensions (wait_until / settle)
//! ```

use storykit_common::StoryKitError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod container;
pub mod dispatch;
pub mod lifecycle;
pub mod notification;
pub mod push;
pub mod registration;
pub mod router;
pub mod scope;
pub mod testing;

pub use cache::{Cache, CacheEntry, CacheStorage, RequestIdentity};
pub use clients::{Client, ClientType, Clients};
pub use container::{ContainerEvent, ServiceWorkerContainer, StartReport};
pub use dispatch::{DispatchTable, EventKind, EventOutcome, Handler, HandlerResult, WorkerEvent};
pub use lifecycle::{ActivationReport, LifecycleManager, ServiceWorkerState};
pub use notification::{Notification, NotificationClickEvent, NotificationId, PushEvent, PushPayload};
pub use push::{
    NotificationPermission, PermissionState, PushEncryptionKeyName, PushManager, PushSubscription,
    SubscribeOptions, P256_UNCOMPRESSED_LEN,
};
pub use registration::ServiceWorkerRegistration;
pub use router::{CacheStrategyRouter, FetchOutcome, FetchResponse, Policy, ResponseSource};
pub use scope::WorkerScope;

// ==================== Errors ====================

/// Errors that can occur in worker operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Invalid access: {0}")]
    InvalidAccess(String),

    #[error("Not allowed: {0}")]
    NotAllowed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<ServiceWorkerError> for StoryKitError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::Config(message) => StoryKitError::config(message),
            ServiceWorkerError::NotFound(what) => StoryKitError::NotFound(what),
            ServiceWorkerError::NetworkError(message) => StoryKitError::network(message),
            other => StoryKitError::cache_with_source("worker operation failed", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err: StoryKitError = ServiceWorkerError::NotFound("client 7".into()).into();
        assert!(matches!(err, StoryKitError::NotFound(_)));

        let err: StoryKitError = ServiceWorkerError::InstallFailed("boom".into()).into();
        assert_eq!(err.category(), "cache");
    }
}
