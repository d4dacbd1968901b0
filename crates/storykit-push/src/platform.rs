//! Platform push port and its adapter over the worker container.

use std::sync::Arc;

use async_trait::async_trait;
use storykit_sw::{
    PermissionState, PushSubscription, ServiceWorkerContainer, SubscribeOptions,
};
use tracing::debug;

use crate::PushResult;

/// What the manager needs from the platform.
#[async_trait]
pub trait PushPlatform: Send + Sync {
    /// Whether workers and the push API are available.
    fn is_supported(&self) -> bool;

    async fn permission(&self) -> PermissionState;

    /// Show the permission prompt if undecided.
    async fn request_permission(&self) -> PermissionState;

    /// Resolve once the worker is active. May never resolve.
    async fn ready(&self) -> PushResult<()>;

    async fn get_subscription(&self) -> PushResult<Option<PushSubscription>>;

    /// Create a user-visible subscription bound to `application_server_key`.
    async fn subscribe(&self, application_server_key: &[u8]) -> PushResult<PushSubscription>;

    /// Cancel the current subscription. Returns false when there was none.
    async fn unsubscribe(&self) -> PushResult<bool>;
}

/// [`PushPlatform`] backed by a worker container's registration.
#[derive(Debug, Clone)]
pub struct RegistrationPushPlatform {
    container: Arc<ServiceWorkerContainer>,
    supported: bool,
}

impl RegistrationPushPlatform {
    pub fn new(container: Arc<ServiceWorkerContainer>) -> Self {
        Self {
            container,
            supported: true,
        }
    }

    /// Report the push API as present or missing.
    pub fn with_support(mut self, supported: bool) -> Self {
        self.supported = supported;
        self
    }

    pub fn container(&self) -> &Arc<ServiceWorkerContainer> {
        &self.container
    }
}

#[async_trait]
impl PushPlatform for RegistrationPushPlatform {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn permission(&self) -> PermissionState {
        self.container.registration().permission.state().await
    }

    async fn request_permission(&self) -> PermissionState {
        self.container.registration().permission.request().await
    }

    async fn ready(&self) -> PushResult<()> {
        self.container.ready().await?;
        Ok(())
    }

    async fn get_subscription(&self) -> PushResult<Option<PushSubscription>> {
        Ok(self.container.registration().push_manager.get_subscription().await)
    }

    async fn subscribe(&self, application_server_key: &[u8]) -> PushResult<PushSubscription> {
        let registration = self.container.registration();
        let permission = registration.permission.state().await;
        debug!(?permission, "Platform subscribe");
        let subscription = registration
            .push_manager
            .subscribe(
                permission,
                SubscribeOptions {
                    user_visible_only: true,
                    application_server_key: application_server_key.to_vec(),
                },
            )
            .await?;
        Ok(subscription)
    }

    async fn unsubscribe(&self) -> PushResult<bool> {
        Ok(self.container.registration().push_manager.unsubscribe().await)
    }
}
