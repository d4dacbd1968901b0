//! The registration: scope, push manager, permission, and notifications.

use tokio::sync::RwLock;
use tracing::info;
use url::Url;

use crate::notification::{Notification, NotificationCenter, NotificationId};
use crate::push::{NotificationPermission, PushManager};

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Platform push service for this registration.
    pub push_manager: PushManager,

    /// Notification permission of the origin.
    pub permission: NotificationPermission,

    notifications: RwLock<NotificationCenter>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url, push_service_url: Url) -> Self {
        Self {
            scope,
            push_manager: PushManager::new(push_service_url),
            permission: NotificationPermission::default(),
            notifications: RwLock::new(NotificationCenter::default()),
        }
    }

    pub async fn show_notification(&self, notification: Notification) {
        info!(title = %notification.title, tag = %notification.tag, "Showing notification");
        self.notifications.write().await.show(notification);
    }

    pub async fn close_notification(&self, id: NotificationId) -> Option<Notification> {
        self.notifications.write().await.close(id)
    }

    /// Notifications currently shown.
    pub async fn get_notifications(&self) -> Vec<Notification> {
        self.notifications.read().await.shown().to_vec()
    }
}
