//! Event dispatch.
//!
//! Each event kind maps to one handler. The standard table wires install,
//! activate, fetch, push, and notification-click; hosts may replace entries.

use futures::future::BoxFuture;
use hashbrown::HashMap;
use storykit_net::Request;
use tracing::{debug, info_span, Instrument};

use crate::clients::ClientType;
use crate::lifecycle::ActivationReport;
use crate::notification::{Notification, NotificationClickEvent, PushEvent};
use crate::router::FetchOutcome;
use crate::scope::WorkerScope;
use crate::ServiceWorkerError;

/// Events delivered to the worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Push(PushEvent),
    NotificationClick(NotificationClickEvent),
}

/// Discriminant of [`WorkerEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Push,
    NotificationClick,
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install => EventKind::Install,
            WorkerEvent::Activate => EventKind::Activate,
            WorkerEvent::Fetch(_) => EventKind::Fetch,
            WorkerEvent::Push(_) => EventKind::Push,
            WorkerEvent::NotificationClick(_) => EventKind::NotificationClick,
        }
    }
}

/// What a handler did.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    /// Manifest entries written.
    Installed { entries: usize },
    Activated(ActivationReport),
    Fetch(FetchOutcome),
    NotificationShown(Notification),
    /// An existing window was focused.
    ClientFocused(String),
    /// A new window was opened.
    WindowOpened(String),
    /// No handler for the event, or nothing to do.
    Ignored,
}

pub type HandlerResult = Result<EventOutcome, ServiceWorkerError>;

/// An event handler.
pub type Handler = for<'a> fn(WorkerEvent, &'a WorkerScope) -> BoxFuture<'a, HandlerResult>;

/// Event kind to handler.
#[derive(Clone)]
pub struct DispatchTable {
    handlers: HashMap<EventKind, Handler>,
}

impl DispatchTable {
    /// A table with no handlers; every event is ignored.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The built-in handlers.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register(EventKind::Install, on_install);
        table.register(EventKind::Activate, on_activate);
        table.register(EventKind::Fetch, on_fetch);
        table.register(EventKind::Push, on_push);
        table.register(EventKind::NotificationClick, on_notification_click);
        table
    }

    /// Set the handler for `kind`, returning the one it replaces.
    pub fn register(&mut self, kind: EventKind, handler: Handler) -> Option<Handler> {
        self.handlers.insert(kind, handler)
    }

    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub async fn dispatch(&self, event: WorkerEvent, scope: &WorkerScope) -> HandlerResult {
        let kind = event.kind();
        let Some(handler) = self.handlers.get(&kind).copied() else {
            debug!(?kind, "No handler registered");
            return Ok(EventOutcome::Ignored);
        };
        handler(event, scope)
            .instrument(info_span!("worker_event", ?kind))
            .await
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ==================== Standard Handlers ====================

fn unexpected(kind: EventKind, event: &WorkerEvent) -> ServiceWorkerError {
    ServiceWorkerError::StateError(format!(
        "{kind:?} handler received {:?}",
        event.kind()
    ))
}

fn on_install(event: WorkerEvent, scope: &WorkerScope) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        if !matches!(event, WorkerEvent::Install) {
            return Err(unexpected(EventKind::Install, &event));
        }
        let entries = scope
            .lifecycle()
            .install(scope.caches(), scope.fetcher())
            .await?;
        Ok(EventOutcome::Installed { entries })
    })
}

fn on_activate(event: WorkerEvent, scope: &WorkerScope) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        if !matches!(event, WorkerEvent::Activate) {
            return Err(unexpected(EventKind::Activate, &event));
        }
        let report = scope
            .lifecycle()
            .activate(scope.caches(), scope.clients())
            .await?;
        Ok(EventOutcome::Activated(report))
    })
}

fn on_fetch(event: WorkerEvent, scope: &WorkerScope) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let WorkerEvent::Fetch(request) = event else {
            return Err(unexpected(EventKind::Fetch, &event));
        };
        Ok(EventOutcome::Fetch(scope.router().handle(request, scope).await))
    })
}

fn on_push(event: WorkerEvent, scope: &WorkerScope) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let WorkerEvent::Push(push) = event else {
            return Err(unexpected(EventKind::Push, &event));
        };
        let notification = Notification::from_push(&push, &scope.config().push);
        scope
            .registration()
            .show_notification(notification.clone())
            .await;
        Ok(EventOutcome::NotificationShown(notification))
    })
}

fn on_notification_click(event: WorkerEvent, scope: &WorkerScope) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let WorkerEvent::NotificationClick(click) = event else {
            return Err(unexpected(EventKind::NotificationClick, &event));
        };
        let notification = scope
            .registration()
            .close_notification(click.notification)
            .await
            .ok_or_else(|| {
                ServiceWorkerError::NotFound(format!("notification {:?}", click.notification))
            })?;

        let target = scope
            .config()
            .resolve(&notification.url)
            .map_err(|e| ServiceWorkerError::Config(e.to_string()))?;

        let mut clients = scope.clients().write().await;
        let existing = clients
            .match_all(ClientType::Window)
            .into_iter()
            .find(|c| c.url == target)
            .map(|c| c.id.clone());

        match existing {
            Some(id) => {
                let client = clients.focus(&id)?;
                debug!(client = %client.id, url = %target, "Focused existing window");
                Ok(EventOutcome::ClientFocused(client.id))
            }
            None => {
                let client = clients.open_window(target);
                Ok(EventOutcome::WindowOpened(client.id))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::Client;
    use crate::testing::ScriptedFetcher;
    use std::sync::Arc;
    use storykit_core::StoryKitConfig;
    use url::Url;

    fn scope() -> WorkerScope {
        WorkerScope::new(StoryKitConfig::default(), Arc::new(ScriptedFetcher::new())).unwrap()
    }

    fn ignore(_: WorkerEvent, _: &WorkerScope) -> BoxFuture<'_, HandlerResult> {
        Box::pin(async { Ok(EventOutcome::Ignored) })
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_ignored() {
        let scope = scope();
        let table = DispatchTable::empty();
        let outcome = table.dispatch(WorkerEvent::Install, &scope).await.unwrap();
        assert!(matches!(outcome, EventOutcome::Ignored));
    }

    #[tokio::test]
    async fn test_register_replaces_handler() {
        let scope = scope();
        let mut table = DispatchTable::standard();
        assert!(table.register(EventKind::Push, ignore).is_some());

        let outcome = table
            .dispatch(WorkerEvent::Push(PushEvent::default()), &scope)
            .await
            .unwrap();
        assert!(matches!(outcome, EventOutcome::Ignored));
        assert!(scope.registration().get_notifications().await.is_empty());
    }

    #[tokio::test]
    async fn test_push_shows_notification() {
        let scope = scope();
        let table = DispatchTable::standard();

        let event = PushEvent::with_text(r#"{"title":"Hi","message":"A new story","url":"/#/stories/1"}"#);
        let outcome = table.dispatch(WorkerEvent::Push(event), &scope).await.unwrap();

        let EventOutcome::NotificationShown(shown) = outcome else {
            panic!("expected a notification");
        };
        assert_eq!(shown.title, "Hi");
        assert_eq!(shown.body, "A new story");
        assert_eq!(shown.tag, "new-story");
        assert_eq!(scope.registration().get_notifications().await, vec![shown]);
    }

    #[tokio::test]
    async fn test_push_without_payload_uses_defaults() {
        let scope = scope();
        let outcome = DispatchTable::standard()
            .dispatch(WorkerEvent::Push(PushEvent::with_text("not json")), &scope)
            .await
            .unwrap();

        let EventOutcome::NotificationShown(shown) = outcome else {
            panic!("expected a notification");
        };
        assert_eq!(shown.title, "Our Story");
        assert_eq!(shown.body, "New story added!");
        assert_eq!(shown.url, "/");
    }

    async fn shown_notification(scope: &WorkerScope, payload: &str) -> Notification {
        match DispatchTable::standard()
            .dispatch(WorkerEvent::Push(PushEvent::with_text(payload)), scope)
            .await
            .unwrap()
        {
            EventOutcome::NotificationShown(n) => n,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_click_focuses_matching_window() {
        let scope = scope();
        let existing = Client::window(Url::parse("http://localhost:8080/").unwrap());
        let existing_id = existing.id.clone();
        scope.clients().write().await.add(existing);

        let notification = shown_notification(&scope, r#"{"url":"/"}"#).await;
        let click = NotificationClickEvent {
            notification: notification.id,
        };
        let outcome = DispatchTable::standard()
            .dispatch(WorkerEvent::NotificationClick(click), &scope)
            .await
            .unwrap();

        assert!(matches!(outcome, EventOutcome::ClientFocused(ref id) if *id == existing_id));
        assert!(scope.clients().read().await.get(&existing_id).unwrap().focused);
        assert!(scope.registration().get_notifications().await.is_empty());
    }

    #[tokio::test]
    async fn test_click_opens_window_when_none_matches() {
        let scope = scope();
        scope
            .clients()
            .write()
            .await
            .add(Client::window(Url::parse("http://localhost:8080/#/about").unwrap()));

        let notification = shown_notification(&scope, r#"{"url":"/#/stories/7"}"#).await;
        let click = NotificationClickEvent {
            notification: notification.id,
        };
        let outcome = DispatchTable::standard()
            .dispatch(WorkerEvent::NotificationClick(click), &scope)
            .await
            .unwrap();

        let EventOutcome::WindowOpened(id) = outcome else {
            panic!("expected a new window");
        };
        let clients = scope.clients().read().await;
        let opened = clients.get(&id).unwrap();
        assert_eq!(opened.url.as_str(), "http://localhost:8080/#/stories/7");
        assert!(opened.focused);
        assert_eq!(clients.len(), 2);
    }

    #[tokio::test]
    async fn test_click_on_closed_notification_fails() {
        let scope = scope();
        let notification = shown_notification(&scope, "{}").await;
        scope.registration().close_notification(notification.id).await;

        let click = NotificationClickEvent {
            notification: notification.id,
        };
        let result = DispatchTable::standard()
            .dispatch(WorkerEvent::NotificationClick(click), &scope)
            .await;
        assert!(matches!(result, Err(ServiceWorkerError::NotFound(_))));
    }
}
