//! Host-facing worker container.

use std::sync::Arc;

use storykit_core::StoryKitConfig;
use storykit_net::{Fetcher, Request};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::dispatch::{DispatchTable, EventOutcome, HandlerResult, WorkerEvent};
use crate::lifecycle::{ActivationReport, ServiceWorkerState};
use crate::registration::ServiceWorkerRegistration;
use crate::router::FetchOutcome;
use crate::scope::WorkerScope;
use crate::ServiceWorkerError;

/// Events published by the container.
#[derive(Debug, Clone)]
pub enum ContainerEvent {
    /// The worker moved to a new state.
    StateChange {
        generation: String,
        new_state: ServiceWorkerState,
    },
    /// The worker took control of clients.
    ControllerChange { claimed: usize },
}

/// Result of [`ServiceWorkerContainer::start`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartReport {
    /// Manifest entries cached during install.
    pub entries: usize,
    /// Present when the worker activated right after install.
    pub activation: Option<ActivationReport>,
}

/// The worker as seen by the page (navigator.serviceWorker).
pub struct ServiceWorkerContainer {
    scope: Arc<WorkerScope>,
    table: DispatchTable,
    event_tx: mpsc::UnboundedSender<ContainerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a container with the standard handlers.
    pub fn new(
        config: StoryKitConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ContainerEvent>), ServiceWorkerError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let scope = WorkerScope::new(config, fetcher)?;
        Ok((
            Self {
                scope: Arc::new(scope),
                table: DispatchTable::standard(),
                event_tx,
            },
            event_rx,
        ))
    }

    /// Replace the dispatch table.
    pub fn with_table(mut self, table: DispatchTable) -> Self {
        self.table = table;
        self
    }

    pub fn scope(&self) -> &Arc<WorkerScope> {
        &self.scope
    }

    pub fn registration(&self) -> Arc<ServiceWorkerRegistration> {
        self.scope.registration().clone()
    }

    pub fn state(&self) -> ServiceWorkerState {
        self.scope.lifecycle().state()
    }

    fn publish_state(&self) {
        let _ = self.event_tx.send(ContainerEvent::StateChange {
            generation: self.scope.lifecycle().generation().to_string(),
            new_state: self.state(),
        });
    }

    /// Deliver one event to its handler.
    pub async fn dispatch(&self, event: WorkerEvent) -> HandlerResult {
        let lifecycle_event = matches!(event, WorkerEvent::Install | WorkerEvent::Activate);
        let result = self.table.dispatch(event, &self.scope).await;

        if lifecycle_event {
            self.publish_state();
        }
        if let Ok(EventOutcome::Activated(ref report)) = result {
            let _ = self.event_tx.send(ContainerEvent::ControllerChange {
                claimed: report.claimed,
            });
        }
        result
    }

    /// Install, then activate straight away if install asked to skip waiting.
    pub async fn start(&self) -> Result<StartReport, ServiceWorkerError> {
        let entries = match self.dispatch(WorkerEvent::Install).await? {
            EventOutcome::Installed { entries } => entries,
            _ => 0,
        };

        let mut report = StartReport {
            entries,
            activation: None,
        };
        if self.scope.lifecycle().skip_waiting_requested() {
            if let EventOutcome::Activated(activation) =
                self.dispatch(WorkerEvent::Activate).await?
            {
                report.activation = Some(activation);
            }
        }

        info!(
            entries = report.entries,
            state = ?self.state(),
            "Worker started"
        );
        Ok(report)
    }

    /// Resolve once the worker is active. Unbounded; see
    /// [`crate::LifecycleManager::ready`].
    pub async fn ready(&self) -> Result<(), ServiceWorkerError> {
        self.scope.lifecycle().ready().await
    }

    /// Route a request through the fetch handler.
    pub async fn fetch(&self, request: Request) -> FetchOutcome {
        match self.dispatch(WorkerEvent::Fetch(request)).await {
            Ok(EventOutcome::Fetch(outcome)) => outcome,
            Ok(_) => FetchOutcome::Passthrough,
            Err(e) => {
                warn!(error = %e, "Fetch handler failed");
                FetchOutcome::NetworkError(e.to_string())
            }
        }
    }

    /// Wait for all lifetime extensions.
    pub async fn settle(&self) -> usize {
        self.scope.settle().await
    }
}

impl std::fmt::Debug for ServiceWorkerContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorkerContainer")
            .field("scope", &self.scope)
            .field("table", &self.table)
            .finish()
    }
}
