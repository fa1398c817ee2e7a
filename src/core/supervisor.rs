//! Consumes handler outcomes and cleans up after finished handlers.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::eject::EjectStrategy;
use super::handler::{HandlerOutcome, OutcomeMessage};
use super::notifications::RipEvent;
use crate::context::AppContext;

pub struct Supervisor {
    ctx: AppContext,
    ejector: Arc<dyn EjectStrategy>,
    deliveries: TaskTracker,
}

impl Supervisor {
    pub fn new(ctx: AppContext, ejector: Arc<dyn EjectStrategy>) -> Self {
        Self {
            ctx,
            ejector,
            deliveries: TaskTracker::new(),
        }
    }

    /// Process outcomes until every sender (the watchdog and all handlers)
    /// has been dropped.
    pub async fn run(self, mut outcomes: mpsc::UnboundedReceiver<OutcomeMessage>) {
        while let Some(msg) = outcomes.recv().await {
            self.handle(msg).await;
        }

        self.deliveries.close();
        if !self.deliveries.is_empty() {
            debug!(pending = self.deliveries.len(), "Waiting for notification delivery");
        }
        self.deliveries.wait().await;
        debug!("Supervisor stopped");
    }

    pub async fn handle(&self, msg: OutcomeMessage) {
        let OutcomeMessage {
            handler_id,
            device,
            kind,
            outcome,
        } = msg;

        let event = match outcome {
            HandlerOutcome::Success { artifact } => RipEvent::Succeeded {
                device: device.clone(),
                kind,
                artifact,
            },
            HandlerOutcome::Failure { reason } => RipEvent::Failed {
                device: device.clone(),
                kind,
                reason,
            },
            HandlerOutcome::Finished => {
                self.finish(&device, handler_id).await;
                return;
            }
        };

        if !self.ctx.registry.mark_completing(&device, handler_id).await {
            warn!(device = %device, %handler_id, "Outcome from a handler that is not registered");
        }
        // Relayed even for untracked handlers. Delivery never blocks the
        // outcome loop.
        let notifier = self.ctx.notifier.clone();
        self.deliveries.spawn(async move {
            let _ = notifier.notify(event).await;
        });
    }

    async fn finish(&self, device: &str, handler_id: uuid::Uuid) {
        let Some(handle) = self.ctx.registry.handle_for(device, handler_id).await else {
            warn!(device = %device, %handler_id, "Finished handler was not in the registry");
            return;
        };

        handle.wait().await;

        if self.ctx.registry.remove(device, handler_id).await.is_none() {
            warn!(device = %device, %handler_id, "Handler record vanished before cleanup");
        }
        self.ctx.progress.remove(device).await;
        drop(handle);

        info!(device = %device, %handler_id, "Handler finished, ejecting disc");
        self.eject(device).await;
    }

    async fn eject(&self, device: &str) {
        let ejector = self.ejector.clone();
        let target = device.to_string();
        let result = tokio::task::spawn_blocking(move || ejector.eject(&target)).await;

        match result {
            Ok(Ok(())) => debug!(device = %device, strategy = self.ejector.name(), "Disc ejected"),
            Ok(Err(e)) => warn!(device = %device, error = %e, "Failed to eject disc"),
            Err(e) => warn!(device = %device, error = %e, "Eject task panicked"),
        }
    }
}
