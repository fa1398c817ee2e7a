//! The dispatch loop: turns device notifications into rip handlers.
//!
//! Events are processed one at a time in arrival order. Handler outcomes
//! never come back through this loop; they go straight to the
//! [`Supervisor`](super::supervisor::Supervisor) over the outcome channel.

use std::time::Duration;

use anyhow::{Result, bail};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::classifier::{Classification, classify};
use super::device::{DeviceEvent, DiscKind};
use super::handler::{OutcomeMessage, OutcomeSender, RipRequest, Rippers};
use super::notifications::RipEvent;
use super::registry::{HandlerRecord, RegistryError};
use super::source::{EventSource, Polled};
use crate::context::AppContext;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    AlreadyActive(#[from] RegistryError),
    #[error("no {kind} ripper available for {device}")]
    CollaboratorUnavailable { device: String, kind: DiscKind },
    #[error("failed to start {kind} handler for {device}: {reason}")]
    Handler {
        device: String,
        kind: DiscKind,
        reason: String,
    },
}

pub struct Watchdog {
    ctx: AppContext,
    rippers: Rippers,
    outcomes: mpsc::UnboundedSender<OutcomeMessage>,
    poll_timeout: Duration,
    shutdown: CancellationToken,
}

impl Watchdog {
    pub fn new(
        ctx: AppContext,
        rippers: Rippers,
        outcomes: mpsc::UnboundedSender<OutcomeMessage>,
        shutdown: CancellationToken,
    ) -> Self {
        let poll_timeout = ctx.config().poll_timeout();
        Self {
            ctx,
            rippers,
            outcomes,
            poll_timeout,
            shutdown,
        }
    }

    /// Ask the loop to exit. Running handlers are left alone.
    pub fn quit(&self) {
        self.shutdown.cancel();
    }

    /// Run until `quit()` is called or the shutdown token is cancelled.
    /// Exits within one poll timeout of the request.
    pub async fn run(&self, mut source: EventSource) -> Result<()> {
        info!(
            poll_timeout_ms = self.poll_timeout.as_millis() as u64,
            capabilities = ?self.rippers.capabilities(),
            "Watchdog started"
        );

        while !self.shutdown.is_cancelled() {
            match source.next_event(self.poll_timeout).await {
                Polled::Timeout => continue,
                Polled::Event(event) => self.handle_event(&event).await,
                Polled::Closed if self.shutdown.is_cancelled() => break,
                Polled::Closed => bail!("device event source closed unexpectedly"),
            }
        }

        let in_flight = self.ctx.registry.len().await;
        info!(in_flight, "Watchdog stopped");
        Ok(())
    }

    pub async fn handle_event(&self, event: &DeviceEvent) {
        match classify(event) {
            Classification::Ignore => {
                if let Some(device) = &event.device_id {
                    debug!(device = %device, ?event, "Ignoring device event");
                }
            }
            Classification::EjectRequested { device } => self.handle_eject(&device).await,
            Classification::Insert { device, kind } => {
                match self.handle_insert(&device, kind).await {
                    Ok(_) => {}
                    Err(DispatchError::AlreadyActive(e)) => {
                        info!(device = %device, %kind, "Ignoring insert: {}", e);
                    }
                    Err(e) => error!(device = %device, %kind, error = %e, "Dropping insert"),
                }
            }
        }
    }

    /// Start a handler for a newly inserted disc. Returns the new handler id.
    pub async fn handle_insert(&self, device: &str, kind: DiscKind) -> Result<Uuid, DispatchError> {
        if let Some(existing) = self.ctx.registry.get(device).await {
            return Err(RegistryError::AlreadyActive {
                device: existing.device,
                kind: existing.kind,
                handler_id: existing.handler_id,
            }
            .into());
        }

        let factory = self
            .rippers
            .get(kind)
            .ok_or_else(|| DispatchError::CollaboratorUnavailable {
                device: device.to_string(),
                kind,
            })?;

        let config = self.ctx.config();
        let settings = config.rip_settings(kind);
        let handler_id = Uuid::now_v7();
        let request = RipRequest {
            device: device.to_string(),
            kind,
            outdir: settings.outdir.clone(),
            options: settings.options.clone(),
            progress: self.ctx.progress.sink(device),
        };
        let outcomes = OutcomeSender::new(handler_id, device, kind, self.outcomes.clone());

        let handle = factory
            .create(request, outcomes)
            .map_err(|e| DispatchError::Handler {
                device: device.to_string(),
                kind,
                reason: format!("{e:#}"),
            })?;

        self.ctx
            .registry
            .insert(HandlerRecord::new(handler_id, device, kind, handle.clone()))
            .await?;

        if let Err(e) = handle.start() {
            self.ctx.registry.remove(device, handler_id).await;
            return Err(DispatchError::Handler {
                device: device.to_string(),
                kind,
                reason: format!("{e:#}"),
            });
        }

        info!(device = %device, %kind, %handler_id, ripper = factory.name(), "Handler started");

        let notifier = self.ctx.notifier.clone();
        let event = RipEvent::Started {
            handler_id,
            device: device.to_string(),
            kind,
        };
        tokio::spawn(async move {
            let _ = notifier.notify(event).await;
        });

        Ok(handler_id)
    }

    /// Cancel the running handler for `device`, if any. The tray is ejected by
    /// the supervisor once the handler reports `Finished`.
    pub async fn handle_eject(&self, device: &str) {
        match self.ctx.registry.begin_cancel(device).await {
            Some(handle) => {
                warn!(device = %device, "Eject requested during rip, cancelling handler");
                handle.cancel();
            }
            None => debug!(device = %device, "Eject requested, no running handler"),
        }
    }

    /// Cancel every running handler. Returns how many were cancelled.
    pub async fn cancel_all(&self) -> usize {
        self.ctx.registry.cancel_all().await
    }
}
