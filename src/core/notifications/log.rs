use super::{NotificationChannel, RipEvent};
use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info};

/// Writes rip events to the log.
pub struct LogNotifier;

#[async_trait]
impl NotificationChannel for LogNotifier {
    async fn notify(&self, event: RipEvent) -> Result<()> {
        match event {
            RipEvent::Started {
                handler_id,
                device,
                kind,
            } => info!(device = %device, %kind, %handler_id, "Rip started"),
            RipEvent::Succeeded {
                device,
                kind,
                artifact,
            } => info!(device = %device, %kind, artifact = %artifact.display(), "Rip succeeded"),
            RipEvent::Failed {
                device,
                kind,
                reason,
            } => error!(device = %device, %kind, reason = %reason, "Rip failed"),
        }
        Ok(())
    }
}
