mod log;
mod slack;

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::config::{NotificationChannelType, NotificationConfig};
use crate::core::device::DiscKind;

pub use log::LogNotifier;
pub use slack::SlackNotifier;

/// Rip lifecycle events forwarded to presentation collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum RipEvent {
    Started {
        handler_id: Uuid,
        device: String,
        kind: DiscKind,
    },
    Succeeded {
        device: String,
        kind: DiscKind,
        artifact: PathBuf,
    },
    Failed {
        device: String,
        kind: DiscKind,
        reason: String,
    },
}

impl RipEvent {
    pub fn device(&self) -> &str {
        match self {
            Self::Started { device, .. }
            | Self::Succeeded { device, .. }
            | Self::Failed { device, .. } => device,
        }
    }
}

/// Trait for notification channel implementations (log, Slack, ...)
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, event: RipEvent) -> Result<()>;
}

/// Delivers every event to each channel. A failing channel is logged and
/// does not stop delivery to the others.
pub struct Notifiers {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl Notifiers {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl NotificationChannel for Notifiers {
    async fn notify(&self, event: RipEvent) -> Result<()> {
        for channel in &self.channels {
            if let Err(e) = channel.notify(event.clone()).await {
                warn!(device = %event.device(), error = %e, "Notification delivery failed");
            }
        }
        Ok(())
    }
}

/// Build the notifier from config. Events are always logged; Slack is added
/// when a webhook is configured.
pub fn create_notifier(config: &NotificationConfig) -> Arc<dyn NotificationChannel> {
    let mut channels: Vec<Arc<dyn NotificationChannel>> = vec![Arc::new(LogNotifier)];

    match &config.channel {
        NotificationChannelType::None => {}
        NotificationChannelType::Slack => match config.slack_webhook.as_deref() {
            Some(webhook) if !webhook.is_empty() => {
                channels.push(Arc::new(SlackNotifier::new(webhook.to_string())));
            }
            _ => warn!("Slack notifications enabled but no webhook configured"),
        },
    }

    Arc::new(Notifiers::new(channels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<RipEvent>>,
    }

    #[async_trait]
    impl NotificationChannel for Recorder {
        async fn notify(&self, event: RipEvent) -> Result<()> {
            self.events.lock().await.push(event);
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl NotificationChannel for Broken {
        async fn notify(&self, _event: RipEvent) -> Result<()> {
            bail!("unreachable webhook")
        }
    }

    #[tokio::test]
    async fn failing_channel_does_not_block_others() {
        let recorder = Arc::new(Recorder::default());
        let notifiers = Notifiers::new(vec![Arc::new(Broken), recorder.clone()]);

        let event = RipEvent::Failed {
            device: "/dev/sr0".into(),
            kind: DiscKind::Audio,
            reason: "disc unreadable".into(),
        };
        notifiers.notify(event.clone()).await.unwrap();

        assert_eq!(*recorder.events.lock().await, vec![event]);
    }
}
