use std::sync::Arc;

use tokio::sync::watch;

use crate::config::AppConfig;
use crate::core::notifications::{NotificationChannel, create_notifier};
use crate::core::{HandlerRegistry, ProgressTracker};

/// State shared between the watchdog, the supervisor and the signal handler.
#[derive(Clone)]
pub struct AppContext {
    config: Arc<watch::Sender<Arc<AppConfig>>>,
    pub registry: HandlerRegistry,
    pub progress: ProgressTracker,
    pub notifier: Arc<dyn NotificationChannel>,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        let notifier = create_notifier(&config.notifications);
        Self::with_notifier(config, notifier)
    }

    pub fn with_notifier(config: AppConfig, notifier: Arc<dyn NotificationChannel>) -> Self {
        let (config, _) = watch::channel(Arc::new(config));
        Self {
            config: Arc::new(config),
            registry: HandlerRegistry::new(),
            progress: ProgressTracker::new(),
            notifier,
        }
    }

    /// Current settings. Handlers keep the snapshot they were started with.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.borrow().clone()
    }

    /// Swap the settings used for subsequently inserted discs.
    pub fn replace_config(&self, config: AppConfig) {
        self.config.send_replace(Arc::new(config));
    }
}
