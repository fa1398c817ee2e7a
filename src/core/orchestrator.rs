use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapters;
use crate::config::{AppConfig, ConfigLoader};
use crate::context::AppContext;
use crate::core::source::EventSource;
use crate::core::supervisor::Supervisor;
use crate::core::watchdog::Watchdog;
use crate::core::{eject, ripper};

/// Wires the device monitor, watchdog and supervisor together and runs them
/// until shutdown.
pub struct Orchestrator {
    ctx: AppContext,
    loader: ConfigLoader,
}

impl Orchestrator {
    pub fn new(ctx: AppContext, loader: ConfigLoader) -> Self {
        Self { ctx, loader }
    }

    pub async fn start(&self) -> Result<()> {
        info!(">> discd starting");

        let config = self.ctx.config();
        ensure_output_dirs(&config)?;

        let rippers = ripper::create_rippers(&config);
        let ejector = eject::select(config.eject, config.simulation);
        info!(strategy = ejector.name(), "Eject strategy selected");

        let shutdown = CancellationToken::new();
        let signals = self.spawn_signal_listener(shutdown.clone())?;

        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let supervisor = tokio::spawn(Supervisor::new(self.ctx.clone(), ejector).run(outcome_rx));

        let (event_tx, source) = EventSource::channel();
        let monitor = adapters::get_monitor(config.simulation)?;
        monitor.start(event_tx);

        let watchdog = Watchdog::new(self.ctx.clone(), rippers, outcome_tx, shutdown.clone());
        let result = watchdog.run(source).await;

        monitor.stop();
        // Dropping the watchdog releases its outcome sender; the supervisor
        // then exits once every in-flight handler has finished.
        drop(watchdog);

        self.log_in_flight().await;
        if let Err(e) = supervisor.await {
            error!(error = %e, "Supervisor task failed");
        }

        signals.abort();
        info!(">> discd stopped");
        result
    }

    async fn log_in_flight(&self) {
        let records = self.ctx.registry.snapshot().await;
        if records.is_empty() {
            return;
        }

        let reporting = self.ctx.progress.active_count().await;
        info!(
            in_flight = records.len(),
            reporting,
            "Waiting for in-flight rips, interrupt again to cancel them"
        );
        for record in records {
            let percentage = self
                .ctx
                .progress
                .get(&record.device)
                .await
                .map(|p| p.percentage);
            info!(
                device = %record.device,
                kind = %record.kind,
                handler_id = %record.handler_id,
                state = ?record.state,
                started_at = %record.started_at.format("%H:%M:%S"),
                ?percentage,
                "Rip still running"
            );
        }
    }

    /// SIGINT/SIGTERM: first quits the watchdog, later ones cancel all rips.
    /// SIGHUP: reload settings for discs inserted afterwards.
    fn spawn_signal_listener(&self, shutdown: CancellationToken) -> Result<JoinHandle<()>> {
        let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

        let ctx = self.ctx.clone();
        let loader = self.loader.clone();

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sigint.recv() => interrupt(&ctx, &shutdown).await,
                    _ = sigterm.recv() => interrupt(&ctx, &shutdown).await,
                    _ = sighup.recv() => reload(&ctx, &loader),
                }
            }
        }))
    }
}

async fn interrupt(ctx: &AppContext, shutdown: &CancellationToken) {
    if !shutdown.is_cancelled() {
        info!("Shutdown requested");
        shutdown.cancel();
        return;
    }

    let cancelled = ctx.registry.cancel_all().await;
    warn!(cancelled, "Cancelling in-flight rips");
}

fn reload(ctx: &AppContext, loader: &ConfigLoader) {
    let path = loader.path().display();
    let config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            error!(%path, error = %e, "Failed to reload configuration, keeping the current one");
            return;
        }
    };

    if let Err(e) = ensure_output_dirs(&config) {
        error!(error = %e, "Reloaded configuration unusable, keeping the current one");
        return;
    }

    ctx.replace_config(config);
    info!(%path, "Configuration reloaded");
}

/// Create the video and audio output directories if they are missing.
pub fn ensure_output_dirs(config: &AppConfig) -> Result<()> {
    for settings in [&config.video, &config.audio] {
        std::fs::create_dir_all(&settings.outdir).with_context(|| {
            format!(
                "Failed to create output directory {}",
                settings.outdir.display()
            )
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ensure_output_dirs_creates_missing() {
        let temp = tempdir().unwrap();
        let mut config = AppConfig::default();
        config.video.outdir = temp.path().join("video/nested");
        config.audio.outdir = temp.path().join("audio");

        ensure_output_dirs(&config).unwrap();

        assert!(config.video.outdir.is_dir());
        assert!(config.audio.outdir.is_dir());
    }

    #[test]
    fn test_ensure_output_dirs_reports_failure() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let mut config = AppConfig::default();
        config.video.outdir = file.join("video");
        config.audio.outdir = temp.path().join("audio");

        let err = ensure_output_dirs(&config).unwrap_err();
        assert!(err.to_string().contains("not-a-dir"));
    }
}
