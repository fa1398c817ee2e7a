use std::os::fd::AsFd;
use std::time::Duration;

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::core::{DeviceMonitor, PropertyBag};

#[derive(Debug, Clone)]
pub struct LinuxMonitorConfig {
    /// udev subsystem to listen on. Optical drives live under `block`.
    pub subsystem: String,
    /// How long one poll on the udev socket may block before the stop flag
    /// is checked again.
    pub poll_timeout: Duration,
}

impl Default for LinuxMonitorConfig {
    fn default() -> Self {
        Self {
            subsystem: "block".to_string(),
            poll_timeout: Duration::from_millis(500),
        }
    }
}

/// Listens on the udev netlink socket from a dedicated thread.
pub struct LinuxMonitor {
    config: LinuxMonitorConfig,
    cancel: CancellationToken,
}

impl LinuxMonitor {
    pub fn new(config: LinuxMonitorConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(LinuxMonitorConfig::default())
    }
}

impl DeviceMonitor for LinuxMonitor {
    fn start(&self, event_sender: mpsc::Sender<PropertyBag>) {
        let config = self.config.clone();
        let cancel = self.cancel.clone();

        info!(subsystem = %config.subsystem, "(LinuxMonitor) Starting udev listener thread");

        let spawned = std::thread::Builder::new()
            .name("udev-monitor".to_string())
            .spawn(move || {
                if let Err(e) = listen(&config, &event_sender, &cancel) {
                    error!(error = %e, "udev monitor stopped");
                }
            });

        if let Err(e) = spawned {
            error!(error = %e, "Failed to spawn udev monitor thread");
        }
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}

/// The udev socket is not `Send`, so it is created and used on this thread only.
fn listen(
    config: &LinuxMonitorConfig,
    tx: &mpsc::Sender<PropertyBag>,
    cancel: &CancellationToken,
) -> Result<()> {
    let socket = udev::MonitorBuilder::new()
        .context("Failed to create udev monitor")?
        .match_subsystem(&config.subsystem)
        .context("Failed to filter udev subsystem")?
        .listen()
        .context("Failed to listen on udev socket")?;

    let millis = u16::try_from(config.poll_timeout.as_millis()).unwrap_or(u16::MAX);
    let timeout = PollTimeout::from(millis);

    while !cancel.is_cancelled() {
        let mut fds = [PollFd::new(socket.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, timeout) {
            Ok(0) => continue,
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e).context("poll on udev socket failed"),
        }

        for event in socket.iter() {
            let props: PropertyBag = event
                .properties()
                .map(|entry| {
                    (
                        entry.name().to_string_lossy().into_owned(),
                        entry.value().to_string_lossy().into_owned(),
                    )
                })
                .collect();

            if tx.blocking_send(props).is_err() {
                debug!("Event receiver dropped, stopping udev monitor");
                return Ok(());
            }
        }
    }

    debug!("udev monitor cancelled");
    Ok(())
}
