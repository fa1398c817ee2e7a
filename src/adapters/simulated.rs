use std::io::BufRead;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::device::{
    DEVICE_NAME, DiscKind, EJECT_REQUEST, MEDIA_CHANGE, MEDIA_STATE, PropertyBag, SYSTEMD_READY,
};
use crate::core::DeviceMonitor;

/// Handle used to inject udev-like notifications into a [`SimulatedMonitor`].
#[derive(Clone)]
pub struct Simulator {
    tx: mpsc::UnboundedSender<PropertyBag>,
}

impl Simulator {
    /// Emits what a drive reports for a physical insert: a not-yet-settled
    /// notification followed by the settled media change.
    pub fn insert_disc(&self, device: &str, kind: DiscKind) {
        let state = match kind {
            DiscKind::Video => "complete",
            DiscKind::Audio => "",
        };

        self.send(&[(DEVICE_NAME, device), (MEDIA_STATE, "blank")]);
        self.send(&[
            (DEVICE_NAME, device),
            (MEDIA_CHANGE, "1"),
            (MEDIA_STATE, state),
        ]);
    }

    /// Eject button pressed.
    pub fn eject(&self, device: &str) {
        self.send(&[(DEVICE_NAME, device), (EJECT_REQUEST, "1")]);
    }

    /// Tray physically out.
    pub fn tray_out(&self, device: &str) {
        self.send(&[(DEVICE_NAME, device), (SYSTEMD_READY, "0")]);
    }

    pub fn send_properties(&self, props: PropertyBag) {
        let _ = self.tx.send(props);
    }

    /// Drive the simulator from line commands until the reader is exhausted.
    pub fn read_commands(&self, reader: impl BufRead) {
        for line in reader.lines() {
            let Ok(line) = line else { break };
            let parts: Vec<&str> = line.split_whitespace().collect();
            let device = parts.get(1).copied().unwrap_or("/dev/sr0");

            match parts.first().copied() {
                Some("insert") => match parts.get(2).copied() {
                    Some("audio") => self.insert_disc(device, DiscKind::Audio),
                    Some("video") | None => self.insert_disc(device, DiscKind::Video),
                    Some(other) => warn!(kind = other, "(Simulator) Unknown disc kind"),
                },
                Some("eject") => self.eject(device),
                Some("tray") => self.tray_out(device),
                Some(_) => {
                    info!("(Simulator) Use: 'insert <dev> [video|audio]', 'eject <dev>' or 'tray <dev>'")
                }
                None => {}
            }
        }
    }

    fn send(&self, pairs: &[(&str, &str)]) {
        self.send_properties(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
    }
}

/// Device monitor fed by a [`Simulator`]. The event stream stays open until
/// `stop()`, even after every external simulator handle is gone.
pub struct SimulatedMonitor {
    // The receiver is moved out in `start()`, which only takes &self.
    cmd_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<PropertyBag>>>>,
    simulator: Simulator,
    cancel: CancellationToken,
}

impl SimulatedMonitor {
    pub fn new() -> (Self, Simulator) {
        let (tx, rx) = mpsc::unbounded_channel();
        let simulator = Simulator { tx };

        (
            Self {
                cmd_rx: Arc::new(Mutex::new(Some(rx))),
                simulator: simulator.clone(),
                cancel: CancellationToken::new(),
            },
            simulator,
        )
    }

    /// Another handle onto this monitor's event stream.
    pub fn simulator(&self) -> Simulator {
        self.simulator.clone()
    }
}

impl DeviceMonitor for SimulatedMonitor {
    fn start(&self, daemon_tx: mpsc::Sender<PropertyBag>) {
        let rx = self.cmd_rx.lock().ok().and_then(|mut rx| rx.take());
        let Some(mut rx) = rx else {
            warn!("(SimulatedMonitor) start() called twice, ignoring");
            return;
        };
        let cancel = self.cancel.clone();

        info!("(SimulatedMonitor) Listening for simulator commands");

        tokio::spawn(async move {
            loop {
                let props = tokio::select! {
                    _ = cancel.cancelled() => break,
                    props = rx.recv() => match props {
                        Some(props) => props,
                        None => break,
                    },
                };

                if daemon_tx.send(props).await.is_err() {
                    break;
                }
            }
        });
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_commands() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let simulator = Simulator { tx };

        simulator.read_commands(Cursor::new("insert /dev/sr1 audio\nbogus\neject /dev/sr1\n"));

        let mut events = Vec::new();
        while let Ok(props) = rx.try_recv() {
            events.push(props);
        }

        assert_eq!(events.len(), 3);
        assert_eq!(events[1][MEDIA_CHANGE], "1");
        assert_eq!(events[1][MEDIA_STATE], "");
        assert_eq!(events[2][EJECT_REQUEST], "1");
        assert!(events.iter().all(|e| e[DEVICE_NAME] == "/dev/sr1"));
    }
}
