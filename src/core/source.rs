use std::time::Duration;

use tokio::sync::mpsc;

use super::device::{DeviceEvent, PropertyBag};

/// Capacity of the channel between an OS monitor and the watchdog.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// OS-side producer of device notifications.
pub trait DeviceMonitor: Send + Sync {
    /// Start listening for device notifications.
    /// Spawns internal threads or tasks that send property bags to the channel.
    fn start(&self, event_sender: mpsc::Sender<PropertyBag>);

    /// Stop the monitor. Takes effect within one internal poll interval.
    fn stop(&self);
}

#[derive(Debug, PartialEq)]
pub enum Polled {
    Event(DeviceEvent),
    Timeout,
    /// Every monitor has gone away; no more events will arrive.
    Closed,
}

/// Consumer side of the monitor channel with a bounded wait.
pub struct EventSource {
    rx: mpsc::Receiver<PropertyBag>,
}

impl EventSource {
    pub fn new(rx: mpsc::Receiver<PropertyBag>) -> Self {
        Self { rx }
    }

    pub fn channel() -> (mpsc::Sender<PropertyBag>, Self) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (tx, Self::new(rx))
    }

    /// Wait at most `timeout` for the next notification.
    pub async fn next_event(&mut self, timeout: Duration) -> Polled {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(props)) => Polled::Event(DeviceEvent::from_properties(&props)),
            Ok(None) => Polled::Closed,
            Err(_) => Polled::Timeout,
        }
    }
}
