//! In-memory progress tracking for active rips.
//!
//! Progress is updated frequently by the rippers and is never persisted.
//! Entries are keyed by device and dropped once the handler for that device
//! has finished.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::device::DiscKind;

#[derive(Debug, Clone, PartialEq)]
pub struct RipProgress {
    pub kind: DiscKind,
    /// Short description of what the ripper is doing right now.
    pub stage: String,
    pub percentage: u8,
}

/// Thread-safe store for the latest progress of every active rip.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<RwLock<HashMap<String, RipProgress>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle given to a single ripper so it can only report for its own device.
    pub fn sink(&self, device: &str) -> ProgressSink {
        ProgressSink {
            tracker: self.clone(),
            device: device.to_string(),
        }
    }

    pub async fn update(&self, device: &str, progress: RipProgress) {
        let mut map = self.inner.write().await;
        map.insert(device.to_string(), progress);
    }

    pub async fn get(&self, device: &str) -> Option<RipProgress> {
        let map = self.inner.read().await;
        map.get(device).cloned()
    }

    pub async fn remove(&self, device: &str) {
        let mut map = self.inner.write().await;
        map.remove(device);
    }

    pub async fn active_count(&self) -> usize {
        let map = self.inner.read().await;
        map.len()
    }
}

/// Progress reporter scoped to one device.
#[derive(Clone)]
pub struct ProgressSink {
    tracker: ProgressTracker,
    device: String,
}

impl ProgressSink {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub async fn report(&self, progress: RipProgress) {
        self.tracker.update(&self.device, progress).await;
    }
}
