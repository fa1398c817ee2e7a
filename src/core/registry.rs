//! Device → active handler mapping.
//!
//! Invariant: at most one record per device. Records are only ever removed
//! by the handler that owns them (matched by handler id), so a late message
//! from an earlier handler cannot evict a newer one.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::device::DiscKind;
use super::handler::DiscHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Running,
    Completing,
    Done,
}

pub struct HandlerRecord {
    pub handler_id: Uuid,
    pub device: String,
    pub kind: DiscKind,
    pub state: HandlerState,
    pub started_at: DateTime<Utc>,
    handle: Arc<dyn DiscHandler>,
}

impl HandlerRecord {
    pub fn new(handler_id: Uuid, device: &str, kind: DiscKind, handle: Arc<dyn DiscHandler>) -> Self {
        Self {
            handler_id,
            device: device.to_string(),
            kind,
            state: HandlerState::Running,
            started_at: Utc::now(),
            handle,
        }
    }

    pub fn handle(&self) -> &Arc<dyn DiscHandler> {
        &self.handle
    }

    fn summary(&self) -> RecordSummary {
        RecordSummary {
            handler_id: self.handler_id,
            device: self.device.clone(),
            kind: self.kind,
            state: self.state,
            started_at: self.started_at,
        }
    }
}

/// Read-only view of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSummary {
    pub handler_id: Uuid,
    pub device: String,
    pub kind: DiscKind,
    pub state: HandlerState,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{device} already has an active {kind} handler ({handler_id})")]
    AlreadyActive {
        device: String,
        kind: DiscKind,
        handler_id: Uuid,
    },
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<Mutex<HashMap<String, HandlerRecord>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, device: &str) -> bool {
        self.inner.lock().await.contains_key(device)
    }

    /// Register a new record. Never overwrites an existing one.
    pub async fn insert(&self, record: HandlerRecord) -> Result<(), RegistryError> {
        let mut map = self.inner.lock().await;
        if let Some(existing) = map.get(&record.device) {
            return Err(RegistryError::AlreadyActive {
                device: existing.device.clone(),
                kind: existing.kind,
                handler_id: existing.handler_id,
            });
        }
        map.insert(record.device.clone(), record);
        Ok(())
    }

    pub async fn state(&self, device: &str) -> Option<HandlerState> {
        self.inner.lock().await.get(device).map(|r| r.state)
    }

    pub async fn get(&self, device: &str) -> Option<RecordSummary> {
        self.inner.lock().await.get(device).map(HandlerRecord::summary)
    }

    /// Move a running record to `Completing` and hand back its handler so the
    /// caller can cancel it. Returns `None` if there is nothing running.
    pub async fn begin_cancel(&self, device: &str) -> Option<Arc<dyn DiscHandler>> {
        let mut map = self.inner.lock().await;
        let record = map.get_mut(device)?;
        if record.state != HandlerState::Running {
            return None;
        }
        record.state = HandlerState::Completing;
        Some(record.handle.clone())
    }

    /// Returns false if the device is not owned by `handler_id`.
    pub async fn mark_completing(&self, device: &str, handler_id: Uuid) -> bool {
        let mut map = self.inner.lock().await;
        match map.get_mut(device) {
            Some(record) if record.handler_id == handler_id => {
                record.state = HandlerState::Completing;
                true
            }
            _ => false,
        }
    }

    pub async fn handle_for(&self, device: &str, handler_id: Uuid) -> Option<Arc<dyn DiscHandler>> {
        let map = self.inner.lock().await;
        map.get(device)
            .filter(|r| r.handler_id == handler_id)
            .map(|r| r.handle.clone())
    }

    /// Remove the record for `device` if it belongs to `handler_id`.
    /// The returned record is marked `Done`.
    pub async fn remove(&self, device: &str, handler_id: Uuid) -> Option<HandlerRecord> {
        let mut map = self.inner.lock().await;
        if map.get(device)?.handler_id != handler_id {
            return None;
        }
        let mut record = map.remove(device)?;
        record.state = HandlerState::Done;
        Some(record)
    }

    /// Cancel every running handler. Returns how many were cancelled.
    pub async fn cancel_all(&self) -> usize {
        let handles: Vec<_> = {
            let mut map = self.inner.lock().await;
            map.values_mut()
                .filter(|r| r.state == HandlerState::Running)
                .map(|r| {
                    r.state = HandlerState::Completing;
                    r.handle.clone()
                })
                .collect()
        };

        for handle in &handles {
            handle.cancel();
        }
        handles.len()
    }

    pub async fn snapshot(&self) -> Vec<RecordSummary> {
        let map = self.inner.lock().await;
        let mut records: Vec<_> = map.values().map(HandlerRecord::summary).collect();
        records.sort_by(|a, b| a.device.cmp(&b.device));
        records
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
