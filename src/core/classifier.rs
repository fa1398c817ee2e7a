//! Collapses the noisy udev stream for optical drives into actionable commands.
//!
//! A single physical insert or eject produces several partial events. Only the
//! event carrying the OS "settled" state is turned into an insert, so no timer
//! based debounce is needed.

use super::device::{DeviceEvent, DiscKind, MediaState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Ignore,
    EjectRequested { device: String },
    Insert { device: String, kind: DiscKind },
}

/// Map a device event to exactly one classification. Rules apply in order.
pub fn classify(event: &DeviceEvent) -> Classification {
    let Some(device) = event.device_id.clone() else {
        return Classification::Ignore;
    };

    if event.eject_requested || event.tray_out() {
        return Classification::EjectRequested { device };
    }

    if !event.media_changed {
        return Classification::Ignore;
    }

    match event.media_state {
        MediaState::Complete => Classification::Insert {
            device,
            kind: DiscKind::Video,
        },
        MediaState::Unknown => Classification::Insert {
            device,
            kind: DiscKind::Audio,
        },
        MediaState::Other(_) => Classification::Ignore,
    }
}
