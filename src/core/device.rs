use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// udev property holding the device node, e.g. `/dev/sr0`.
pub const DEVICE_NAME: &str = "DEVNAME";
/// Set to "1" when the disc media changed.
pub const MEDIA_CHANGE: &str = "DISK_MEDIA_CHANGE";
/// Settle state of the media: "" for audio, "complete" for data/video.
pub const MEDIA_STATE: &str = "ID_CDROM_MEDIA_STATE";
/// Present when the eject button was pressed.
pub const EJECT_REQUEST: &str = "DISK_EJECT_REQUEST";
/// "0" once the tray is physically out.
pub const SYSTEMD_READY: &str = "SYSTEMD_READY";

/// Raw key/value properties of a single device notification.
pub type PropertyBag = HashMap<String, String>;

/// Kind of disc a handler is ripping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscKind {
    Audio,
    Video,
}

impl DiscKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for DiscKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaState {
    /// Empty or missing state. Audio CDs settle this way.
    Unknown,
    Complete,
    Other(String),
}

impl MediaState {
    fn parse(raw: Option<&str>) -> Self {
        match raw.unwrap_or("") {
            "" => Self::Unknown,
            "complete" => Self::Complete,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A single device notification, as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub device_id: Option<String>,
    pub media_changed: bool,
    pub media_state: MediaState,
    pub eject_requested: bool,
    /// Raw `SYSTEMD_READY` value, if the property was present.
    pub tray_ready: Option<String>,
}

impl DeviceEvent {
    pub fn from_properties(props: &PropertyBag) -> Self {
        let get = |key: &str| props.get(key).map(String::as_str);

        Self {
            device_id: get(DEVICE_NAME).map(str::to_string),
            media_changed: get(MEDIA_CHANGE) == Some("1"),
            media_state: MediaState::parse(get(MEDIA_STATE)),
            eject_requested: get(EJECT_REQUEST).is_some_and(|v| !v.is_empty()),
            tray_ready: get(SYSTEMD_READY).map(str::to_string),
        }
    }

    /// True when the drive reports its tray as physically out.
    pub fn tray_out(&self) -> bool {
        self.tray_ready.as_deref() == Some("0")
    }
}

impl From<PropertyBag> for DeviceEvent {
    fn from(props: PropertyBag) -> Self {
        Self::from_properties(&props)
    }
}
