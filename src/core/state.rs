//! Drive flag derivation.
//!
//! `busy` comes from the shared drive list, `online` from the per-drive
//! status. The two arrive on independent streams in any order; each update
//! only replaces its own half and the flags are recomputed from whatever is
//! latest on both sides.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::api::{Device, DriveStatus, MamAttribute};

/// Status token marking a drive usable for media operations.
pub const ONLINE_TOKEN: &str = "ONLINE";

/// True if `name` is present in `devices` and a task currently owns it.
pub fn is_busy(devices: &[Device], name: &str) -> bool {
    devices
        .iter()
        .find(|dev| dev.name == name)
        .is_some_and(Device::is_locked)
}

/// True if the status flags contain the `ONLINE` token.
pub fn is_online(status: Option<&DriveStatus>) -> bool {
    status.is_some_and(|s| s.status.split_whitespace().any(|tok| tok == ONLINE_TOKEN))
}

/// Gating flags of a drive panel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveFlags {
    pub online: bool,
    pub busy: bool,
    /// Set once, the first time the drive was seen idle.
    pub loaded: bool,
}

/// Cached results of the synchronous media commands, keyed by command name.
///
/// Only meaningful while the medium stays accessible; it is emptied as soon
/// as the drive goes offline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaListing {
    results: BTreeMap<String, Value>,
}

impl MediaListing {
    pub fn insert(&mut self, command: &str, value: Value) {
        self.results.insert(command.to_string(), value);
    }

    pub fn get(&self, command: &str) -> Option<&Value> {
        self.results.get(command)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.results.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Decoded cartridge memory rows, empty if absent or malformed.
    pub fn cartridge_memory(&self) -> Vec<MamAttribute> {
        self.results
            .get("cartridge-memory")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }
}

/// Latest view of one drive, merged from both snapshot streams.
#[derive(Debug, Clone)]
pub struct DeviceStateModel {
    drive: String,
    device: Option<Device>,
    status: Option<DriveStatus>,
    media: MediaListing,
    online: bool,
    busy: bool,
}

impl DeviceStateModel {
    pub fn new(drive: impl Into<String>) -> Self {
        Self {
            drive: drive.into(),
            device: None,
            status: None,
            media: MediaListing::default(),
            online: false,
            busy: false,
        }
    }

    pub fn drive(&self) -> &str {
        &self.drive
    }

    /// Take a new drive list snapshot and return the recomputed `busy`.
    ///
    /// A drive missing from the snapshot is neither busy nor online.
    pub fn apply_devices(&mut self, devices: &[Device]) -> bool {
        self.device = devices.iter().find(|dev| dev.name == self.drive).cloned();
        self.busy = is_busy(devices, &self.drive);
        if self.device.is_none() {
            self.status = None;
            self.set_online(false);
        }
        self.busy
    }

    /// Take a new status snapshot and return the recomputed `online`.
    ///
    /// A drive absent from the last drive list never counts as online.
    pub fn apply_status(&mut self, status: DriveStatus) -> bool {
        let online = self.device.is_some() && is_online(Some(&status));
        self.status = Some(status);
        self.set_online(online);
        self.online
    }

    fn set_online(&mut self, online: bool) {
        if self.online && !online {
            self.media.clear();
        }
        self.online = online;
    }

    /// Cache a media command result. Dropped unless the drive is online.
    pub fn store_media(&mut self, command: &str, value: Value) -> bool {
        if !self.online {
            return false;
        }
        self.media.insert(command, value);
        true
    }

    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    pub fn status(&self) -> Option<&DriveStatus> {
        self.status.as_ref()
    }

    pub fn media(&self) -> &MediaListing {
        &self.media
    }

    pub fn online(&self) -> bool {
        self.online
    }

    pub fn busy(&self) -> bool {
        self.busy
    }
}

/// Buttons of the drive status panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanelAction {
    Reload,
    LabelMedia,
    Eject,
    Catalog,
    ReadLabel,
    VolumeStatistics,
    CartridgeMemory,
}

impl PanelAction {
    pub const ALL: [PanelAction; 7] = [
        PanelAction::Reload,
        PanelAction::LabelMedia,
        PanelAction::Eject,
        PanelAction::Catalog,
        PanelAction::ReadLabel,
        PanelAction::VolumeStatistics,
        PanelAction::CartridgeMemory,
    ];

    /// Whether the button is enabled for the given flags.
    pub fn is_enabled(self, flags: DriveFlags) -> bool {
        match self {
            PanelAction::Reload => !flags.busy,
            _ => flags.online,
        }
    }

    /// Drive command behind the button; `None` for Reload.
    pub fn command(self) -> Option<&'static str> {
        match self {
            PanelAction::Reload => None,
            PanelAction::LabelMedia => Some("label-media"),
            PanelAction::Eject => Some("eject-media"),
            PanelAction::Catalog => Some("catalog"),
            PanelAction::ReadLabel => Some("read-label"),
            PanelAction::VolumeStatistics => Some("volume-statistics"),
            PanelAction::CartridgeMemory => Some("cartridge-memory"),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PanelAction::Reload => "Reload",
            PanelAction::LabelMedia => "Label Media",
            PanelAction::Eject => "Eject",
            PanelAction::Catalog => "Catalog",
            PanelAction::ReadLabel => "Read Label",
            PanelAction::VolumeStatistics => "Volume Statistics",
            PanelAction::CartridgeMemory => "Cartridge Memory",
        }
    }
}
