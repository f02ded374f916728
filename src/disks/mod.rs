//! Disk Registry
//!
//! Process-lifetime cache mapping a device path to an enriched disk record:
//! the raw enumeration attributes plus the inventory code and item detail,
//! once the disk's identity has been resolved.
//!
//! # Components
//!
//! - [`identity`] - serial normalization and inventory lookups
//! - [`registry`] - the shared path → record map
//! - [`scanner`] - eager population at startup

pub mod identity;
pub mod registry;
pub mod scanner;

use serde::Serialize;

use crate::domain::ports::DeviceInfo;

pub use identity::{normalize_serial, IdentityResolver, ManualFix, Resolution};
pub use registry::{DiskOutcome, DiskRegistry, DiskReport};
pub use scanner::scan_for_disks;

/// Cached state of one physical disk.
///
/// Serialized on the wire as the device attributes plus `code`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskRecord {
    #[serde(flatten)]
    pub info: DeviceInfo,

    /// Inventory code, set only after exactly one inventory match
    pub code: Option<String>,

    /// Cached inventory item detail
    #[serde(skip)]
    pub item: Option<serde_json::Value>,
}

impl DiskRecord {
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            code: None,
            item: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.info.path
    }

    /// Serial with any vendor prefix removed
    pub fn normalized_serial(&self) -> Option<&str> {
        self.info
            .serial
            .as_deref()
            .map(normalize_serial)
            .filter(|serial| !serial.is_empty())
    }

    /// Take fresh enumeration attributes, keeping the identity when the
    /// same physical disk is still behind this path.
    pub fn update_info(&mut self, info: DeviceInfo) {
        let same_disk = self.normalized_serial().is_some()
            && self.normalized_serial() == info.serial.as_deref().map(normalize_serial);
        if !same_disk {
            self.code = None;
            self.item = None;
        }
        self.info = info;
    }
}
