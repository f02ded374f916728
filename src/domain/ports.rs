//! Domain Ports (Port/Adapter Pattern)
//!
//! The server never talks to `lsblk`, `smartctl`, `wmic` or the inventory
//! directly. It goes through these traits, and the adapters in
//! [`crate::adapters`] provide the real implementations.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Domain Layer                           │
//! │  DeviceEnumerator │ DiagnosticTool │ LogicalDiskLister │     │
//! │  Inventory                                                   │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Infrastructure Layer                      │
//! │  Lsblk │ Smartctl │ Wmic │ TaralloClient                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// Raw attributes of one block device, as reported by the enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device path, e.g. `/dev/sda`
    pub path: String,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    /// Removable / hot-pluggable device
    pub hotplug: bool,
    /// Spinning disk
    pub rotational: bool,
    /// Mountpoints of the device and all of its partitions
    pub mountpoint: Vec<String>,
}

impl DeviceInfo {
    /// Create a device with no attributes other than its path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            vendor: None,
            model: None,
            serial: None,
            hotplug: false,
            rotational: false,
            mountpoint: Vec::new(),
        }
    }

    /// Builder-style serial setter.
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }
}

/// Captured result of an external tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Column of the logical disk listing used on Windows hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalDiskField {
    Caption,
    Size,
}

impl LogicalDiskField {
    /// Column name, which is also the header line of the listing.
    pub fn column(&self) -> &'static str {
        match self {
            LogicalDiskField::Caption => "Caption",
            LogicalDiskField::Size => "Size",
        }
    }
}

impl std::fmt::Display for LogicalDiskField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

// =============================================================================
// Host Ports
// =============================================================================

/// Port for enumerating block devices on the local host.
#[async_trait]
pub trait DeviceEnumerator: Send + Sync {
    /// List devices. With `Some(path)` the listing is scoped to that device.
    async fn list(&self, path: Option<&str>) -> Result<Vec<DeviceInfo>>;
}

/// Port for running the disk diagnostic tool against one device.
#[async_trait]
pub trait DiagnosticTool: Send + Sync {
    /// Run a full diagnostic report. A non-zero exit code is not an error.
    async fn run(&self, device: &str) -> Result<ToolOutput>;
}

/// Port for the alternate-OS logical disk listing.
#[async_trait]
pub trait LogicalDiskLister: Send + Sync {
    /// One value per logical disk, header and blank lines removed.
    async fn list(&self, field: LogicalDiskField) -> Result<Vec<String>>;
}

// =============================================================================
// Inventory Port
// =============================================================================

/// Port for the external asset-tracking inventory.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Codes of every item whose `feature` equals `value`.
    async fn codes_by_feature(&self, feature: &str, value: &str) -> Result<Vec<String>>;

    /// Full item detail.
    async fn get_item(&self, code: &str) -> Result<serde_json::Value>;

    /// Set (or overwrite) features on an item.
    async fn update_features(&self, code: &str, features: &BTreeMap<String, String>) -> Result<()>;
}
