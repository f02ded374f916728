//! In-memory collaborators for tests.
//!
//! Fake implementations of every domain port, so the server can be driven
//! end to end without lsblk, smartctl or a live inventory.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::disks::identity::SERIAL_FEATURE;
use crate::domain::ports::{
    DeviceEnumerator, DeviceInfo, DiagnosticTool, Inventory, LogicalDiskField, LogicalDiskLister,
    ToolOutput,
};
use crate::error::{Error, Result};

// =============================================================================
// Inventory
// =============================================================================

/// Inventory keeping items as code → feature map.
#[derive(Debug, Default)]
pub struct FakeInventory {
    items: RwLock<BTreeMap<String, BTreeMap<String, String>>>,
    failing: AtomicBool,
    lookups: AtomicUsize,
}

impl FakeInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item whose serial feature is `serial`.
    pub fn add_item(&self, code: &str, serial: &str) {
        let features = BTreeMap::from([(SERIAL_FEATURE.to_string(), serial.to_string())]);
        self.items.write().insert(code.to_string(), features);
    }

    pub fn feature(&self, code: &str, feature: &str) -> Option<String> {
        self.items.read().get(code)?.get(feature).cloned()
    }

    /// Make every call fail as if the inventory were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of lookups by feature so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn check(&self, path: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::InventoryStatus {
                path: path.to_string(),
                status: 503,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Inventory for FakeInventory {
    async fn codes_by_feature(&self, feature: &str, value: &str) -> Result<Vec<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check("/v2/features")?;
        Ok(self
            .items
            .read()
            .iter()
            .filter(|(_, features)| features.get(feature).map(String::as_str) == Some(value))
            .map(|(code, _)| code.clone())
            .collect())
    }

    async fn get_item(&self, code: &str) -> Result<serde_json::Value> {
        self.check("/v2/items")?;
        let items = self.items.read();
        let features = items.get(code).ok_or_else(|| Error::InventoryStatus {
            path: format!("/v2/items/{}", code),
            status: 404,
        })?;
        Ok(serde_json::json!({ "code": code, "features": features }))
    }

    async fn update_features(&self, code: &str, features: &BTreeMap<String, String>) -> Result<()> {
        self.check("/v2/items/features")?;
        let mut items = self.items.write();
        let item = items.get_mut(code).ok_or_else(|| Error::InventoryStatus {
            path: format!("/v2/items/{}/features", code),
            status: 404,
        })?;
        item.extend(features.clone());
        Ok(())
    }
}

// =============================================================================
// Host tools
// =============================================================================

/// Enumerator returning a fixed device list.
#[derive(Debug, Default)]
pub struct FakeEnumerator {
    devices: RwLock<Vec<DeviceInfo>>,
    scoped_calls: RwLock<Vec<String>>,
    failing: AtomicBool,
}

impl FakeEnumerator {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices: RwLock::new(devices),
            ..Default::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Paths of every scoped listing requested so far
    pub fn scoped_calls(&self) -> Vec<String> {
        self.scoped_calls.read().clone()
    }
}

#[async_trait]
impl DeviceEnumerator for FakeEnumerator {
    async fn list(&self, path: Option<&str>) -> Result<Vec<DeviceInfo>> {
        if let Some(path) = path {
            self.scoped_calls.write().push(path.to_string());
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Enumeration("lsblk is broken".to_string()));
        }
        let devices = self.devices.read();
        Ok(devices
            .iter()
            .filter(|device| path.map_or(true, |path| device.path == path))
            .cloned()
            .collect())
    }
}

/// How a fake diagnostic run fails instead of producing output
#[derive(Debug, Clone)]
enum FakeFailure {
    Timeout(u64),
    Failed(String),
}

/// Diagnostic tool with canned per-device results.
#[derive(Debug, Default)]
pub struct FakeDiagnostics {
    outputs: RwLock<HashMap<String, ToolOutput>>,
    delays: RwLock<HashMap<String, Duration>>,
    failures: RwLock<HashMap<String, FakeFailure>>,
}

impl FakeDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_output(&self, device: &str, exit_code: i32, stdout: &str, stderr: &str) {
        self.outputs.write().insert(
            device.to_string(),
            ToolOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        );
    }

    /// Make runs against `device` take `delay` before answering.
    pub fn set_delay(&self, device: &str, delay: Duration) {
        self.delays.write().insert(device.to_string(), delay);
    }

    /// Make runs against `device` end as if killed after `seconds`.
    pub fn set_timeout(&self, device: &str, seconds: u64) {
        self.failures
            .write()
            .insert(device.to_string(), FakeFailure::Timeout(seconds));
    }

    /// Make runs against `device` fail to launch with `reason`.
    pub fn set_failure(&self, device: &str, reason: &str) {
        self.failures
            .write()
            .insert(device.to_string(), FakeFailure::Failed(reason.to_string()));
    }
}

#[async_trait]
impl DiagnosticTool for FakeDiagnostics {
    async fn run(&self, device: &str) -> Result<ToolOutput> {
        let delay = self.delays.read().get(device).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failures.read().get(device).cloned();
        match failure {
            Some(FakeFailure::Timeout(seconds)) => {
                return Err(Error::ToolTimeout {
                    command: format!("sudo smartctl -a {}", device),
                    seconds,
                })
            }
            Some(FakeFailure::Failed(reason)) => {
                return Err(Error::ToolFailed {
                    command: format!("sudo smartctl -a {}", device),
                    reason,
                })
            }
            None => {}
        }

        let output = self.outputs.read().get(device).cloned();
        Ok(output.unwrap_or_else(|| ToolOutput {
            exit_code: 2,
            stdout: String::new(),
            stderr: format!("Smartctl open device: {} failed: No such device", device),
        }))
    }
}

/// Logical disk lister with fixed columns.
#[derive(Debug, Default)]
pub struct FakeLogicalDisks {
    captions: Vec<String>,
    sizes: Vec<String>,
}

impl FakeLogicalDisks {
    pub fn new(captions: &[&str], sizes: &[&str]) -> Self {
        Self {
            captions: captions.iter().map(|s| s.to_string()).collect(),
            sizes: sizes.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl LogicalDiskLister for FakeLogicalDisks {
    async fn list(&self, field: LogicalDiskField) -> Result<Vec<String>> {
        Ok(match field {
            LogicalDiskField::Caption => self.captions.clone(),
            LogicalDiskField::Size => self.sizes.clone(),
        })
    }
}
