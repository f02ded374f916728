//! lsblk Adapter
//!
//! Implements the `DeviceEnumerator` port on Linux hosts by parsing
//! `lsblk -J` output.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use tracing::warn;

use super::process::run_captured;
use crate::domain::ports::{DeviceEnumerator, DeviceInfo};
use crate::error::{Error, Result};

/// Columns requested from lsblk. NAME is required, otherwise the device
/// tree is flattened and partitions show up as top-level devices.
const LSBLK_COLUMNS: &str = "NAME,PATH,VENDOR,MODEL,SERIAL,HOTPLUG,ROTA,MOUNTPOINT";

const LSBLK_TIMEOUT: Duration = Duration::from_secs(30);

/// Block device enumerator backed by `lsblk`.
#[derive(Debug, Clone)]
pub struct Lsblk {
    program: String,
}

impl Default for Lsblk {
    fn default() -> Self {
        Self {
            program: "lsblk".to_string(),
        }
    }
}

impl Lsblk {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceEnumerator for Lsblk {
    async fn list(&self, path: Option<&str>) -> Result<Vec<DeviceInfo>> {
        let mut args = vec!["-o", LSBLK_COLUMNS, "-J"];
        if let Some(path) = path {
            args.push(path);
        }

        let output = run_captured(&self.program, &args, LSBLK_TIMEOUT).await?;
        if !output.success() {
            return Err(Error::Enumeration(format!(
                "lsblk exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        parse_lsblk(&output.stdout)
    }
}

// =============================================================================
// lsblk JSON
// =============================================================================

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    path: Option<String>,
    vendor: Option<String>,
    model: Option<String>,
    serial: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    hotplug: bool,
    #[serde(default, deserialize_with = "flag")]
    rota: bool,
    mountpoint: Option<String>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

impl LsblkDevice {
    fn collect_mounts(&self, mounts: &mut Vec<String>) {
        if let Some(mountpoint) = &self.mountpoint {
            mounts.push(mountpoint.clone());
        }
        for child in &self.children {
            child.collect_mounts(mounts);
        }
    }
}

/// Older lsblk releases print flags as `"0"`/`"1"` strings, newer ones as
/// JSON booleans.
fn flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(u64),
        Text(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(value)) => value,
        Some(Flag::Number(value)) => value != 0,
        Some(Flag::Text(value)) => {
            let value = value.trim();
            value == "1" || value.eq_ignore_ascii_case("true")
        }
        None => false,
    })
}

/// Parse `lsblk -J` output into one `DeviceInfo` per top-level device.
///
/// Devices without a path are skipped with a warning.
pub fn parse_lsblk(json: &str) -> Result<Vec<DeviceInfo>> {
    let parsed: LsblkOutput = serde_json::from_str(json)?;

    let mut devices = Vec::with_capacity(parsed.blockdevices.len());
    for device in parsed.blockdevices {
        let Some(path) = device.path.clone() else {
            warn!(?device, "Disk has no path, ignoring");
            continue;
        };

        let mut mountpoint = Vec::new();
        device.collect_mounts(&mut mountpoint);

        devices.push(DeviceInfo {
            path,
            vendor: device.vendor,
            model: device.model,
            serial: device.serial,
            hotplug: device.hotplug,
            rotational: device.rota,
            mountpoint,
        });
    }

    Ok(devices)
}
