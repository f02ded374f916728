//! Startup scanner: one-shot eager population of the disk registry.

use tracing::{debug, info, warn};

use super::DiskRegistry;

/// Enumerate every visible device and register it.
///
/// Best effort: enumeration failures and identity problems are logged and
/// never abort startup. Returns the number of disks registered.
pub async fn scan_for_disks(registry: &DiskRegistry) -> usize {
    debug!("Scanning for disks");

    let devices = match registry.enumerator().list(None).await {
        Ok(devices) => devices,
        Err(e) => {
            warn!(error = %e, "Disk scan failed, starting with an empty registry");
            return 0;
        }
    };

    let mut registered = 0;
    for device in devices {
        let path = device.path.clone();
        let outcome = registry.install(device).await;
        if let Some(notice) = outcome.notice {
            warn!(path = %path, "{}", notice.message);
        }
        if outcome.record.is_some() {
            registered += 1;
        }
    }

    info!(disks = registered, "Disk scan complete");
    registered
}
