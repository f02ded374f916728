//! Shared disk registry.
//!
//! # Locking
//!
//! The path map is guarded by a `parking_lot::RwLock` that is only ever held
//! for map lookups and inserts, never across an `.await`. Each disk entry
//! has its own `tokio::sync::Mutex`, held for the whole refresh of that disk,
//! inventory round trips included. An entry lock may briefly take the map
//! lock (to update the serial index); the map lock never waits on an entry
//! lock. The client registry is never touched from here.
//!
//! # Manually-fixable conditions
//!
//! Notices found by the startup scan are only logged. Every command-driven
//! refresh of a disk that is still ambiguous returns its notice again, until
//! the inventory is fixed. A missing serial is returned once per disk.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::identity::{IdentityResolver, ManualFix, Resolution};
use super::DiskRecord;
use crate::domain::ports::{DeviceEnumerator, DeviceInfo};

/// One registry slot. `record` stays `None` until the device has been
/// successfully enumerated.
#[derive(Debug)]
struct DiskEntry {
    path: String,
    record: Option<DiskRecord>,
    /// A missing serial was already reported to a client
    no_serial_reported: bool,
}

type Slot = Arc<Mutex<DiskEntry>>;

#[derive(Default)]
struct Index {
    entries: BTreeMap<String, Slot>,
    /// Normalized serial → paths currently reporting that serial
    by_serial: HashMap<String, BTreeSet<String>>,
}

/// Result of refreshing one disk
#[derive(Debug, Clone, Default)]
pub struct DiskOutcome {
    /// Current record, `None` if the device is still incomplete
    pub record: Option<DiskRecord>,

    /// Identity problem an operator should fix
    pub notice: Option<ManualFix>,
}

/// Result of refreshing every tracked disk
#[derive(Debug, Clone, Default)]
pub struct DiskReport {
    pub disks: Vec<DiskRecord>,
    pub notices: Vec<ManualFix>,
}

/// Path → disk record cache shared by every command
pub struct DiskRegistry {
    index: RwLock<Index>,
    enumerator: Arc<dyn DeviceEnumerator>,
    resolver: IdentityResolver,
}

impl DiskRegistry {
    pub fn new(enumerator: Arc<dyn DeviceEnumerator>, resolver: IdentityResolver) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            enumerator,
            resolver,
        }
    }

    pub fn enumerator(&self) -> &Arc<dyn DeviceEnumerator> {
        &self.enumerator
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    pub fn len(&self) -> usize {
        self.index.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.read().entries.contains_key(path)
    }

    /// Tracked device paths, sorted
    pub fn paths(&self) -> Vec<String> {
        self.index.read().entries.keys().cloned().collect()
    }

    /// Start tracking a path without any record; it is enumerated lazily on
    /// the next refresh. Returns false if the path was already tracked.
    ///
    /// Used when a command references a device the startup scan missed.
    pub fn track(&self, path: &str) -> bool {
        let mut index = self.index.write();
        if index.entries.contains_key(path) {
            return false;
        }
        index.entries.insert(path.to_string(), new_slot(path));
        true
    }

    fn slot(&self, path: &str) -> Option<Slot> {
        self.index.read().entries.get(path).cloned()
    }

    fn slot_or_insert(&self, path: &str) -> Slot {
        self.index
            .write()
            .entries
            .entry(path.to_string())
            .or_insert_with(|| new_slot(path))
            .clone()
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Insert or update a disk from fresh enumeration data, then try to
    /// resolve its identity.
    pub async fn install(&self, info: DeviceInfo) -> DiskOutcome {
        let slot = self.slot_or_insert(&info.path);
        let mut entry = slot.lock().await;
        self.apply_info(&mut entry, info);
        let notice = self.ensure_identity(&mut entry).await;
        DiskOutcome {
            record: entry.record.clone(),
            notice,
        }
    }

    /// Complete (if needed) and resolve a tracked disk.
    /// Returns `None` when the path is not tracked.
    pub async fn refresh(&self, path: &str) -> Option<DiskOutcome> {
        let slot = self.slot(path)?;
        let mut entry = slot.lock().await;
        Some(self.refresh_entry(&mut entry).await)
    }

    /// Complete and resolve every tracked disk, in path order.
    pub async fn refresh_all(&self) -> DiskReport {
        let slots: Vec<Slot> = self.index.read().entries.values().cloned().collect();

        let mut report = DiskReport::default();
        for slot in slots {
            let mut entry = slot.lock().await;
            let outcome = self.refresh_entry(&mut entry).await;
            report.notices.extend(outcome.notice);
            report.disks.extend(outcome.record);
        }
        report
    }

    async fn refresh_entry(&self, entry: &mut DiskEntry) -> DiskOutcome {
        if entry.record.is_none() {
            match self.enumerator.list(Some(entry.path.as_str())).await {
                Ok(devices) => match devices.into_iter().next() {
                    Some(info) => self.apply_info(entry, info),
                    None => warn!(path = %entry.path, "Enumerator knows nothing about disk, still incomplete"),
                },
                Err(e) => warn!(path = %entry.path, error = %e, "Error with disk still remains"),
            }
        }

        let notice = match self.ensure_identity(entry).await {
            Some(notice) if lacks_serial(entry) => {
                if entry.no_serial_reported {
                    debug!(path = %entry.path, "{}", notice.message);
                    None
                } else {
                    entry.no_serial_reported = true;
                    Some(notice)
                }
            }
            notice => notice,
        };
        DiskOutcome {
            record: entry.record.clone(),
            notice,
        }
    }

    fn apply_info(&self, entry: &mut DiskEntry, info: DeviceInfo) {
        match entry.record.as_mut() {
            Some(record) => record.update_info(info),
            None => entry.record = Some(DiskRecord::new(info)),
        }

        let serial = entry
            .record
            .as_ref()
            .and_then(DiskRecord::normalized_serial)
            .map(str::to_string);
        self.claim_serial(&entry.path, serial);
    }

    /// Index `path` under its serial. Entries are never dropped: two paths
    /// reporting the same serial (a disk that moved, or bridges sharing a
    /// serial) stay two entries and the collision is logged.
    fn claim_serial(&self, path: &str, serial: Option<String>) {
        let mut index = self.index.write();
        for paths in index.by_serial.values_mut() {
            paths.remove(path);
        }
        index.by_serial.retain(|_, paths| !paths.is_empty());

        let Some(serial) = serial else {
            return;
        };
        let paths = index.by_serial.entry(serial).or_default();
        for other in paths.iter() {
            warn!(path = %path, other = %other, "Same serial reported at two paths, keeping both");
        }
        paths.insert(path.to_string());
    }

    /// Resolve the disk's inventory code if it has none yet. A code that is
    /// already set is trusted and never looked up again.
    async fn ensure_identity(&self, entry: &mut DiskEntry) -> Option<ManualFix> {
        let DiskEntry { path, record, .. } = entry;
        let record = record.as_mut()?;

        if record.code.is_none() {
            match self.resolver.resolve(record.info.serial.as_deref()).await {
                Ok(Resolution::Resolved(code)) => {
                    debug!(path = %path, code = %code, "Disk identity resolved");
                    record.code = Some(code);
                }
                Ok(resolution) => return ManualFix::from_resolution(path, &resolution),
                Err(e) => {
                    warn!(path = %path, error = %e, "Inventory lookup failed, will retry");
                    return None;
                }
            }
        }

        if record.item.is_none() {
            if let Some(code) = record.code.clone() {
                match self.resolver.fetch_item(&code).await {
                    Ok(item) => record.item = item,
                    Err(e) => warn!(path = %path, code = %code, error = %e, "Cannot fetch inventory item"),
                }
            }
        }
        None
    }
}

fn new_slot(path: &str) -> Slot {
    Arc::new(Mutex::new(DiskEntry {
        path: path.to_string(),
        record: None,
        no_serial_reported: false,
    }))
}

fn lacks_serial(entry: &DiskEntry) -> bool {
    entry
        .record
        .as_ref()
        .is_some_and(|record| record.normalized_serial().is_none())
}

impl std::fmt::Debug for DiskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskRegistry")
            .field("disks", &self.len())
            .field("resolver", &self.resolver)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEnumerator, FakeInventory};

    fn registry_with(
        devices: Vec<DeviceInfo>,
        inventory: Option<Arc<FakeInventory>>,
    ) -> (DiskRegistry, Arc<FakeEnumerator>) {
        let enumerator = Arc::new(FakeEnumerator::new(devices));
        let resolver = match inventory {
            Some(inventory) => IdentityResolver::new(Some(inventory)),
            None => IdentityResolver::disabled(),
        };
        (DiskRegistry::new(enumerator.clone(), resolver), enumerator)
    }

    #[tokio::test]
    async fn test_install_resolves_single_match() {
        let inventory = Arc::new(FakeInventory::new());
        inventory.add_item("AB12", "ABC123");
        let (registry, _) = registry_with(vec![], Some(inventory));

        let outcome = registry
            .install(DeviceInfo::new("/dev/sda").with_serial("WD-ABC123"))
            .await;

        let record = outcome.record.unwrap();
        assert_eq!(record.code.as_deref(), Some("AB12"));
        assert!(record.item.is_some());
        assert!(outcome.notice.is_none());
        assert!(registry.contains("/dev/sda"));
    }

    #[tokio::test]
    async fn test_resolution_is_not_repeated_once_set() {
        let inventory = Arc::new(FakeInventory::new());
        inventory.add_item("AB12", "ABC123");
        let (registry, _) = registry_with(vec![], Some(inventory.clone()));

        registry
            .install(DeviceInfo::new("/dev/sda").with_serial("ABC123"))
            .await;
        let lookups = inventory.lookups();

        for _ in 0..3 {
            let outcome = registry.refresh("/dev/sda").await.unwrap();
            assert_eq!(outcome.record.unwrap().code.as_deref(), Some("AB12"));
        }
        assert_eq!(inventory.lookups(), lookups);
    }

    #[tokio::test]
    async fn test_ambiguous_serial_never_picks_a_code() {
        let inventory = Arc::new(FakeInventory::new());
        inventory.add_item("AB12", "ABC123");
        inventory.add_item("CD34", "ABC123");
        let (registry, _) = registry_with(vec![], Some(inventory));

        let outcome = registry
            .install(DeviceInfo::new("/dev/sda").with_serial("ABC123"))
            .await;

        assert_eq!(outcome.record.unwrap().code, None);
        let notice = outcome.notice.unwrap();
        assert_eq!(notice.disk, "/dev/sda");
        assert!(notice.message.starts_with("Duplicate codes for /dev/sda"));
    }

    #[tokio::test]
    async fn test_ambiguity_is_reported_on_every_refresh() {
        let inventory = Arc::new(FakeInventory::new());
        inventory.add_item("AB12", "ABC123");
        inventory.add_item("CD34", "ABC123");
        let (registry, _) = registry_with(vec![], Some(inventory.clone()));

        // Built by the startup scan: the notice only goes to the log
        registry
            .install(DeviceInfo::new("/dev/sdb").with_serial("ABC123"))
            .await;

        for _ in 0..2 {
            let outcome = registry.refresh("/dev/sdb").await.unwrap();
            let notice = outcome.notice.unwrap();
            assert_eq!(notice.message, "Duplicate codes for /dev/sdb: AB12 CD34, S/N is ABC123");
            assert_eq!(outcome.record.unwrap().code, None);
        }

        inventory.add_item("CD34", "SOMETHING-ELSE");
        let outcome = registry.refresh("/dev/sdb").await.unwrap();
        assert!(outcome.notice.is_none());
        assert_eq!(outcome.record.unwrap().code.as_deref(), Some("AB12"));
    }

    #[tokio::test]
    async fn test_missing_serial_is_reported_once() {
        let (registry, _) = registry_with(vec![], Some(Arc::new(FakeInventory::new())));
        registry.install(DeviceInfo::new("/dev/loop0")).await;

        let first = registry.refresh_all().await;
        assert_eq!(first.notices.len(), 1);
        assert_eq!(first.notices[0].message, "Disk /dev/loop0 has no serial number");

        let second = registry.refresh_all().await;
        assert!(second.notices.is_empty());
        assert_eq!(second.disks.len(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_is_retried_on_next_refresh() {
        let inventory = Arc::new(FakeInventory::new());
        let (registry, _) = registry_with(vec![], Some(inventory.clone()));

        let outcome = registry
            .install(DeviceInfo::new("/dev/sda").with_serial("ABC123"))
            .await;
        assert_eq!(outcome.record.unwrap().code, None);
        assert!(outcome.notice.is_none());

        inventory.add_item("AB12", "ABC123");
        let outcome = registry.refresh("/dev/sda").await.unwrap();
        assert_eq!(outcome.record.unwrap().code.as_deref(), Some("AB12"));
    }

    #[tokio::test]
    async fn test_inventory_failure_leaves_disk_unresolved() {
        let inventory = Arc::new(FakeInventory::new());
        inventory.add_item("AB12", "ABC123");
        inventory.set_failing(true);
        let (registry, _) = registry_with(vec![], Some(inventory));

        let outcome = registry
            .install(DeviceInfo::new("/dev/sda").with_serial("ABC123"))
            .await;
        assert_eq!(outcome.record.unwrap().code, None);
        assert!(outcome.notice.is_none());
    }

    #[tokio::test]
    async fn test_tracked_path_is_completed_lazily() {
        let (registry, enumerator) = registry_with(
            vec![DeviceInfo::new("/dev/sdb").with_serial("XYZ789")],
            None,
        );

        assert!(registry.track("/dev/sdb"));
        assert!(!registry.track("/dev/sdb"));

        let report = registry.refresh_all().await;
        assert_eq!(report.disks.len(), 1);
        assert_eq!(report.disks[0].info.serial.as_deref(), Some("XYZ789"));
        assert_eq!(enumerator.scoped_calls(), vec!["/dev/sdb".to_string()]);
    }

    #[tokio::test]
    async fn test_incomplete_disk_is_left_out_of_report() {
        let (registry, _) = registry_with(vec![], None);
        registry.track("/dev/sdz");

        let report = registry.refresh_all().await;
        assert!(report.disks.is_empty());
        assert!(registry.contains("/dev/sdz"));
    }

    #[tokio::test]
    async fn test_same_serial_under_new_path_keeps_old_entry() {
        let inventory = Arc::new(FakeInventory::new());
        inventory.add_item("AB12", "ABC123");
        let (registry, _) = registry_with(vec![], Some(inventory));

        registry
            .install(DeviceInfo::new("/dev/sda").with_serial("WD-ABC123"))
            .await;
        registry
            .install(DeviceInfo::new("/dev/sdc").with_serial("ABC123"))
            .await;

        assert_eq!(
            registry.paths(),
            vec!["/dev/sda".to_string(), "/dev/sdc".to_string()]
        );
        let report = registry.refresh_all().await;
        assert_eq!(report.disks.len(), 2);
        assert!(report
            .disks
            .iter()
            .all(|disk| disk.code.as_deref() == Some("AB12")));
    }

    #[tokio::test]
    async fn test_identical_serial_at_two_paths_keeps_both() {
        let (registry, _) = registry_with(vec![], None);

        registry
            .install(DeviceInfo::new("/dev/sda").with_serial("0123456789ABCDEF"))
            .await;
        registry
            .install(DeviceInfo::new("/dev/sdb").with_serial("0123456789ABCDEF"))
            .await;

        assert_eq!(
            registry.paths(),
            vec!["/dev/sda".to_string(), "/dev/sdb".to_string()]
        );

        // Re-enumerating one of them must not drop the other
        registry
            .install(DeviceInfo::new("/dev/sda").with_serial("0123456789ABCDEF"))
            .await;
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_serial_is_manual_fix() {
        let (registry, _) = registry_with(vec![], Some(Arc::new(FakeInventory::new())));

        let outcome = registry.install(DeviceInfo::new("/dev/sda")).await;
        let notice = outcome.notice.unwrap();
        assert_eq!(notice.message, "Disk /dev/sda has no serial number");
    }
}
