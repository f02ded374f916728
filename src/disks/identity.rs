//! Disk Identity Resolution
//!
//! Ties a physical disk to its inventory item through the serial number.
//! The outcome is an explicit [`Resolution`]; callers decide whether an
//! ambiguous or missing identity is logged or surfaced to a client.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::domain::ports::Inventory;
use crate::error::Result;

/// Inventory feature holding a disk's (normalized) serial number
pub const SERIAL_FEATURE: &str = "sn";

/// Inventory feature receiving the diagnostic status
pub const STATUS_FEATURE: &str = "smart-data";

/// Vendor prefixes that the inventory does not store.
/// Western Digital reports `WD-WCAYUJ123456`, the label says `WCAYUJ123456`.
const VENDOR_PREFIXES: &[&str] = &["WD-"];

/// Strip a known vendor prefix from a raw serial number.
pub fn normalize_serial(raw: &str) -> &str {
    let trimmed = raw.trim();
    VENDOR_PREFIXES
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .unwrap_or(trimmed)
}

// =============================================================================
// Resolution
// =============================================================================

/// Outcome of looking a serial number up in the inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Exactly one item matches
    Resolved(String),
    /// No item matches (yet); retried on next access
    Unresolved,
    /// More than one item matches; needs a human
    Ambiguous { serial: String, codes: Vec<String> },
    /// The disk does not report a serial number at all
    NoSerial,
}

/// A condition an operator has to fix by hand, sent to the client as
/// `error_that_can_be_manually_fixed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualFix {
    pub message: String,
    /// Device path
    pub disk: String,
}

impl ManualFix {
    /// Build the notice for a resolution that needs an operator, if any.
    pub fn from_resolution(path: &str, resolution: &Resolution) -> Option<Self> {
        let message = match resolution {
            Resolution::Ambiguous { serial, codes } => format!(
                "Duplicate codes for {}: {}, S/N is {}",
                path,
                codes.join(" "),
                serial
            ),
            Resolution::NoSerial => format!("Disk {} has no serial number", path),
            Resolution::Resolved(_) | Resolution::Unresolved => return None,
        };
        Some(Self {
            message,
            disk: path.to_string(),
        })
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Looks up disk identities in the inventory, when one is configured
#[derive(Clone, Default)]
pub struct IdentityResolver {
    inventory: Option<Arc<dyn Inventory>>,
}

impl IdentityResolver {
    pub fn new(inventory: Option<Arc<dyn Inventory>>) -> Self {
        Self { inventory }
    }

    /// A resolver with no inventory: nothing ever resolves.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.inventory.is_some()
    }

    /// Resolve a raw serial number to an inventory code.
    pub async fn resolve(&self, raw_serial: Option<&str>) -> Result<Resolution> {
        let Some(inventory) = &self.inventory else {
            return Ok(Resolution::Unresolved);
        };
        let Some(raw_serial) = raw_serial.filter(|s| !s.trim().is_empty()) else {
            return Ok(Resolution::NoSerial);
        };

        let serial = normalize_serial(raw_serial);
        let mut codes = inventory.codes_by_feature(SERIAL_FEATURE, serial).await?;

        Ok(match codes.len() {
            0 => {
                debug!(serial, "Disk not found in inventory");
                Resolution::Unresolved
            }
            1 => {
                let code = codes.remove(0);
                debug!(serial, code = %code, "Disk found in inventory");
                Resolution::Resolved(code)
            }
            _ => Resolution::Ambiguous {
                serial: serial.to_string(),
                codes,
            },
        })
    }

    /// Fetch item detail for a resolved code.
    pub async fn fetch_item(&self, code: &str) -> Result<Option<serde_json::Value>> {
        match &self.inventory {
            Some(inventory) => inventory.get_item(code).await.map(Some),
            None => Ok(None),
        }
    }

    /// Push a diagnostic status to the item. Returns whether anything was sent.
    pub async fn push_status(&self, code: &str, status: &str) -> Result<bool> {
        let Some(inventory) = &self.inventory else {
            return Ok(false);
        };
        let features = BTreeMap::from([(STATUS_FEATURE.to_string(), status.to_string())]);
        inventory.update_features(code, &features).await?;
        Ok(true)
    }
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeInventory;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_strips_wd_prefix() {
        assert_eq!(normalize_serial("WD-WCAYUJ123456"), "WCAYUJ123456");
        assert_eq!(normalize_serial("  WD-ABC123 "), "ABC123");
        assert_eq!(normalize_serial("S2RBNX0H123456"), "S2RBNX0H123456");
        // Only a leading prefix counts
        assert_eq!(normalize_serial("XWD-123"), "XWD-123");
    }

    proptest! {
        #[test]
        fn prop_prefixed_and_bare_serial_normalize_equal(serial in "[A-Z0-9]{1,20}") {
            let prefixed = format!("WD-{}", serial);
            prop_assert_eq!(normalize_serial(&prefixed), normalize_serial(&serial));
        }
    }

    #[tokio::test]
    async fn test_resolve_single_match() {
        let inventory = Arc::new(FakeInventory::new());
        inventory.add_item("AB12", "ABC123");
        let resolver = IdentityResolver::new(Some(inventory));

        let resolution = resolver.resolve(Some("WD-ABC123")).await.unwrap();
        assert_eq!(resolution, Resolution::Resolved("AB12".to_string()));
    }

    #[tokio::test]
    async fn test_resolve_no_match_is_unresolved() {
        let resolver = IdentityResolver::new(Some(Arc::new(FakeInventory::new())));
        assert_eq!(resolver.resolve(Some("ABC123")).await.unwrap(), Resolution::Unresolved);
    }

    #[tokio::test]
    async fn test_resolve_duplicate_is_ambiguous() {
        let inventory = Arc::new(FakeInventory::new());
        inventory.add_item("AB12", "ABC123");
        inventory.add_item("CD34", "ABC123");
        let resolver = IdentityResolver::new(Some(inventory));

        let resolution = resolver.resolve(Some("ABC123")).await.unwrap();
        assert_matches!(resolution, Resolution::Ambiguous { ref serial, ref codes } => {
            assert_eq!(serial, "ABC123");
            assert_eq!(codes.len(), 2);
        });
    }

    #[tokio::test]
    async fn test_resolve_missing_serial() {
        let resolver = IdentityResolver::new(Some(Arc::new(FakeInventory::new())));
        assert_eq!(resolver.resolve(None).await.unwrap(), Resolution::NoSerial);
        assert_eq!(resolver.resolve(Some("  ")).await.unwrap(), Resolution::NoSerial);
    }

    #[tokio::test]
    async fn test_disabled_resolver_never_resolves() {
        let resolver = IdentityResolver::disabled();

        assert!(!resolver.is_enabled());
        assert_eq!(resolver.resolve(None).await.unwrap(), Resolution::Unresolved);
        assert!(!resolver.push_status("AB12", "old").await.unwrap());
    }

    #[tokio::test]
    async fn test_push_status_sets_feature() {
        let inventory = Arc::new(FakeInventory::new());
        inventory.add_item("AB12", "ABC123");
        let resolver = IdentityResolver::new(Some(inventory.clone()));

        assert!(resolver.push_status("AB12", "old").await.unwrap());
        assert_eq!(inventory.feature("AB12", STATUS_FEATURE).as_deref(), Some("old"));
    }

    #[test]
    fn test_manual_fix_messages() {
        let ambiguous = Resolution::Ambiguous {
            serial: "ABC123".to_string(),
            codes: vec!["AB12".to_string(), "CD34".to_string()],
        };
        let fix = ManualFix::from_resolution("/dev/sda", &ambiguous).unwrap();
        assert_eq!(fix.message, "Duplicate codes for /dev/sda: AB12 CD34, S/N is ABC123");
        assert_eq!(fix.disk, "/dev/sda");

        let fix = ManualFix::from_resolution("/dev/sdb", &Resolution::NoSerial).unwrap();
        assert_eq!(fix.message, "Disk /dev/sdb has no serial number");

        assert!(ManualFix::from_resolution("/dev/sda", &Resolution::Unresolved).is_none());
    }
}
