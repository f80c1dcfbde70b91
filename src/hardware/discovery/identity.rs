//! Device Identity Resolver
//!
//! Maps symbolic device references (kernel name, by-path link or SCSI
//! address) to concrete device nodes using the hardware inventory. The
//! inventory is fetched once per resolver and every resolution is cached.

use crate::domain::ports::{HardwareInventoryRef, InventoryRecord};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::OnceCell;
use tracing::debug;

const BY_PATH_PREFIX: &str = "/dev/disk/by-path/";

// =============================================================================
// Device Identifier
// =============================================================================

/// How a device is referenced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevIdnrKind {
    /// Kernel name (`sda`) or device node (`/dev/sda`)
    Name,
    /// by-path identifier, with or without the /dev/disk/by-path/ prefix
    Path,
    /// SCSI address `H:C:T:L`
    Scsi,
}

impl fmt::Display for DevIdnrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevIdnrKind::Name => write!(f, "name"),
            DevIdnrKind::Path => write!(f, "path"),
            DevIdnrKind::Scsi => write!(f, "scsi"),
        }
    }
}

/// Symbolic device reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DevIdnr {
    #[serde(rename = "type")]
    pub kind: DevIdnrKind,
    pub value: String,
}

impl DevIdnr {
    pub fn new(kind: DevIdnrKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn name(value: impl Into<String>) -> Self {
        Self::new(DevIdnrKind::Name, value)
    }

    /// Whether an inventory record is the referenced device
    pub fn matches(&self, record: &InventoryRecord) -> bool {
        match self.kind {
            DevIdnrKind::Name => {
                let name = self.value.strip_prefix("/dev/").unwrap_or(&self.value);
                record.name == name || record.dev_path == self.value
            }
            DevIdnrKind::Path => {
                let id = self.value.strip_prefix(BY_PATH_PREFIX).unwrap_or(&self.value);
                record.by_path.iter().any(|candidate| candidate == id)
            }
            DevIdnrKind::Scsi => record.scsi_address.as_deref() == Some(self.value.as_str()),
        }
    }
}

impl fmt::Display for DevIdnr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind, self.value)
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// A reference resolved against the inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDevice {
    /// Device node
    pub dev_path: String,
    /// Inventory record of the device
    pub record: InventoryRecord,
}

/// Resolves and caches symbolic device references
pub struct DeviceResolver {
    inventory: HardwareInventoryRef,
    records: OnceCell<Vec<InventoryRecord>>,
    cache: RwLock<HashMap<DevIdnr, ResolvedDevice>>,
}

impl DeviceResolver {
    pub fn new(inventory: HardwareInventoryRef) -> Self {
        Self {
            inventory,
            records: OnceCell::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a reference to exactly one device
    pub async fn resolve(&self, idnr: &DevIdnr) -> Result<ResolvedDevice> {
        let cached = self.cache.read().get(idnr).cloned();
        if let Some(resolved) = cached {
            return Ok(resolved);
        }

        let records = self
            .records
            .get_or_try_init(|| self.inventory.block_devices())
            .await?;

        let matches: Vec<&InventoryRecord> =
            records.iter().filter(|record| idnr.matches(record)).collect();

        let record = match matches.as_slice() {
            [record] => (*record).clone(),
            [] => {
                return Err(Error::DeviceNotFound {
                    kind: idnr.kind.to_string(),
                    value: idnr.value.clone(),
                })
            }
            many => {
                return Err(Error::AmbiguousDevice {
                    kind: idnr.kind.to_string(),
                    value: idnr.value.clone(),
                    matches: many.iter().map(|r| r.dev_path.clone()).collect(),
                })
            }
        };

        let resolved = ResolvedDevice {
            dev_path: record.dev_path.clone(),
            record,
        };
        debug!("Resolved {} to {}", idnr, resolved.dev_path);
        self.cache.write().insert(idnr.clone(), resolved.clone());
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::HardwareInventory;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingInventory {
        records: Vec<InventoryRecord>,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl HardwareInventory for CountingInventory {
        async fn block_devices(&self) -> Result<Vec<InventoryRecord>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.records.clone())
        }
    }

    fn record(name: &str, scsi: &str, by_path: &str) -> InventoryRecord {
        InventoryRecord {
            name: name.to_string(),
            dev_path: format!("/dev/{}", name),
            size_bytes: 10 << 30,
            scsi_address: Some(scsi.to_string()),
            by_path: vec![by_path.to_string()],
            model: None,
            serial: None,
            removable: false,
        }
    }

    fn resolver() -> (DeviceResolver, Arc<CountingInventory>) {
        let inventory = Arc::new(CountingInventory {
            records: vec![
                record("sda", "0:0:0:0", "pci-0000:00:05.0-scsi-0:0:0:0"),
                record("sdb", "0:0:1:0", "pci-0000:00:05.0-scsi-0:0:1:0"),
                record("nvme0n1", "", "pci-0000:00:07.0-nvme-1"),
            ],
            fetches: AtomicUsize::new(0),
        });
        (DeviceResolver::new(inventory.clone()), inventory)
    }

    #[tokio::test]
    async fn test_resolve_each_kind() {
        let (resolver, _) = resolver();

        let by_name = resolver.resolve(&DevIdnr::name("sdb")).await.unwrap();
        assert_eq!(by_name.dev_path, "/dev/sdb");

        let by_node = resolver.resolve(&DevIdnr::name("/dev/nvme0n1")).await.unwrap();
        assert_eq!(by_node.record.name, "nvme0n1");

        let by_path = resolver
            .resolve(&DevIdnr::new(
                DevIdnrKind::Path,
                "/dev/disk/by-path/pci-0000:00:05.0-scsi-0:0:0:0",
            ))
            .await
            .unwrap();
        assert_eq!(by_path.dev_path, "/dev/sda");

        let by_scsi = resolver
            .resolve(&DevIdnr::new(DevIdnrKind::Scsi, "0:0:1:0"))
            .await
            .unwrap();
        assert_eq!(by_scsi.dev_path, "/dev/sdb");
    }

    #[tokio::test]
    async fn test_inventory_fetched_once() {
        let (resolver, inventory) = resolver();

        resolver.resolve(&DevIdnr::name("sda")).await.unwrap();
        resolver.resolve(&DevIdnr::name("sda")).await.unwrap();
        resolver.resolve(&DevIdnr::name("sdb")).await.unwrap();

        assert_eq!(inventory.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_not_found() {
        let (resolver, _) = resolver();
        assert_matches!(
            resolver.resolve(&DevIdnr::name("sdz")).await,
            Err(Error::DeviceNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_ambiguous() {
        let inventory = Arc::new(CountingInventory {
            records: vec![
                record("sda", "0:0:0:0", "pci-a"),
                record("sdb", "0:0:0:0", "pci-b"),
            ],
            fetches: AtomicUsize::new(0),
        });
        let resolver = DeviceResolver::new(inventory);

        assert_matches!(
            resolver.resolve(&DevIdnr::new(DevIdnrKind::Scsi, "0:0:0:0")).await,
            Err(Error::AmbiguousDevice { matches, .. }) if matches.len() == 2
        );
    }

    #[test]
    fn test_idnr_from_yaml() {
        let idnr: DevIdnr = serde_yaml::from_str("{type: scsi, value: '0:0:0:0'}").unwrap();
        assert_eq!(idnr.kind, DevIdnrKind::Scsi);
        assert_eq!(idnr.to_string(), "scsi=0:0:0:0");
    }
}
