//! Block Device Inventory
//!
//! Host-backed inventory built from `lsblk` JSON output and udev
//! properties, plus a static inventory for planning away from the target
//! host.

use crate::domain::ports::{command_line, CommandExecutorRef, HardwareInventory, InventoryRecord};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, warn};

const LSBLK_COLUMNS: &str = "NAME,PATH,SIZE,HCTL,TYPE,MODEL,SERIAL,RM";

// =============================================================================
// Host Inventory
// =============================================================================

/// Inventory queried from the running host
pub struct HostInventory {
    executor: CommandExecutorRef,
}

impl HostInventory {
    pub fn new(executor: CommandExecutorRef) -> Self {
        Self { executor }
    }

    async fn udev_properties(&self, device: &str) -> Result<String> {
        let args = vec![
            "info".to_string(),
            "--query=property".to_string(),
            format!("--name={}", device),
        ];
        self.executor
            .execute("udevadm", &args)
            .await?
            .into_stdout(&command_line("udevadm", &args))
    }
}

#[async_trait]
impl HardwareInventory for HostInventory {
    async fn block_devices(&self) -> Result<Vec<InventoryRecord>> {
        let args: Vec<String> = ["--json", "--bytes", "--nodeps", "--output", LSBLK_COLUMNS]
            .iter()
            .map(|arg| arg.to_string())
            .collect();
        let stdout = self
            .executor
            .execute("lsblk", &args)
            .await?
            .into_stdout(&command_line("lsblk", &args))?;

        let mut records = parse_lsblk_json(&stdout)?;
        for record in &mut records {
            match self.udev_properties(&record.dev_path).await {
                Ok(properties) => record.by_path = parse_by_path(&properties),
                Err(e) => warn!("No udev properties for {}: {}", record.dev_path, e),
            }
        }

        debug!("Inventory lists {} disks", records.len());
        Ok(records)
    }
}

/// Parse `lsblk --json` output into disk records
///
/// Older lsblk releases print numbers and booleans as strings, so both
/// shapes are accepted.
pub fn parse_lsblk_json(text: &str) -> Result<Vec<InventoryRecord>> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    let devices = json["blockdevices"]
        .as_array()
        .ok_or_else(|| Error::HostToolParse {
            tool: "lsblk".to_string(),
            reason: "missing blockdevices array".to_string(),
        })?;

    let text_field = |device: &serde_json::Value, key: &str| {
        device[key]
            .as_str()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let mut records = Vec::new();
    for device in devices {
        if device["type"].as_str() != Some("disk") {
            continue;
        }

        let Some(name) = text_field(device, "name") else {
            continue;
        };
        let dev_path = text_field(device, "path").unwrap_or_else(|| format!("/dev/{}", name));

        let size_bytes = device["size"]
            .as_u64()
            .or_else(|| device["size"].as_str().and_then(|s| s.parse().ok()))
            .unwrap_or(0);

        let removable = device["rm"]
            .as_bool()
            .unwrap_or_else(|| matches!(device["rm"].as_str(), Some("1") | Some("true")));

        records.push(InventoryRecord {
            name,
            dev_path,
            size_bytes,
            scsi_address: text_field(device, "hctl"),
            by_path: Vec::new(),
            model: text_field(device, "model"),
            serial: text_field(device, "serial"),
            removable,
        });
    }

    Ok(records)
}

/// Collect by-path identifiers from `udevadm info --query=property` output
pub fn parse_by_path(properties: &str) -> Vec<String> {
    let mut ids = Vec::new();
    for line in properties.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            "ID_PATH" => ids.push(value.trim().to_string()),
            "DEVLINKS" => ids.extend(
                value
                    .split_whitespace()
                    .filter_map(|link| link.strip_prefix("/dev/disk/by-path/"))
                    .map(str::to_string),
            ),
            _ => {}
        }
    }
    ids.sort();
    ids.dedup();
    ids
}

// =============================================================================
// Static Inventory
// =============================================================================

/// Fixed inventory, typically loaded from a JSON file of records
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    records: Vec<InventoryRecord>,
}

impl StaticInventory {
    pub fn new(records: Vec<InventoryRecord>) -> Self {
        Self { records }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::new(serde_json::from_str(&raw)?))
    }
}

#[async_trait]
impl HardwareInventory for StaticInventory {
    async fn block_devices(&self) -> Result<Vec<InventoryRecord>> {
        Ok(self.records.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeExecutor;
    use std::sync::Arc;

    const LSBLK: &str = r#"{
   "blockdevices": [
      {"name":"sda", "path":"/dev/sda", "size":10737418240, "hctl":"0:0:0:0", "type":"disk", "model":"QEMU HARDDISK   ", "serial":"drive-scsi0", "rm":false},
      {"name":"sr0", "path":"/dev/sr0", "size":1073741312, "hctl":"1:0:0:0", "type":"rom", "model":"QEMU DVD-ROM", "serial":null, "rm":true},
      {"name":"nvme0n1", "path":"/dev/nvme0n1", "size":"2147483648", "hctl":null, "type":"disk", "model":null, "serial":"nvme-1", "rm":"0"}
   ]
}"#;

    const UDEV: &str = "\
DEVNAME=/dev/sda
ID_PATH=pci-0000:00:05.0-scsi-0:0:0:0
DEVLINKS=/dev/disk/by-id/scsi-0QEMU_QEMU_HARDDISK_drive-scsi0 /dev/disk/by-path/pci-0000:00:05.0-scsi-0:0:0:0 /dev/disk/by-path/virtio-pci-0000:00:05.0-scsi-0:0:0:0
";

    #[test]
    fn test_parse_lsblk_json() {
        let records = parse_lsblk_json(LSBLK).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "sda");
        assert_eq!(records[0].size_bytes, 10737418240);
        assert_eq!(records[0].model.as_deref(), Some("QEMU HARDDISK"));
        assert_eq!(records[1].size_bytes, 2147483648);
        assert_eq!(records[1].scsi_address, None);
        assert!(!records[1].removable);
    }

    #[test]
    fn test_parse_by_path() {
        assert_eq!(
            parse_by_path(UDEV),
            vec![
                "pci-0000:00:05.0-scsi-0:0:0:0".to_string(),
                "virtio-pci-0000:00:05.0-scsi-0:0:0:0".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_host_inventory() {
        let executor = FakeExecutor::new();
        executor.respond(
            "lsblk --json --bytes --nodeps --output NAME,PATH,SIZE,HCTL,TYPE,MODEL,SERIAL,RM",
            LSBLK,
        );
        executor.respond("udevadm info --query=property --name=/dev/sda", UDEV);
        executor.fail("udevadm info --query=property --name=/dev/nvme0n1", 1, "no device");

        let records = HostInventory::new(Arc::new(executor)).block_devices().await.unwrap();

        assert_eq!(records[0].by_path.len(), 2);
        assert!(records[1].by_path.is_empty());
    }
}
