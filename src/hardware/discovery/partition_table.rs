//! Partition Table Discovery
//!
//! Reconstructs the partition layout of a disk from host tool output:
//! `sgdisk --print` for geometry and the partition listing, `sgdisk --info`
//! for per-partition details and `lsblk` for the filesystem view of each
//! partition node. The two independent size reports are cross-checked.

use crate::domain::ports::CommandExecutorRef;
use crate::error::{Error, Result};
use crate::hardware::allocation::segment::{DiskGeometry, Partition, TableLabel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

// =============================================================================
// Scan Results
// =============================================================================

/// A partition found on disk together with its filesystem view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPartition {
    /// Table entry
    pub partition: Partition,
    /// Partition device node (e.g., /dev/sda1)
    pub device: String,
    /// Filesystem UUID, if formatted
    pub fs_uuid: Option<String>,
    /// Filesystem signature as reported by lsblk
    pub fs_type: Option<String>,
    /// Size reported by the block layer
    pub size_bytes: u64,
}

/// Complete scan of one disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskScan {
    /// Disk device node
    pub device: String,
    /// Geometry reported by the table tool
    pub geometry: DiskGeometry,
    /// Partitions in table order
    pub partitions: Vec<DiscoveredPartition>,
    /// When the scan was taken
    pub scanned_at: DateTime<Utc>,
}

/// Device node of partition `index` on `disk`
///
/// Disks whose kernel name ends in a digit (nvme0n1, mmcblk0, loop0) use a
/// `p` separator.
pub fn partition_device(disk: &str, index: u32) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{}p{}", disk, index)
    } else {
        format!("{}{}", disk, index)
    }
}

// =============================================================================
// Output Parsers
// =============================================================================

fn parse_error(tool: &str, reason: impl Into<String>) -> Error {
    Error::HostToolParse {
        tool: tool.to_string(),
        reason: reason.into(),
    }
}

fn parse_number(tool: &str, field: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| parse_error(tool, format!("invalid {} '{}'", field, raw.trim())))
}

/// Parse `sgdisk --print` output into geometry and partition listing
pub fn parse_sgdisk_print(text: &str) -> Result<(DiskGeometry, Vec<Partition>)> {
    const TOOL: &str = "sgdisk --print";

    let mut sectors = None;
    let mut sector_size = 512;
    let mut first_usable = None;
    let mut last_usable = None;
    let mut alignment = 1;
    let mut disk_guid = None;
    let mut label = TableLabel::Gpt;
    let mut partitions = Vec::new();
    let mut in_table = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if in_table {
            partitions.push(parse_partition_row(trimmed)?);
            continue;
        }

        if trimmed.contains("converting MBR to GPT format") {
            label = TableLabel::Msdos;
        } else if trimmed.contains("Creating new GPT entries") {
            label = TableLabel::None;
        } else if let Some(rest) = trimmed.strip_prefix("Disk identifier (GUID): ") {
            disk_guid = Some(rest.trim().to_string());
        } else if let Some(rest) = trimmed.strip_prefix("Disk ") {
            // Disk /dev/sda: 20971520 sectors, 10.0 GiB
            if let Some((_, counts)) = rest.split_once(": ") {
                if let Some(count) = counts.split_whitespace().next() {
                    sectors = Some(parse_number(TOOL, "sector count", count)?);
                }
            }
        } else if let Some(rest) = trimmed.strip_prefix("Sector size (logical/physical): ") {
            let logical = rest.split('/').next().unwrap_or_default();
            sector_size = parse_number(TOOL, "sector size", logical)?;
            if sector_size == 0 {
                return Err(parse_error(TOOL, "sector size is zero"));
            }
        } else if let Some(rest) = trimmed.strip_prefix("First usable sector is ") {
            // First usable sector is 34, last usable sector is 20971486
            let (first, last) = rest
                .split_once(", last usable sector is ")
                .ok_or_else(|| parse_error(TOOL, format!("malformed usable range '{}'", trimmed)))?;
            first_usable = Some(parse_number(TOOL, "first usable sector", first)?);
            last_usable = Some(parse_number(TOOL, "last usable sector", last)?);
        } else if let Some(rest) = trimmed.strip_prefix("Partitions will be aligned on ") {
            let count = rest.split('-').next().unwrap_or_default();
            alignment = parse_number(TOOL, "alignment", count)?;
        } else if trimmed.starts_with("Number") && trimmed.contains("Start (sector)") {
            in_table = true;
        }
    }

    let sectors = sectors.ok_or_else(|| parse_error(TOOL, "missing disk sector count"))?;
    let geometry = DiskGeometry {
        sectors,
        sector_size,
        label,
        first_usable: first_usable.ok_or_else(|| parse_error(TOOL, "missing usable range"))?,
        last_usable: last_usable.ok_or_else(|| parse_error(TOOL, "missing usable range"))?,
        alignment,
        disk_guid,
    };

    Ok((geometry, partitions))
}

/// Parse one row of the partition listing:
/// `   1            2048           51199   24.0 MiB    EF02  primary`
fn parse_partition_row(row: &str) -> Result<Partition> {
    const TOOL: &str = "sgdisk --print";

    let fields: Vec<&str> = row.split_whitespace().collect();
    if fields.len() < 6 {
        return Err(parse_error(TOOL, format!("short partition row '{}'", row)));
    }

    let index = u32::try_from(parse_number(TOOL, "partition number", fields[0])?)
        .map_err(|_| parse_error(TOOL, format!("partition number {} out of range", fields[0])))?;
    let begin = parse_number(TOOL, "start sector", fields[1])?;
    let last = parse_number(TOOL, "end sector", fields[2])?;
    if last < begin {
        return Err(parse_error(TOOL, format!("partition {} ends before it starts", index)));
    }

    let name = fields[6..].join(" ");
    Ok(Partition {
        index: Some(index),
        begin,
        end: last + 1,
        type_code: Some(fields[5].to_string()),
        name: (!name.is_empty()).then_some(name),
        ..Default::default()
    })
}

/// Merge `sgdisk --info=<n>` output into a listed partition
pub fn parse_sgdisk_info(text: &str, partition: &mut Partition) -> Result<()> {
    const TOOL: &str = "sgdisk --info";

    let mut first = None;
    let mut last = None;

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim() {
            "Partition GUID code" => {
                // 21686148-6449-6E6F-744E-656564454649 (BIOS boot partition)
                let guid = value.split_whitespace().next().unwrap_or_default();
                partition.type_guid = Some(guid.to_string());
            }
            "Partition unique GUID" => partition.guid = Some(value.to_string()),
            "First sector" => {
                let raw = value.split_whitespace().next().unwrap_or_default();
                first = Some(parse_number(TOOL, "first sector", raw)?);
            }
            "Last sector" => {
                let raw = value.split_whitespace().next().unwrap_or_default();
                last = Some(parse_number(TOOL, "last sector", raw)?);
            }
            "Attribute flags" => partition.attributes = Some(value.to_string()),
            "Partition name" => {
                let name = value.trim_matches('\'');
                partition.name = (!name.is_empty()).then(|| name.to_string());
            }
            _ => {}
        }
    }

    if let (Some(first), Some(last)) = (first, last) {
        if first != partition.begin || last + 1 != partition.end {
            return Err(parse_error(
                TOOL,
                format!(
                    "partition {:?} reported at [{}, {}] but listed at [{}, {}]",
                    partition.index,
                    first,
                    last,
                    partition.begin,
                    partition.last_sector()
                ),
            ));
        }
    }

    Ok(())
}

/// Parse `lsblk --pairs` output (`KEY="value" KEY="value"`) of the first row
pub fn parse_lsblk_pairs(text: &str) -> HashMap<String, String> {
    let mut pairs = HashMap::new();
    let Some(line) = text.lines().find(|line| !line.trim().is_empty()) else {
        return pairs;
    };

    let mut rest = line.trim();
    while let Some((key, tail)) = rest.split_once("=\"") {
        let Some((value, tail)) = tail.split_once('"') else {
            break;
        };
        pairs.insert(key.trim().to_string(), value.to_string());
        rest = tail.trim_start();
    }
    pairs
}

// =============================================================================
// Scanner
// =============================================================================

/// Drives the host tools to produce a `DiskScan`
pub struct PartitionTableScanner {
    executor: CommandExecutorRef,
}

impl PartitionTableScanner {
    pub fn new(executor: CommandExecutorRef) -> Self {
        Self { executor }
    }

    async fn run(&self, program: &str, args: Vec<String>) -> Result<String> {
        let command = crate::domain::ports::command_line(program, &args);
        self.executor
            .execute(program, &args)
            .await?
            .into_stdout(&command)
    }

    /// Scan geometry, partitions and filesystems of `device`
    pub async fn scan(&self, device: &str) -> Result<DiskScan> {
        let printed = self
            .run("sgdisk", vec!["--print".into(), device.to_string()])
            .await?;
        let (geometry, listed) = parse_sgdisk_print(&printed)?;
        debug!(
            "{}: {} sectors of {} bytes, label {}, {} partitions",
            device,
            geometry.sectors,
            geometry.sector_size,
            geometry.label,
            listed.len()
        );

        let mut partitions = Vec::with_capacity(listed.len());
        for mut partition in listed {
            let index = partition.index.unwrap_or_default();

            let info = self
                .run("sgdisk", vec![format!("--info={}", index), device.to_string()])
                .await?;
            parse_sgdisk_info(&info, &mut partition)?;

            let node = partition_device(device, index);
            let pairs = parse_lsblk_pairs(
                &self
                    .run(
                        "lsblk",
                        vec![
                            "--bytes".into(),
                            "--nodeps".into(),
                            "--pairs".into(),
                            "--output".into(),
                            "UUID,FSTYPE,SIZE".into(),
                            node.clone(),
                        ],
                    )
                    .await?,
            );

            let table_bytes = partition.sectors() * geometry.sector_size;
            let fs_bytes = match pairs.get("SIZE") {
                Some(raw) => parse_number("lsblk", "size", raw)?,
                None => return Err(parse_error("lsblk", format!("no SIZE reported for {}", node))),
            };
            if table_bytes != fs_bytes {
                return Err(Error::PartitionSizeMismatch {
                    device: node,
                    table_bytes,
                    fs_bytes,
                });
            }

            let non_empty = |key: &str| pairs.get(key).filter(|v| !v.is_empty()).cloned();
            partitions.push(DiscoveredPartition {
                fs_uuid: non_empty("UUID"),
                fs_type: non_empty("FSTYPE"),
                partition,
                device: node,
                size_bytes: fs_bytes,
            });
        }

        Ok(DiskScan {
            device: device.to_string(),
            geometry,
            partitions,
            scanned_at: Utc::now(),
        })
    }

    /// Capacity of `device` in bytes as reported by the block layer
    pub async fn capacity_bytes(&self, device: &str) -> Result<u64> {
        let raw = self
            .run("blockdev", vec!["--getsize64".into(), device.to_string()])
            .await?;
        parse_number("blockdev --getsize64", "size", &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{script_sda, FakeExecutor, SDA1_INFO, SDA2_INFO, SDA_PRINT};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    #[test]
    fn test_partition_device() {
        assert_eq!(partition_device("/dev/sda", 3), "/dev/sda3");
        assert_eq!(partition_device("/dev/nvme0n1", 3), "/dev/nvme0n1p3");
    }

    #[test]
    fn test_parse_print() {
        let (geometry, partitions) = parse_sgdisk_print(SDA_PRINT).unwrap();

        assert_eq!(geometry.sectors, 20480);
        assert_eq!(geometry.sector_size, 512);
        assert_eq!(geometry.first_usable, 34);
        assert_eq!(geometry.last_usable, 20446);
        assert_eq!(geometry.alignment, 2048);
        assert_eq!(geometry.label, TableLabel::Gpt);
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].index, Some(1));
        assert_eq!((partitions[0].begin, partitions[0].end), (2048, 4096));
        assert_eq!(partitions[0].type_code.as_deref(), Some("EF02"));
        assert_eq!(partitions[0].name.as_deref(), Some("primary"));
        assert_eq!(partitions[1].name, None);
    }

    #[test]
    fn test_parse_print_detects_label() {
        let text = "Found invalid GPT and valid MBR; converting MBR to GPT format\nin memory.\n";
        let text = format!("{}{}", text, SDA_PRINT);
        assert_eq!(parse_sgdisk_print(&text).unwrap().0.label, TableLabel::Msdos);

        let text = format!("Creating new GPT entries in memory.\n{}", SDA_PRINT);
        assert_eq!(parse_sgdisk_print(&text).unwrap().0.label, TableLabel::None);
    }

    #[test]
    fn test_parse_print_rejects_garbage() {
        assert_matches!(
            parse_sgdisk_print("Problem opening /dev/sdz for reading!"),
            Err(Error::HostToolParse { .. })
        );
    }

    #[test]
    fn test_parse_print_rejects_zero_sector_size() {
        let text = SDA_PRINT.replace("512/512 bytes", "0/512 bytes");
        assert_matches!(
            parse_sgdisk_print(&text),
            Err(Error::HostToolParse { reason, .. }) if reason.contains("sector size")
        );
    }

    #[test]
    fn test_parse_print_rejects_oversized_index() {
        let text = SDA_PRINT.replace(
            "   2            4096           10239",
            "   4294967296   4096           10239",
        );
        assert_matches!(
            parse_sgdisk_print(&text),
            Err(Error::HostToolParse { reason, .. }) if reason.contains("4294967296")
        );
    }

    #[test]
    fn test_parse_info() {
        let (_, mut partitions) = parse_sgdisk_print(SDA_PRINT).unwrap();
        parse_sgdisk_info(SDA1_INFO, &mut partitions[0]).unwrap();

        assert_eq!(
            partitions[0].type_guid.as_deref(),
            Some("21686148-6449-6E6F-744E-656564454649")
        );
        assert_eq!(
            partitions[0].guid.as_deref(),
            Some("1B2F7E9A-0000-4000-8000-000000000001")
        );
        assert_eq!(partitions[0].attributes.as_deref(), Some("0000000000000000"));

        assert_matches!(
            parse_sgdisk_info(SDA2_INFO, &mut partitions[0]),
            Err(Error::HostToolParse { .. })
        );
    }

    #[test]
    fn test_parse_lsblk_pairs() {
        let pairs = parse_lsblk_pairs("UUID=\"\" FSTYPE=\"linux-swap(v1)\" SIZE=\"3145728\"\n");
        assert_eq!(pairs["UUID"], "");
        assert_eq!(pairs["FSTYPE"], "linux-swap(v1)");
        assert_eq!(pairs["SIZE"], "3145728");
    }

    fn scripted(sda2_size: &str) -> Arc<FakeExecutor> {
        let executor = FakeExecutor::new();
        script_sda(&executor, sda2_size);
        Arc::new(executor)
    }

    #[tokio::test]
    async fn test_scan() {
        let scan = PartitionTableScanner::new(scripted("3145728"))
            .scan("/dev/sda")
            .await
            .unwrap();

        assert_eq!(scan.partitions.len(), 2);
        assert_eq!(scan.partitions[0].device, "/dev/sda1");
        assert_eq!(scan.partitions[0].fs_type, None);
        assert_eq!(scan.partitions[1].fs_type.as_deref(), Some("ext4"));
        assert_eq!(scan.partitions[1].fs_uuid.as_deref(), Some("abcd"));
    }

    #[tokio::test]
    async fn test_scan_size_mismatch() {
        let result = PartitionTableScanner::new(scripted("4194304"))
            .scan("/dev/sda")
            .await;

        assert_matches!(
            result,
            Err(Error::PartitionSizeMismatch { table_bytes: 3145728, fs_bytes: 4194304, .. })
        );
    }

    #[tokio::test]
    async fn test_capacity_bytes() {
        let executor = FakeExecutor::new();
        executor.respond("blockdev --getsize64 /dev/sda", "10485760\n");

        let scanner = PartitionTableScanner::new(Arc::new(executor));
        assert_eq!(scanner.capacity_bytes("/dev/sda").await.unwrap(), 10485760);
    }
}
