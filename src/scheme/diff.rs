//! Scheme Comparison
//!
//! Builds the scheme a disk scan implies, normalizes declared and hardware
//! schemes down to what a partition table can carry, and reports any
//! remaining field-level differences.

use super::*;
use crate::domain::gpt;
use crate::hardware::discovery::partition_table::DiskScan;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

// =============================================================================
// Diff
// =============================================================================

/// One differing field or record
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    /// Location, e.g. `parteds[/dev/sda].partitions[/dev/sda3]`
    pub path: String,
    /// Value in the declared scheme
    pub declared: Option<Value>,
    /// Value found on hardware
    pub hardware: Option<Value>,
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |value: &Option<Value>| match value {
            Some(value) => value.to_string(),
            None => "<missing>".to_string(),
        };
        write!(
            f,
            "{}: declared {}, hardware {}",
            self.path,
            show(&self.declared),
            show(&self.hardware)
        )
    }
}

/// Structured difference between two schemes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemeDiff {
    pub entries: Vec<DiffEntry>,
}

impl SchemeDiff {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for SchemeDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "  {}", entry)?;
        }
        Ok(())
    }
}

// =============================================================================
// Hardware Scheme
// =============================================================================

/// Translate filesystem names reported by the host into scheme vocabulary
pub fn canonical_fs_type(fs_type: &str) -> String {
    match fs_type {
        "linux-swap(v1)" | "linux-swap" | "swsuspend" => "swap".to_string(),
        "fat32" | "fat16" => "vfat".to_string(),
        other => other.to_string(),
    }
}

/// Scheme implied by a set of disk scans
pub fn hardware_scheme(scans: &[DiskScan]) -> StorageScheme {
    let mut scheme = StorageScheme::default();

    for scan in scans {
        let partitions = scan
            .partitions
            .iter()
            .map(|found| {
                let guid = found
                    .partition
                    .type_guid
                    .as_ref()
                    .map(|guid| guid.to_ascii_uppercase());
                PartitionRecord {
                    name: found.device.clone(),
                    count: found.partition.index.unwrap_or_default(),
                    device: scan.device.clone(),
                    size: found.size_bytes,
                    begin: found.partition.begin * scan.geometry.sector_size,
                    end: found.partition.end * scan.geometry.sector_size,
                    flags: guid
                        .as_deref()
                        .and_then(gpt::table_flag)
                        .map(|flag| vec![flag.to_string()])
                        .unwrap_or_default(),
                    guid,
                    keep_data: false,
                }
            })
            .collect();

        scheme.parteds.push(Parted {
            name: scan.device.clone(),
            label: scan.geometry.label.to_string(),
            install_bootloader: false,
            size: scan.geometry.size_bytes(),
            partitions,
        });

        for found in &scan.partitions {
            if let Some(fs_type) = &found.fs_type {
                scheme.fss.push(FsRecord {
                    device: found.device.clone(),
                    fs_type: canonical_fs_type(fs_type),
                    ..Default::default()
                });
            }
        }
    }

    scheme
}

// =============================================================================
// Normalization
// =============================================================================

/// Reduce a scheme to what a scanned partition table can carry
///
/// Keeps partition tables and the filesystems sitting directly on their
/// partitions. Sizes, preservation flags, owning OS ids and mount
/// attributes are cleared; partition geometry is compared through the
/// begin and end offsets instead.
pub fn normalize(scheme: &StorageScheme) -> StorageScheme {
    let partition_nodes: HashSet<&str> =
        scheme.partitions().map(|partition| partition.name.as_str()).collect();

    let parteds = scheme
        .parteds
        .iter()
        .map(|parted| Parted {
            name: parted.name.clone(),
            label: parted.label.clone(),
            install_bootloader: false,
            size: 0,
            partitions: parted
                .partitions
                .iter()
                .map(|partition| PartitionRecord {
                    size: 0,
                    keep_data: false,
                    guid: partition.guid.as_ref().map(|guid| guid.to_ascii_uppercase()),
                    ..partition.clone()
                })
                .collect(),
        })
        .collect();

    let fss = scheme
        .fss
        .iter()
        .filter(|fs| partition_nodes.contains(fs.device.as_str()))
        .map(|fs| FsRecord {
            device: fs.device.clone(),
            fs_type: canonical_fs_type(&fs.fs_type),
            ..Default::default()
        })
        .collect();

    StorageScheme {
        parteds,
        fss,
        ..Default::default()
    }
}

/// Drop hardware records the declared scheme does not reference
pub fn restrict(hardware: &StorageScheme, declared: &StorageScheme) -> StorageScheme {
    let disks: HashSet<&str> = declared.parteds.iter().map(|p| p.name.as_str()).collect();
    let devices: HashSet<&str> = declared.fss.iter().map(|fs| fs.device.as_str()).collect();

    StorageScheme {
        parteds: hardware
            .parteds
            .iter()
            .filter(|parted| disks.contains(parted.name.as_str()))
            .cloned()
            .collect(),
        fss: hardware
            .fss
            .iter()
            .filter(|fs| devices.contains(fs.device.as_str()))
            .cloned()
            .collect(),
        ..Default::default()
    }
}

/// Compare a declared scheme with the scheme found on hardware
pub fn compare(declared: &StorageScheme, hardware: &StorageScheme) -> SchemeDiff {
    let declared = normalize(declared);
    let hardware = restrict(&normalize(hardware), &declared);

    // plain records always serialize
    let declared = serde_json::to_value(&declared).unwrap_or(Value::Null);
    let hardware = serde_json::to_value(&hardware).unwrap_or(Value::Null);

    let mut diff = SchemeDiff::default();
    diff_values("", &declared, &hardware, &mut diff.entries);
    diff
}

// =============================================================================
// Value Diff
// =============================================================================

/// Identity of an array element: its `name`, else its `device`
fn element_key(value: &Value) -> Option<String> {
    value
        .get("name")
        .or_else(|| value.get("device"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn diff_values(path: &str, declared: &Value, hardware: &Value, out: &mut Vec<DiffEntry>) {
    match (declared, hardware) {
        (Value::Object(d), Value::Object(h)) => {
            let keys: BTreeSet<&String> = d.keys().chain(h.keys()).collect();
            for key in keys {
                let child = join(path, key);
                match (d.get(key.as_str()), h.get(key.as_str())) {
                    (Some(dv), Some(hv)) => diff_values(&child, dv, hv, out),
                    (dv, hv) => out.push(DiffEntry {
                        path: child,
                        declared: dv.cloned(),
                        hardware: hv.cloned(),
                    }),
                }
            }
        }
        (Value::Array(d), Value::Array(h)) if keyed(d) && keyed(h) => {
            let mut seen = HashSet::new();
            for dv in d {
                let key = element_key(dv).unwrap_or_default();
                seen.insert(key.clone());
                let child = format!("{}[{}]", path, key);
                match h.iter().find(|hv| element_key(hv).as_deref() == Some(key.as_str())) {
                    Some(hv) => diff_values(&child, dv, hv, out),
                    None => out.push(DiffEntry {
                        path: child,
                        declared: Some(dv.clone()),
                        hardware: None,
                    }),
                }
            }
            for hv in h {
                let key = element_key(hv).unwrap_or_default();
                if !seen.contains(&key) {
                    out.push(DiffEntry {
                        path: format!("{}[{}]", path, key),
                        declared: None,
                        hardware: Some(hv.clone()),
                    });
                }
            }
        }
        (Value::Array(d), Value::Array(h)) => {
            for index in 0..d.len().max(h.len()) {
                let child = format!("{}[{}]", path, index);
                match (d.get(index), h.get(index)) {
                    (Some(dv), Some(hv)) => diff_values(&child, dv, hv, out),
                    (dv, hv) => out.push(DiffEntry {
                        path: child,
                        declared: dv.cloned(),
                        hardware: hv.cloned(),
                    }),
                }
            }
        }
        (d, h) if d != h => out.push(DiffEntry {
            path: path.to_string(),
            declared: Some(d.clone()),
            hardware: Some(h.clone()),
        }),
        _ => {}
    }
}

/// Arrays of named records are matched by name rather than position
fn keyed(values: &[Value]) -> bool {
    values.iter().all(|value| element_key(value).is_some())
}
