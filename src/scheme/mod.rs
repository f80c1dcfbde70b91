//! Storage Scheme
//!
//! The flat, execution-ready description of a layout: partition tables,
//! LVM and MD records and filesystems. It is the artifact handed to the
//! policy executor and to the bootloader and image-copy collaborators.

pub mod convert;
pub mod diff;

pub use convert::*;
pub use diff::*;

use serde::{Deserialize, Serialize};

// =============================================================================
// Records
// =============================================================================

/// One partition table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parted {
    /// Disk device node
    pub name: String,
    /// Table format
    pub label: String,
    pub install_bootloader: bool,
    /// Declared disk size in bytes
    pub size: u64,
    /// Partitions in table order
    pub partitions: Vec<PartitionRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRecord {
    /// Partition device node
    pub name: String,
    /// 1-based table index
    pub count: u32,
    /// Disk device node
    pub device: String,
    /// Size in bytes
    pub size: u64,
    /// Byte offset of the first sector
    #[serde(default)]
    pub begin: u64,
    /// Byte offset one past the last sector
    #[serde(default)]
    pub end: u64,
    /// GPT type GUID
    pub guid: Option<String>,
    /// Table flags to set
    pub flags: Vec<String>,
    pub keep_data: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvRecord {
    /// Partition device node
    pub name: String,
    pub vg: String,
    /// Explicit metadata area in bytes
    pub metadatasize: Option<u64>,
    pub keep_data: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VgRecord {
    pub name: String,
    pub pvnames: Vec<String>,
    pub keep_data: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvRecord {
    pub name: String,
    pub vgname: String,
    /// Size in bytes
    pub size: u64,
    pub keep_data: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdRecord {
    /// Array device node
    pub name: String,
    pub level: String,
    /// Member partition nodes
    pub devices: Vec<String>,
    pub keep_data: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsRecord {
    pub device: String,
    pub mount: String,
    pub fs_type: String,
    /// mkfs options
    pub fs_options: String,
    pub fstab_options: String,
    pub fstab_enabled: bool,
    pub keep_data: bool,
    pub os_ids: Vec<u32>,
}

// =============================================================================
// Scheme
// =============================================================================

/// Flat storage scheme
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageScheme {
    pub parteds: Vec<Parted>,
    pub pvs: Vec<PvRecord>,
    pub vgs: Vec<VgRecord>,
    pub lvs: Vec<LvRecord>,
    pub mds: Vec<MdRecord>,
    pub fss: Vec<FsRecord>,
}

impl StorageScheme {
    /// All partitions across every table
    pub fn partitions(&self) -> impl Iterator<Item = &PartitionRecord> {
        self.parteds.iter().flat_map(|parted| parted.partitions.iter())
    }

    pub fn parted(&self, disk: &str) -> Option<&Parted> {
        self.parteds.iter().find(|parted| parted.name == disk)
    }

    pub fn fs_by_mount(&self, mount: &str) -> Option<&FsRecord> {
        self.fss.iter().find(|fs| fs.mount == mount)
    }

    pub fn fs_by_device(&self, device: &str) -> Option<&FsRecord> {
        self.fss.iter().find(|fs| fs.device == device)
    }

    /// Filesystems belonging to one operating system
    pub fn filesystems_for_os(&self, os_id: u32) -> impl Iterator<Item = &FsRecord> {
        self.fss.iter().filter(move |fs| fs.os_ids.contains(&os_id))
    }

    /// Device holding `/` for an operating system
    pub fn root_device(&self, os_id: u32) -> Option<&str> {
        self.filesystems_for_os(os_id)
            .find(|fs| fs.mount == "/")
            .map(|fs| fs.device.as_str())
    }

    /// Device holding `/boot`, or `/` when there is no separate boot
    pub fn boot_device(&self) -> Option<&str> {
        self.fs_by_mount("/boot")
            .or_else(|| self.fs_by_mount("/"))
            .map(|fs| fs.device.as_str())
    }

    /// Any filesystem must be preserved
    pub fn keeps_data(&self) -> bool {
        self.fss.iter().any(|fs| fs.keep_data)
    }
}
