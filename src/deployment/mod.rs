//! Deployment Document
//!
//! The declarative input: disks with their ordered volumes, LVM volume
//! groups, the image list and the partitioning policy. Every volume kind
//! has its own typed struct; unknown fields are rejected.

use crate::domain::size::{SizeUnit, SpaceClaim};
use crate::error::{Error, Result};
use crate::hardware::discovery::identity::DevIdnr;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

fn default_true() -> bool {
    true
}

fn default_mount_opts() -> String {
    "defaults".to_string()
}

fn default_boot_mount() -> Option<String> {
    Some("/boot".to_string())
}

fn default_boot_fs() -> Option<String> {
    Some("ext2".to_string())
}

fn default_raid_level() -> String {
    "mirror".to_string()
}

// =============================================================================
// Partitioning Policy
// =============================================================================

/// Build strategy for a deployment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionPolicy {
    /// Compare against hardware, recreate only non-preserved filesystems
    Verify,
    /// Wipe and rebuild everything
    #[default]
    Clean,
    /// Rebuild unless some filesystem must be preserved
    Legacy,
}

impl fmt::Display for PartitionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionPolicy::Verify => write!(f, "verify"),
            PartitionPolicy::Clean => write!(f, "clean"),
            PartitionPolicy::Legacy => write!(f, "legacy"),
        }
    }
}

impl FromStr for PartitionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "verify" => Ok(PartitionPolicy::Verify),
            "clean" => Ok(PartitionPolicy::Clean),
            "legacy" => Ok(PartitionPolicy::Legacy),
            other => Err(Error::InvalidDeployment(format!(
                "unknown partitioning policy: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Filesystem Declaration
// =============================================================================

/// Filesystem fields shared by partitions, boot partitions, RAIDs and LVs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemDecl {
    pub mount: Option<String>,
    pub file_system: Option<String>,
    pub mount_opts: String,
    pub fs_options: String,
    pub fstab_enabled: bool,
    pub keep_data: bool,
    /// Owning OS ids; `None` means every declared image
    pub images: Option<Vec<u32>>,
}

// =============================================================================
// Disk Volumes
// =============================================================================

/// Plain partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionSpec {
    pub size: SpaceClaim,
    #[serde(default)]
    pub mount: Option<String>,
    #[serde(default)]
    pub file_system: Option<String>,
    #[serde(default = "default_mount_opts")]
    pub mount_opts: String,
    #[serde(default)]
    pub fs_options: String,
    #[serde(default = "default_true")]
    pub fstab_enabled: bool,
    #[serde(default)]
    pub keep_data: bool,
    #[serde(default)]
    pub images: Option<Vec<u32>>,
    /// Accepted for compatibility; the planner ignores it
    #[serde(default)]
    pub disk_label: Option<String>,
    /// Explicit GPT type GUID
    #[serde(default)]
    pub partition_guid: Option<String>,
}

/// Boot partition (at most one per disk)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootSpec {
    pub size: SpaceClaim,
    #[serde(default = "default_boot_mount")]
    pub mount: Option<String>,
    #[serde(default = "default_boot_fs")]
    pub file_system: Option<String>,
    #[serde(default = "default_mount_opts")]
    pub mount_opts: String,
    #[serde(default)]
    pub fs_options: String,
    #[serde(default = "default_true")]
    pub fstab_enabled: bool,
    #[serde(default)]
    pub keep_data: bool,
    #[serde(default)]
    pub images: Option<Vec<u32>>,
}

/// LVM physical volume feeding a volume group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PvSpec {
    /// Target volume group id
    pub vg: String,
    pub size: SpaceClaim,
    /// Metadata area reserved on this PV
    #[serde(default)]
    pub lvm_meta_size: Option<SizeUnit>,
}

/// Software RAID member; members sharing a mount form one array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RaidSpec {
    pub size: SpaceClaim,
    pub mount: String,
    /// Array device name, auto-assigned when absent
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_raid_level")]
    pub level: String,
    #[serde(default)]
    pub file_system: Option<String>,
    #[serde(default = "default_mount_opts")]
    pub mount_opts: String,
    #[serde(default)]
    pub fs_options: String,
    #[serde(default = "default_true")]
    pub fstab_enabled: bool,
    #[serde(default)]
    pub keep_data: bool,
    #[serde(default)]
    pub images: Option<Vec<u32>>,
}

/// Legacy LVM metadata pool; parsed and discarded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetaPoolSpec {
    pub size: SpaceClaim,
}

/// A volume on a disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiskVolume {
    Partition(PartitionSpec),
    Boot(BootSpec),
    Pv(PvSpec),
    Raid(RaidSpec),
    LvmMetaPool(MetaPoolSpec),
}

// =============================================================================
// Storage Entries
// =============================================================================

/// A physical disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiskSpec {
    pub id: DevIdnr,
    /// Declared total size
    pub size: SizeUnit,
    /// Install the bootloader on this disk
    #[serde(default = "default_true")]
    pub bootloader: bool,
    #[serde(default)]
    pub volumes: Vec<DiskVolume>,
}

/// Logical volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LvSpec {
    pub name: String,
    pub size: SpaceClaim,
    #[serde(default)]
    pub mount: Option<String>,
    #[serde(default)]
    pub file_system: Option<String>,
    #[serde(default = "default_mount_opts")]
    pub mount_opts: String,
    #[serde(default)]
    pub fs_options: String,
    #[serde(default = "default_true")]
    pub fstab_enabled: bool,
    #[serde(default)]
    pub keep_data: bool,
    #[serde(default)]
    pub images: Option<Vec<u32>>,
}

/// A volume inside a volume group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VgVolume {
    Lv(LvSpec),
}

/// LVM volume group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VgSpec {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    /// Allocation hint, informational only
    #[serde(default)]
    pub min_size: Option<SizeUnit>,
    #[serde(default)]
    pub volumes: Vec<VgVolume>,
}

/// Top-level storage entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageEntry {
    Disk(DiskSpec),
    Vg(VgSpec),
}

macro_rules! filesystem_decl {
    ($($spec:ty => |$s:ident| $mount:expr),* $(,)?) => {
        $(
            impl $spec {
                pub fn filesystem(&self) -> FilesystemDecl {
                    let $s = self;
                    FilesystemDecl {
                        mount: $mount,
                        file_system: $s.file_system.clone(),
                        mount_opts: $s.mount_opts.clone(),
                        fs_options: $s.fs_options.clone(),
                        fstab_enabled: $s.fstab_enabled,
                        keep_data: $s.keep_data,
                        images: $s.images.clone(),
                    }
                }
            }
        )*
    };
}

filesystem_decl! {
    PartitionSpec => |s| s.mount.clone(),
    BootSpec => |s| s.mount.clone(),
    RaidSpec => |s| Some(s.mount.clone()),
    LvSpec => |s| s.mount.clone(),
}

// =============================================================================
// Images
// =============================================================================

/// OS image declaration; only its target and OS id matter to the planner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageSpec {
    pub name: String,
    pub uri: String,
    /// Mount point populated by the image copy
    pub target: String,
    pub os_id: u32,
    #[serde(default)]
    pub format: Option<String>,
}

// =============================================================================
// Deployment
// =============================================================================

/// A complete deployment request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Deployment {
    #[serde(default)]
    pub partitioning_policy: PartitionPolicy,
    #[serde(default)]
    pub images: Vec<ImageSpec>,
    pub storage: Vec<StorageEntry>,
}

impl Deployment {
    /// Parse a YAML (or JSON) document
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn disks(&self) -> impl Iterator<Item = &DiskSpec> {
        self.storage.iter().filter_map(|entry| match entry {
            StorageEntry::Disk(disk) => Some(disk),
            _ => None,
        })
    }

    pub fn vgs(&self) -> impl Iterator<Item = &VgSpec> {
        self.storage.iter().filter_map(|entry| match entry {
            StorageEntry::Vg(vg) => Some(vg),
            _ => None,
        })
    }

    /// More than one OS image is deployed
    pub fn is_multiboot(&self) -> bool {
        self.images.len() > 1
    }

    /// OS ids of every declared image
    pub fn os_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.images.iter().map(|image| image.os_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Mount points populated by image copies
    pub fn image_targets(&self) -> Vec<&str> {
        self.images.iter().map(|image| image.target.as_str()).collect()
    }
}
