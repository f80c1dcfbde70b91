//! Planner Configuration
//!
//! Alignment, overhead constants, retry policy and udev locations. The
//! configuration is an explicit value handed to every component that needs
//! it; nothing reads ambient global state.

use crate::domain::size::MIB;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for planning and building a storage layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlannerConfig {
    /// Logical sector size assumed when planning an unscanned disk
    pub sector_size: u64,
    /// Alignment granularity (sectors) for unscanned disks
    pub alignment_sectors: u64,
    /// Sectors reserved for the primary GPT at the head of the disk
    pub gpt_head_sectors: u64,
    /// Sectors reserved for the backup GPT at the tail of the disk
    pub gpt_tail_sectors: u64,

    /// LVM metadata reserve deducted once per volume group
    pub lvm_metadata_overhead: u64,
    /// Reserve deducted once per disk from a `remaining` claim
    pub disk_overhead: u64,
    /// Size of the prepended bootloader metadata partition
    pub service_partition_size: u64,
    /// Size of the prepended shared boot partition (multi-OS)
    pub multiboot_partition_size: u64,

    /// Bytes zeroed at both ends of every new partition
    pub wipe_size: u64,
    /// Attempts for partition table mutations answering "busy"
    pub busy_retries: u32,
    /// Delay between busy retries in milliseconds
    pub busy_retry_delay_ms: u64,

    /// Directory receiving no-op rule overrides
    pub udev_rules_dir: PathBuf,
    /// Directory holding the rules to blacklist
    pub udev_rules_lib_dir: PathBuf,
    /// Rule file name patterns to blacklist
    pub udev_blacklist: Vec<String>,
    /// Name of the no-op rule file
    pub udev_empty_rule: String,
    /// Suffix used to park existing override files
    pub udev_rename_suffix: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            sector_size: 512,
            alignment_sectors: 2048,
            gpt_head_sectors: 34,
            gpt_tail_sectors: 33,

            lvm_metadata_overhead: 64 * MIB,
            disk_overhead: 2 * MIB,
            service_partition_size: 24 * MIB,
            multiboot_partition_size: 100 * MIB,

            wipe_size: 4 * MIB,
            busy_retries: 10,
            busy_retry_delay_ms: 2000,

            udev_rules_dir: PathBuf::from("/etc/udev/rules.d"),
            udev_rules_lib_dir: PathBuf::from("/lib/udev/rules.d"),
            udev_blacklist: vec![
                "50-firmware.rules".to_string(),
                "60-persistent-storage.rules".to_string(),
                "61-*.rules".to_string(),
                "62-multipath.rules".to_string(),
                "66-md-auto-readd.rules".to_string(),
                "67-kpartx-compat.rules".to_string(),
                "68-del-part-nodes.rules".to_string(),
            ],
            udev_empty_rule: "empty_rule".to_string(),
            udev_rename_suffix: ".renamedrule".to_string(),
        }
    }
}

impl PlannerConfig {
    /// Load a configuration file (YAML or JSON)
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make planning meaningless
    pub fn validate(&self) -> Result<()> {
        if self.sector_size == 0 || self.sector_size % 512 != 0 {
            return Err(Error::Configuration(format!(
                "sector_size must be a positive multiple of 512, got {}",
                self.sector_size
            )));
        }
        if self.alignment_sectors == 0 {
            return Err(Error::Configuration("alignment_sectors must be positive".into()));
        }
        if self.busy_retries == 0 {
            return Err(Error::Configuration("busy_retries must be at least 1".into()));
        }
        Ok(())
    }

    pub fn busy_retry_delay(&self) -> Duration {
        Duration::from_millis(self.busy_retry_delay_ms)
    }
}
