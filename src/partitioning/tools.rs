//! Host Tools
//!
//! Thin wrappers over the partitioning, MD, LVM, filesystem and udev tools.
//! Partition table mutations retry while the kernel reports the device as
//! busy; everything else fails on the first non-zero exit.

use crate::config::PlannerConfig;
use crate::domain::ports::{command_line, CommandExecutorRef};
use crate::domain::size::MIB;
use crate::error::{Error, Result};
use crate::hardware::discovery::partition_table::PartitionTableScanner;
use tracing::{debug, info, warn};

const BUSY_MARKER: &str = "device or resource busy";

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|arg| arg.to_string()).collect()
}

/// Size argument in whole MiB as LVM expects it
fn mib_arg(bytes: u64) -> String {
    format!("{}m", bytes / MIB)
}

// =============================================================================
// Output Parsers
// =============================================================================

/// Array devices listed by `mdadm --detail --scan`
pub fn parse_mdadm_scan(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.trim().split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("ARRAY"), Some(device)) => Some(device.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// Member devices from `mdadm --detail --export` (`MD_DEVICE_<dev>_DEV=`)
pub fn parse_md_members(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once('=')?;
            (key.starts_with("MD_DEVICE_") && key.ends_with("_DEV")).then(|| value.to_string())
        })
        .collect()
}

/// Rows of tab-separated LVM report output
pub fn parse_tabbed(output: &str) -> Vec<Vec<String>> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.split('\t').map(|col| col.trim().to_string()).collect())
        .collect()
}

// =============================================================================
// Host Tools
// =============================================================================

/// Host tool invocations used by the policy executor
pub struct HostTools {
    executor: CommandExecutorRef,
    config: PlannerConfig,
}

impl HostTools {
    pub fn new(executor: CommandExecutorRef, config: PlannerConfig) -> Self {
        Self { executor, config }
    }

    pub fn executor(&self) -> &CommandExecutorRef {
        &self.executor
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Run a read-only query
    async fn query(&self, program: &str, args: Vec<String>) -> Result<String> {
        let command = command_line(program, &args);
        debug!("Query: {}", command);
        self.executor
            .execute(program, &args)
            .await?
            .into_stdout(&command)
    }

    /// Run a state-changing command
    async fn mutate(&self, program: &str, args: Vec<String>) -> Result<String> {
        let command = command_line(program, &args);
        info!("Running: {}", command);
        self.executor
            .execute(program, &args)
            .await?
            .into_stdout(&command)
    }

    /// Run a partition table mutation, retrying while `device` is busy
    async fn mutate_retrying(
        &self,
        device: &str,
        program: &str,
        args: Vec<String>,
    ) -> Result<String> {
        let command = command_line(program, &args);
        let attempts = self.config.busy_retries;

        for attempt in 1..=attempts {
            info!("Running: {} (attempt {}/{})", command, attempt, attempts);
            let output = self.executor.execute(program, &args).await?;
            if output.success() {
                return Ok(output.stdout);
            }

            if !output.stderr.to_ascii_lowercase().contains(BUSY_MARKER) {
                return output.into_stdout(&command);
            }

            warn!("{} busy during '{}'", device, command);
            if attempt < attempts {
                tokio::time::sleep(self.config.busy_retry_delay()).await;
            }
        }

        Err(Error::DeviceBusy {
            device: device.to_string(),
            command,
            attempts,
        })
    }

    // =========================================================================
    // Partition Tables
    // =========================================================================

    pub async fn make_label(&self, disk: &str, label: &str) -> Result<()> {
        self.mutate_retrying(disk, "parted", args(&["-s", disk, "mklabel", label]))
            .await?;
        Ok(())
    }

    /// Create a partition over sectors `[begin, last]`
    pub async fn make_partition(&self, disk: &str, begin: u64, last: u64) -> Result<()> {
        let (begin, last) = (begin.to_string(), last.to_string());
        self.mutate_retrying(
            disk,
            "parted",
            args(&["-a", "optimal", "-s", disk, "unit", "s", "mkpart", "primary", &begin, &last]),
        )
        .await?;
        Ok(())
    }

    pub async fn set_flag(&self, disk: &str, index: u32, flag: &str) -> Result<()> {
        let index = index.to_string();
        self.mutate_retrying(disk, "parted", args(&["-s", disk, "set", &index, flag, "on"]))
            .await?;
        Ok(())
    }

    pub async fn set_type_guid(&self, disk: &str, index: u32, guid: &str) -> Result<()> {
        let typecode = format!("--typecode={}:{}", index, guid);
        self.mutate_retrying(disk, "sgdisk", vec![typecode, disk.to_string()])
            .await?;
        Ok(())
    }

    /// Zero `sectors` sectors of `disk` starting at `begin`
    pub async fn wipe(&self, disk: &str, sector_size: u64, begin: u64, sectors: u64) -> Result<()> {
        if sectors == 0 {
            return Ok(());
        }
        self.mutate(
            "dd",
            vec![
                "if=/dev/zero".to_string(),
                format!("of={}", disk),
                format!("bs={}", sector_size),
                format!("seek={}", begin),
                format!("count={}", sectors),
                "oflag=direct".to_string(),
                "conv=notrunc".to_string(),
            ],
        )
        .await?;
        Ok(())
    }

    /// Capacity of a disk in bytes
    pub async fn capacity(&self, disk: &str) -> Result<u64> {
        PartitionTableScanner::new(self.executor.clone())
            .capacity_bytes(disk)
            .await
    }

    // =========================================================================
    // udev
    // =========================================================================

    pub async fn udev_settle(&self) -> Result<()> {
        self.mutate("udevadm", args(&["settle"])).await?;
        Ok(())
    }

    pub async fn udev_trigger(&self) -> Result<()> {
        self.mutate("udevadm", args(&["trigger"])).await?;
        Ok(())
    }

    pub async fn udev_reload(&self) -> Result<()> {
        self.mutate("udevadm", args(&["control", "--reload-rules"])).await?;
        Ok(())
    }

    // =========================================================================
    // MD
    // =========================================================================

    pub async fn md_arrays(&self) -> Result<Vec<String>> {
        let output = self.query("mdadm", args(&["--detail", "--scan"])).await?;
        Ok(parse_mdadm_scan(&output))
    }

    pub async fn md_members(&self, md: &str) -> Result<Vec<String>> {
        let output = self.query("mdadm", args(&["--detail", "--export", md])).await?;
        Ok(parse_md_members(&output))
    }

    pub async fn md_stop(&self, md: &str) -> Result<()> {
        self.mutate("mdadm", args(&["--stop", md])).await?;
        Ok(())
    }

    pub async fn md_remove(&self, md: &str) -> Result<()> {
        self.mutate("mdadm", args(&["--remove", md])).await?;
        Ok(())
    }

    pub async fn md_zero_superblock(&self, device: &str) -> Result<()> {
        self.mutate("mdadm", args(&["--zero-superblock", "--force", device]))
            .await?;
        Ok(())
    }

    pub async fn md_create(&self, name: &str, level: &str, devices: &[String]) -> Result<()> {
        let mut command = args(&["--create", "--run", "--force", name]);
        command.push(format!("--level={}", level));
        command.push(format!("--raid-devices={}", devices.len()));
        command.extend(devices.iter().cloned());
        self.mutate("mdadm", command).await?;
        Ok(())
    }

    // =========================================================================
    // LVM
    // =========================================================================

    /// `(vg, lv)` pairs present on the host
    pub async fn lvs(&self) -> Result<Vec<(String, String)>> {
        let output = self
            .query(
                "lvs",
                args(&["--noheadings", "-o", "vg_name,lv_name", "--separator", "\t"]),
            )
            .await?;
        Ok(parse_tabbed(&output)
            .into_iter()
            .filter_map(|row| match row.as_slice() {
                [vg, lv, ..] => Some((vg.clone(), lv.clone())),
                _ => None,
            })
            .collect())
    }

    pub async fn vgs(&self) -> Result<Vec<String>> {
        let output = self
            .query("vgs", args(&["--noheadings", "-o", "vg_name"]))
            .await?;
        Ok(parse_tabbed(&output).into_iter().filter_map(|row| row.into_iter().next()).collect())
    }

    pub async fn pvs(&self) -> Result<Vec<String>> {
        let output = self
            .query("pvs", args(&["--noheadings", "-o", "pv_name"]))
            .await?;
        Ok(parse_tabbed(&output).into_iter().filter_map(|row| row.into_iter().next()).collect())
    }

    pub async fn lv_remove(&self, vg: &str, lv: &str) -> Result<()> {
        self.mutate("lvremove", vec!["-ff".to_string(), format!("{}/{}", vg, lv)])
            .await?;
        Ok(())
    }

    pub async fn vg_remove(&self, vg: &str) -> Result<()> {
        self.mutate("vgremove", args(&["-ff", vg])).await?;
        Ok(())
    }

    pub async fn pv_remove(&self, pv: &str) -> Result<()> {
        self.mutate("pvremove", args(&["-ff", "-y", pv])).await?;
        Ok(())
    }

    pub async fn pv_create(&self, pv: &str, metadatasize: Option<u64>) -> Result<()> {
        let mut command = args(&["-ff", "-y"]);
        if let Some(size) = metadatasize {
            command.push("--metadatasize".to_string());
            command.push(mib_arg(size));
        }
        command.push(pv.to_string());
        self.mutate("pvcreate", command).await?;
        Ok(())
    }

    pub async fn vg_create(&self, vg: &str, pvs: &[String]) -> Result<()> {
        let mut command = args(&["-f", vg]);
        command.extend(pvs.iter().cloned());
        self.mutate("vgcreate", command).await?;
        Ok(())
    }

    pub async fn lv_create(&self, vg: &str, lv: &str, size: u64) -> Result<()> {
        self.mutate("lvcreate", args(&["--yes", "-L", &mib_arg(size), "-n", lv, vg]))
            .await?;
        Ok(())
    }

    // =========================================================================
    // Filesystems
    // =========================================================================

    /// Create a filesystem, overwriting any existing signature
    pub async fn make_fs(&self, fs_type: &str, device: &str, options: &str) -> Result<()> {
        let (program, force) = match fs_type {
            "swap" => ("mkswap".to_string(), Some("-f")),
            "xfs" => ("mkfs.xfs".to_string(), Some("-f")),
            "ext2" | "ext3" | "ext4" => (format!("mkfs.{}", fs_type), Some("-F")),
            "vfat" => ("mkfs.vfat".to_string(), None),
            other => (format!("mkfs.{}", other), None),
        };

        let mut command: Vec<String> = force.into_iter().map(str::to_string).collect();
        command.extend(options.split_whitespace().map(str::to_string));
        command.push(device.to_string());
        self.mutate(&program, command).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::CommandOutput;
    use crate::testing::FakeExecutor;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn tools(executor: Arc<FakeExecutor>, retries: u32) -> HostTools {
        let config = PlannerConfig {
            busy_retries: retries,
            busy_retry_delay_ms: 1,
            ..Default::default()
        };
        HostTools::new(executor, config)
    }

    fn busy() -> CommandOutput {
        CommandOutput {
            status: 1,
            stdout: String::new(),
            stderr: "Error: Partition(s) on /dev/sda are being used.\nDevice or resource busy\n"
                .to_string(),
        }
    }

    #[test]
    fn test_parse_mdadm_scan() {
        let output = "ARRAY /dev/md0 metadata=1.2 name=node:0 UUID=a:b:c:d\n\
                      ARRAY /dev/md/home metadata=1.2 UUID=e:f:g:h\n";
        assert_eq!(parse_mdadm_scan(output), vec!["/dev/md0", "/dev/md/home"]);
    }

    #[test]
    fn test_parse_md_members() {
        let output = "MD_LEVEL=raid1\nMD_DEVICES=2\nMD_DEVICE_sda3_ROLE=0\n\
                      MD_DEVICE_sda3_DEV=/dev/sda3\nMD_DEVICE_sdb3_ROLE=1\nMD_DEVICE_sdb3_DEV=/dev/sdb3\n";
        assert_eq!(parse_md_members(output), vec!["/dev/sda3", "/dev/sdb3"]);
    }

    #[test]
    fn test_parse_tabbed() {
        let rows = parse_tabbed("  os\troot\n  os\tswap\n\n");
        assert_eq!(rows, vec![vec!["os", "root"], vec!["os", "swap"]]);
    }

    #[tokio::test]
    async fn test_busy_retry_recovers() {
        let executor = Arc::new(FakeExecutor::new());
        executor.push("parted -s /dev/sda mklabel gpt", busy());
        executor.push("parted -s /dev/sda mklabel gpt", busy());
        executor.respond("parted -s /dev/sda mklabel gpt", "");

        tools(executor.clone(), 5).make_label("/dev/sda", "gpt").await.unwrap();
        assert_eq!(executor.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_busy_retry_exhausted() {
        let executor = Arc::new(FakeExecutor::new());
        executor.push("parted -s /dev/sda set 1 bios_grub on", busy());

        let result = tools(executor.clone(), 3).set_flag("/dev/sda", 1, "bios_grub").await;

        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert_matches!(err, Error::DeviceBusy { attempts: 3, .. });
        assert_eq!(executor.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_other_failures_not_retried() {
        let executor = Arc::new(FakeExecutor::new());
        executor.fail("parted -s /dev/sda mklabel gpt", 1, "Error: unrecognised disk label");

        let result = tools(executor.clone(), 5).make_label("/dev/sda", "gpt").await;

        assert_matches!(result, Err(Error::CommandFailed { status: 1, .. }));
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_command_lines() {
        let executor = Arc::new(FakeExecutor::new());
        let tools = tools(executor.clone(), 1);

        tools.make_partition("/dev/sda", 2048, 51199).await.unwrap();
        tools.set_type_guid("/dev/sda", 1, "21686148-6449-6E6F-744E-656564454649").await.unwrap();
        tools.pv_create("/dev/sda5", Some(64 * MIB)).await.unwrap();
        tools.lv_create("os", "root", 5468 * MIB).await.unwrap();
        tools.make_fs("ext4", "/dev/sda3", "-b 4096").await.unwrap();
        tools.make_fs("swap", "/dev/mapper/os-swap", "").await.unwrap();

        assert_eq!(
            executor.calls(),
            vec![
                "parted -a optimal -s /dev/sda unit s mkpart primary 2048 51199",
                "sgdisk --typecode=1:21686148-6449-6E6F-744E-656564454649 /dev/sda",
                "pvcreate -ff -y --metadatasize 64m /dev/sda5",
                "lvcreate --yes -L 5468m -n root os",
                "mkfs.ext4 -F -b 4096 /dev/sda3",
                "mkswap -f /dev/mapper/os-swap",
            ]
        );
    }
}
