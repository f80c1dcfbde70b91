//! Policy Executor
//!
//! Materializes a `StorageScheme` on the host under one of the three
//! partitioning policies. Every host mutation runs strictly in sequence;
//! a failure aborts the build and is returned to the caller.

use super::tools::HostTools;
use super::udev;
use crate::config::PlannerConfig;
use crate::deployment::PartitionPolicy;
use crate::domain::ports::CommandExecutorRef;
use crate::domain::size::{mib_floor, MIB};
use crate::error::{Error, Result};
use crate::hardware::allocation::DiskSpaceAllocator;
use crate::hardware::discovery::partition_table::PartitionTableScanner;
use crate::scheme::{compare, hardware_scheme, Parted, StorageScheme};
use serde::Serialize;
use tracing::{info, warn};

/// Outcome of a successful build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub policy: PartitionPolicy,
    /// Partition tables were rewritten
    pub rebuilt: bool,
    /// Devices that received a fresh filesystem
    pub formatted: Vec<String>,
}

/// Drives host tools to build or verify a scheme
pub struct PolicyExecutor {
    tools: HostTools,
}

impl PolicyExecutor {
    pub fn new(executor: CommandExecutorRef, config: PlannerConfig) -> Self {
        Self {
            tools: HostTools::new(executor, config),
        }
    }

    fn config(&self) -> &PlannerConfig {
        self.tools.config()
    }

    /// Apply `scheme` under `policy`
    ///
    /// Filesystems mounted at one of `image_targets` are left to the image
    /// copy and never formatted here.
    pub async fn apply(
        &self,
        policy: PartitionPolicy,
        scheme: &StorageScheme,
        image_targets: &[&str],
    ) -> Result<BuildReport> {
        info!("Applying storage scheme with policy {}", policy);

        let rebuilt = match policy {
            PartitionPolicy::Verify => {
                self.verify(scheme).await?;
                false
            }
            PartitionPolicy::Clean => {
                self.check_capacity(scheme).await?;
                self.rebuild(scheme).await?;
                true
            }
            PartitionPolicy::Legacy if scheme.keeps_data() => {
                info!("Preserved filesystems declared, keeping partition tables");
                false
            }
            PartitionPolicy::Legacy => {
                self.rebuild(scheme).await?;
                true
            }
        };

        let formatted = self.make_filesystems(scheme, image_targets).await?;
        info!(
            "Storage ready: policy {}, rebuilt {}, {} filesystems created",
            policy,
            rebuilt,
            formatted.len()
        );

        Ok(BuildReport {
            policy,
            rebuilt,
            formatted,
        })
    }

    // =========================================================================
    // Verify
    // =========================================================================

    /// Fail unless the hardware carries exactly the declared partitioning
    pub async fn verify(&self, scheme: &StorageScheme) -> Result<()> {
        let scanner = PartitionTableScanner::new(self.tools.executor().clone());

        let mut scans = Vec::with_capacity(scheme.parteds.len());
        for parted in &scheme.parteds {
            let scan = scanner.scan(&parted.name).await?;
            info!(
                "Scanned {} at {}: {} partitions",
                scan.device,
                scan.scanned_at.to_rfc3339(),
                scan.partitions.len()
            );
            scans.push(scan);
        }

        let diff = compare(scheme, &hardware_scheme(&scans));
        if !diff.is_empty() {
            warn!("Hardware differs from declared scheme in {} places", diff.entries.len());
            return Err(Error::SchemeMismatch(diff));
        }

        info!("Hardware matches declared scheme");
        Ok(())
    }

    // =========================================================================
    // Clean
    // =========================================================================

    /// Every disk must hold its declared size, in whole MiB
    pub async fn check_capacity(&self, scheme: &StorageScheme) -> Result<()> {
        for parted in &scheme.parteds {
            let actual = mib_floor(self.tools.capacity(&parted.name).await?) * MIB;
            if parted.size > actual {
                return Err(Error::InsufficientCapacity {
                    device: parted.name.clone(),
                    declared: parted.size,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Tear everything down and rebuild partition tables, MD and LVM
    pub async fn rebuild(&self, scheme: &StorageScheme) -> Result<()> {
        self.teardown().await?;

        let blacklisted = udev::blacklist(self.config()).await?;

        // overrides come off whatever happens from here on
        let mut built = self.tools.udev_reload().await;
        if built.is_ok() {
            for parted in &scheme.parteds {
                built = self.build_table(parted).await;
                if built.is_err() {
                    break;
                }
            }
        }

        udev::unblacklist(self.config(), &blacklisted).await;
        if let Err(e) = self.tools.udev_reload().await {
            warn!("Cannot reload udev rules: {}", e);
        }
        built?;

        // new partitions may start where old ones did
        self.teardown().await?;
        self.create_layers(scheme).await
    }

    /// Stop MD arrays, then remove LVs, VGs and PVs
    pub async fn teardown(&self) -> Result<()> {
        for md in self.tools.md_arrays().await? {
            let members = self.tools.md_members(&md).await.unwrap_or_else(|e| {
                warn!("Cannot list members of {}: {}", md, e);
                Vec::new()
            });

            info!("Stopping {}", md);
            if let Err(e) = self.tools.md_stop(&md).await {
                warn!("Cannot stop {}: {}", md, e);
                continue;
            }
            if let Err(e) = self.tools.md_remove(&md).await {
                warn!("Cannot remove {}: {}", md, e);
            }
            for member in members {
                if let Err(e) = self.tools.md_zero_superblock(&member).await {
                    warn!("Cannot clear md superblock on {}: {}", member, e);
                }
            }
        }

        for (vg, lv) in self.tools.lvs().await? {
            if let Err(e) = self.tools.lv_remove(&vg, &lv).await {
                warn!("Cannot remove logical volume {}/{}: {}", vg, lv, e);
            }
        }
        for vg in self.tools.vgs().await? {
            if let Err(e) = self.tools.vg_remove(&vg).await {
                warn!("Cannot remove volume group {}: {}", vg, e);
            }
        }
        for pv in self.tools.pvs().await? {
            if let Err(e) = self.tools.pv_remove(&pv).await {
                warn!("Cannot remove physical volume {}: {}", pv, e);
            }
        }
        Ok(())
    }

    /// Label one disk and create its partitions in order
    async fn build_table(&self, parted: &Parted) -> Result<()> {
        let disk = parted.name.as_str();
        info!("Creating {} partition table on {}", parted.label, disk);
        self.tools.make_label(disk, &parted.label).await?;

        let mut allocator = DiskSpaceAllocator::scan(self.tools.executor().clone(), disk).await?;
        let sector_size = allocator.geometry().sector_size;
        let wipe = allocator
            .geometry()
            .sectors_for(self.config().wipe_size);

        for record in &parted.partitions {
            let partition = allocator.allocate(record.size)?;
            let zeroed = wipe.min(partition.sectors());

            self.tools
                .wipe(disk, sector_size, partition.begin, zeroed)
                .await?;
            self.tools
                .wipe(disk, sector_size, partition.end - zeroed, zeroed)
                .await?;

            self.tools
                .make_partition(disk, partition.begin, partition.last_sector())
                .await?;
            for flag in &record.flags {
                self.tools.set_flag(disk, record.count, flag).await?;
            }
            if let Some(guid) = &record.guid {
                self.tools.set_type_guid(disk, record.count, guid).await?;
            }

            self.tools.udev_settle().await?;
            if !self.tools.executor().block_device_exists(&record.name) {
                return Err(Error::PartitionNodeMissing {
                    device: record.name.clone(),
                });
            }
            info!(
                "Created {} at sectors [{}, {})",
                record.name, partition.begin, partition.end
            );
        }
        Ok(())
    }

    /// Create MD arrays, then PVs, VGs and LVs
    async fn create_layers(&self, scheme: &StorageScheme) -> Result<()> {
        for md in &scheme.mds {
            self.tools.md_create(&md.name, &md.level, &md.devices).await?;
        }
        if !scheme.mds.is_empty() {
            self.tools.udev_settle().await?;
        }

        for pv in &scheme.pvs {
            self.tools.pv_create(&pv.name, pv.metadatasize).await?;
        }
        for vg in &scheme.vgs {
            self.tools.vg_create(&vg.name, &vg.pvnames).await?;
        }
        for lv in &scheme.lvs {
            self.tools.lv_create(&lv.vgname, &lv.name, lv.size).await?;
        }
        if !scheme.lvs.is_empty() {
            self.tools.udev_trigger().await?;
            self.tools.udev_settle().await?;
        }
        Ok(())
    }

    // =========================================================================
    // Filesystems
    // =========================================================================

    /// Format every filesystem that is neither preserved nor an image target
    async fn make_filesystems(
        &self,
        scheme: &StorageScheme,
        image_targets: &[&str],
    ) -> Result<Vec<String>> {
        let mut formatted = Vec::new();

        for fs in &scheme.fss {
            if fs.keep_data {
                info!("Keeping data on {} ({})", fs.device, fs.mount);
                continue;
            }
            if image_targets.contains(&fs.mount.as_str()) {
                continue;
            }

            info!("Creating {} on {}", fs.fs_type, fs.device);
            self.tools
                .make_fs(&fs.fs_type, &fs.device, &fs.fs_options)
                .await?;
            formatted.push(fs.device.clone());
        }
        Ok(formatted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::gpt;
    use crate::domain::ports::CommandOutput;
    use crate::scheme::{FsRecord, PartitionRecord};
    use crate::testing::{script_sda, FakeExecutor, SDA_BLANK_PRINT};
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> PlannerConfig {
        PlannerConfig {
            udev_rules_dir: tmp.path().join("etc"),
            udev_rules_lib_dir: tmp.path().join("lib"),
            busy_retries: 3,
            busy_retry_delay_ms: 1,
            ..Default::default()
        }
    }

    /// The layout `SDA_PRINT` describes
    fn scheme(keep_root: bool) -> StorageScheme {
        let partition = |count: u32, begin: u64, size: u64, guid: &str, flags: &[&str]| {
            PartitionRecord {
                name: format!("/dev/sda{}", count),
                count,
                device: "/dev/sda".to_string(),
                size,
                begin,
                end: begin + size,
                guid: Some(guid.to_string()),
                flags: flags.iter().map(|f| f.to_string()).collect(),
                keep_data: false,
            }
        };
        StorageScheme {
            parteds: vec![Parted {
                name: "/dev/sda".to_string(),
                label: "gpt".to_string(),
                install_bootloader: true,
                size: 10 * MIB,
                partitions: vec![
                    partition(1, MIB, MIB, gpt::BIOS_BOOT_GUID, &["bios_grub"]),
                    partition(2, 2 * MIB, 3 * MIB, gpt::LINUX_FS_GUID, &[]),
                ],
            }],
            fss: vec![FsRecord {
                device: "/dev/sda2".to_string(),
                mount: "/".to_string(),
                fs_type: "ext4".to_string(),
                fstab_options: "defaults".to_string(),
                fstab_enabled: true,
                keep_data: keep_root,
                os_ids: vec![1],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn rebuild_host(capacity: u64) -> Arc<FakeExecutor> {
        let executor = FakeExecutor::new();
        executor.respond("blockdev --getsize64 /dev/sda", &format!("{}\n", capacity));
        executor.respond("sgdisk --print /dev/sda", SDA_BLANK_PRINT);
        Arc::new(executor)
    }

    #[tokio::test]
    async fn test_verify_match_only_formats() {
        let tmp = TempDir::new().unwrap();
        let executor = FakeExecutor::new();
        script_sda(&executor, "3145728");
        let executor = Arc::new(executor);

        let report = PolicyExecutor::new(executor.clone(), config(&tmp))
            .apply(PartitionPolicy::Verify, &scheme(false), &[])
            .await
            .unwrap();

        assert!(!report.rebuilt);
        assert_eq!(report.formatted, vec!["/dev/sda2"]);
        assert_eq!(executor.mutations(), vec!["mkfs.ext4 -F /dev/sda2"]);
    }

    #[tokio::test]
    async fn test_verify_preserved_has_no_mutations() {
        let tmp = TempDir::new().unwrap();
        let executor = FakeExecutor::new();
        script_sda(&executor, "3145728");
        let executor = Arc::new(executor);

        let report = PolicyExecutor::new(executor.clone(), config(&tmp))
            .apply(PartitionPolicy::Verify, &scheme(true), &[])
            .await
            .unwrap();

        assert!(report.formatted.is_empty());
        assert!(executor.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_verify_mismatch_names_partition() {
        let tmp = TempDir::new().unwrap();
        let executor = FakeExecutor::new();
        script_sda(&executor, "3145728");
        let executor = Arc::new(executor);

        let mut declared = scheme(false);
        declared.parteds[0].partitions.pop();
        declared.fss.clear();

        let result = PolicyExecutor::new(executor.clone(), config(&tmp))
            .apply(PartitionPolicy::Verify, &declared, &[])
            .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("/dev/sda2"));
        assert_matches!(err, Error::SchemeMismatch(diff) if diff.entries.len() == 1);
        assert!(executor.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_verify_rejects_different_geometry() {
        let tmp = TempDir::new().unwrap();
        let executor = FakeExecutor::new();
        script_sda(&executor, "3145728");
        let executor = Arc::new(executor);

        // same table, same types, but a much larger root partition
        let mut declared = scheme(false);
        let root = &mut declared.parteds[0].partitions[1];
        root.size = 3000 * MIB;
        root.end = root.begin + root.size;

        let result = PolicyExecutor::new(executor.clone(), config(&tmp))
            .apply(PartitionPolicy::Verify, &declared, &[])
            .await;

        let err = result.unwrap_err();
        assert_matches!(
            err,
            Error::SchemeMismatch(ref diff)
                if diff.entries.len() == 1
                    && diff.entries[0].path == "parteds[/dev/sda].partitions[/dev/sda2].end"
        );
        assert!(executor.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_clean_undersized_disk_fails_first() {
        let tmp = TempDir::new().unwrap();
        // one byte short of 10 MiB floors to 9 MiB
        let executor = rebuild_host(10 * MIB - 1);

        let result = PolicyExecutor::new(executor.clone(), config(&tmp))
            .apply(PartitionPolicy::Clean, &scheme(false), &[])
            .await;

        assert_matches!(
            result,
            Err(Error::InsufficientCapacity { declared, actual, .. })
                if declared == 10 * MIB && actual == 9 * MIB
        );
        assert!(executor.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_clean_rebuild_sequence() {
        let tmp = TempDir::new().unwrap();
        let executor = rebuild_host(10 * MIB);

        let report = PolicyExecutor::new(executor.clone(), config(&tmp))
            .apply(PartitionPolicy::Clean, &scheme(false), &["/"])
            .await
            .unwrap();

        assert!(report.rebuilt);
        assert!(report.formatted.is_empty());
        assert_eq!(
            executor.mutations(),
            vec![
                "udevadm control --reload-rules",
                "parted -s /dev/sda mklabel gpt",
                "dd if=/dev/zero of=/dev/sda bs=512 seek=2048 count=2048 oflag=direct conv=notrunc",
                "dd if=/dev/zero of=/dev/sda bs=512 seek=2048 count=2048 oflag=direct conv=notrunc",
                "parted -a optimal -s /dev/sda unit s mkpart primary 2048 4095",
                "parted -s /dev/sda set 1 bios_grub on",
                "sgdisk --typecode=1:21686148-6449-6E6F-744E-656564454649 /dev/sda",
                "udevadm settle",
                "dd if=/dev/zero of=/dev/sda bs=512 seek=4096 count=6144 oflag=direct conv=notrunc",
                "dd if=/dev/zero of=/dev/sda bs=512 seek=4096 count=6144 oflag=direct conv=notrunc",
                "parted -a optimal -s /dev/sda unit s mkpart primary 4096 10239",
                "sgdisk --typecode=2:0FC63DAF-8483-4772-8E79-3D69D8477DE4 /dev/sda",
                "udevadm settle",
                "udevadm control --reload-rules",
            ]
        );
        assert!(tmp.path().join("etc").join("empty_rule").exists());
    }

    #[tokio::test]
    async fn test_rebuild_retries_busy_label() {
        let tmp = TempDir::new().unwrap();
        let executor = rebuild_host(10 * MIB);
        executor.push(
            "parted -s /dev/sda mklabel gpt",
            CommandOutput {
                status: 1,
                stdout: String::new(),
                stderr: "Error: Device or resource busy".to_string(),
            },
        );
        executor.respond("parted -s /dev/sda mklabel gpt", "");

        PolicyExecutor::new(executor.clone(), config(&tmp))
            .apply(PartitionPolicy::Clean, &scheme(false), &[])
            .await
            .unwrap();

        let labels = executor
            .calls()
            .into_iter()
            .filter(|call| call == "parted -s /dev/sda mklabel gpt")
            .count();
        assert_eq!(labels, 2);
        assert!(executor.called("mkfs.ext4 -F /dev/sda2"));
    }

    #[tokio::test]
    async fn test_missing_node_aborts_and_restores_udev() {
        let tmp = TempDir::new().unwrap();
        let lib = tmp.path().join("lib");
        std::fs::create_dir_all(&lib).unwrap();
        std::fs::write(lib.join("60-persistent-storage.rules"), "").unwrap();

        let executor = rebuild_host(10 * MIB);
        executor.missing_node("/dev/sda1");

        let result = PolicyExecutor::new(executor.clone(), config(&tmp))
            .apply(PartitionPolicy::Clean, &scheme(false), &[])
            .await;

        assert_matches!(
            result,
            Err(Error::PartitionNodeMissing { device }) if device == "/dev/sda1"
        );
        assert!(!tmp.path().join("etc/60-persistent-storage.rules").exists());
        assert!(!executor.called("parted -a optimal -s /dev/sda unit s mkpart primary 4096"));
        assert!(!executor.called("mkfs"));
    }

    #[tokio::test]
    async fn test_failed_reload_restores_udev() {
        let tmp = TempDir::new().unwrap();
        let lib = tmp.path().join("lib");
        std::fs::create_dir_all(&lib).unwrap();
        std::fs::write(lib.join("60-persistent-storage.rules"), "").unwrap();

        let executor = rebuild_host(10 * MIB);
        executor.fail("udevadm control --reload-rules", 1, "boom");

        let result = PolicyExecutor::new(executor.clone(), config(&tmp))
            .apply(PartitionPolicy::Clean, &scheme(false), &[])
            .await;

        assert_matches!(result, Err(Error::CommandFailed { .. }));
        assert!(!tmp.path().join("etc/60-persistent-storage.rules").exists());
        assert!(!executor.called("parted"));
    }

    #[tokio::test]
    async fn test_teardown_order() {
        let tmp = TempDir::new().unwrap();
        let executor = FakeExecutor::new();
        executor.respond("mdadm --detail --scan", "ARRAY /dev/md0 metadata=1.2 UUID=a:b:c:d\n");
        executor.respond(
            "mdadm --detail --export /dev/md0",
            "MD_DEVICE_sda3_DEV=/dev/sda3\nMD_DEVICE_sdb2_DEV=/dev/sdb2\n",
        );
        executor.respond("lvs --noheadings -o vg_name,lv_name --separator \t", "  os\troot\n");
        executor.respond("vgs --noheadings -o vg_name", "  os\n");
        executor.respond("pvs --noheadings -o pv_name", "  /dev/sda5\n");
        // the array disappears between listing and stopping
        executor.fail("mdadm --remove /dev/md0", 1, "mdadm: error opening /dev/md0");
        let executor = Arc::new(executor);

        PolicyExecutor::new(executor.clone(), config(&tmp))
            .teardown()
            .await
            .unwrap();

        assert_eq!(
            executor.mutations(),
            vec![
                "mdadm --stop /dev/md0",
                "mdadm --remove /dev/md0",
                "mdadm --zero-superblock --force /dev/sda3",
                "mdadm --zero-superblock --force /dev/sdb2",
                "lvremove -ff os/root",
                "vgremove -ff os",
                "pvremove -ff -y /dev/sda5",
            ]
        );
    }

    #[tokio::test]
    async fn test_legacy_preserves_when_data_kept() {
        let tmp = TempDir::new().unwrap();
        let executor = rebuild_host(10 * MIB);

        let report = PolicyExecutor::new(executor.clone(), config(&tmp))
            .apply(PartitionPolicy::Legacy, &scheme(true), &[])
            .await
            .unwrap();

        assert!(!report.rebuilt);
        assert!(executor.mutations().is_empty());
        assert!(!executor.called("sgdisk --print"));
    }
}
