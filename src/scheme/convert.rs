//! Claim-to-Scheme Converter
//!
//! Walks a size-resolved claim tree into a `StorageScheme`. Each disk's
//! partitions are placed on an empty allocator of the declared size so a
//! layout that cannot be laid out fails here instead of on the host.

use super::*;
use crate::claims::tree::{Claim, ClaimId, ClaimTree, FilesystemAttrs};
use crate::config::PlannerConfig;
use crate::domain::gpt;
use crate::error::{Error, Result};
use crate::hardware::allocation::{DiskGeometry, DiskSpaceAllocator};
use tracing::debug;

/// Convert a resolved claim tree
pub fn convert(tree: &ClaimTree, config: &PlannerConfig) -> Result<StorageScheme> {
    let mut scheme = StorageScheme::default();

    for disk in tree.disks() {
        convert_disk(tree, disk, config, &mut scheme)?;
    }
    for vg in tree.vgs() {
        convert_vg(tree, vg, &mut scheme)?;
    }
    for md in tree.mds() {
        convert_md(tree, md, &mut scheme)?;
    }

    debug!(
        "Scheme: {} tables, {} pvs, {} vgs, {} lvs, {} mds, {} filesystems",
        scheme.parteds.len(),
        scheme.pvs.len(),
        scheme.vgs.len(),
        scheme.lvs.len(),
        scheme.mds.len(),
        scheme.fss.len()
    );
    Ok(scheme)
}

fn resolved(tree: &ClaimTree, id: ClaimId) -> Result<u64> {
    tree.get(id)
        .sized()
        .and_then(|sized| sized.resolved_size())
        .ok_or_else(|| Error::Internal(format!("{} has no resolved size", tree.describe(id))))
}

fn device(tree: &ClaimTree, id: ClaimId) -> Result<String> {
    tree.device_path(id)
        .ok_or_else(|| Error::Internal(format!("{} has no device path", tree.describe(id))))
}

fn fs_record(device: String, fs: &FilesystemAttrs) -> Option<FsRecord> {
    let fs_type = fs.fs_type.clone()?;
    Some(FsRecord {
        device,
        mount: fs.mount.clone().unwrap_or_default(),
        fs_type,
        fs_options: fs.fs_options.clone(),
        fstab_options: fs.mount_options.clone(),
        fstab_enabled: fs.fstab_enabled,
        keep_data: fs.keep_data,
        os_ids: fs.os_ids.clone(),
    })
}

/// Whether the data behind a disk child must survive
fn keeps_data(tree: &ClaimTree, id: ClaimId) -> bool {
    match tree.get(id) {
        Claim::Partition(partition) => partition.fs.keep_data,
        Claim::LvmPv(pv) => tree
            .find_vg(&pv.vg)
            .is_some_and(|vg| vg_keeps_data(tree, vg)),
        Claim::MdDev(_) => tree.mds().into_iter().any(|md| match tree.get(md) {
            Claim::MdRaid(raid) => raid.members.contains(&id) && raid.fs.keep_data,
            _ => false,
        }),
        _ => false,
    }
}

fn vg_keeps_data(tree: &ClaimTree, vg: ClaimId) -> bool {
    tree.children(vg)
        .iter()
        .any(|lv| tree.get(*lv).filesystem().is_some_and(|fs| fs.keep_data))
}

fn convert_disk(
    tree: &ClaimTree,
    disk: ClaimId,
    config: &PlannerConfig,
    scheme: &mut StorageScheme,
) -> Result<()> {
    let Claim::Disk(claim) = tree.get(disk) else {
        return Err(Error::Internal(format!("{} is not a disk", disk)));
    };

    let mut allocator = DiskSpaceAllocator::empty(
        claim.dev_path.clone(),
        DiskGeometry::blank(claim.size, config),
    );

    let mut partitions = Vec::new();
    for child in tree.children(disk) {
        let size = resolved(tree, *child)?;
        let placed = allocator.allocate(size)?;
        let sector_size = allocator.geometry().sector_size;

        let node = device(tree, *child)?;
        let guid = tree.get(*child).type_guid();
        let flags = guid
            .as_deref()
            .and_then(gpt::table_flag)
            .map(|flag| vec![flag.to_string()])
            .unwrap_or_default();

        partitions.push(PartitionRecord {
            name: node.clone(),
            count: tree.partition_index(*child).unwrap_or_default(),
            device: claim.dev_path.clone(),
            size,
            begin: placed.begin * sector_size,
            end: placed.end * sector_size,
            guid,
            flags,
            keep_data: keeps_data(tree, *child),
        });

        if let Claim::Partition(partition) = tree.get(*child) {
            scheme.fss.extend(fs_record(node, &partition.fs));
        }
    }

    scheme.parteds.push(Parted {
        name: claim.dev_path.clone(),
        label: "gpt".to_string(),
        install_bootloader: claim.bootloader,
        size: claim.size,
        partitions,
    });
    Ok(())
}

fn convert_vg(tree: &ClaimTree, vg: ClaimId, scheme: &mut StorageScheme) -> Result<()> {
    let Claim::LvmVg(group) = tree.get(vg) else {
        return Err(Error::Internal(format!("{} is not a volume group", vg)));
    };
    let keep_data = vg_keeps_data(tree, vg);

    let mut pvnames = Vec::with_capacity(group.pvs.len());
    for pv in &group.pvs {
        let Claim::LvmPv(claim) = tree.get(*pv) else {
            continue;
        };
        let name = device(tree, *pv)?;
        scheme.pvs.push(PvRecord {
            name: name.clone(),
            vg: group.id.clone(),
            metadatasize: claim.meta_size,
            keep_data,
        });
        pvnames.push(name);
    }

    scheme.vgs.push(VgRecord {
        name: group.id.clone(),
        pvnames,
        keep_data,
    });

    for lv in tree.children(vg) {
        let Claim::LvmLv(claim) = tree.get(*lv) else {
            continue;
        };
        scheme.lvs.push(LvRecord {
            name: claim.name.clone(),
            vgname: group.id.clone(),
            size: resolved(tree, *lv)?,
            keep_data: claim.fs.keep_data,
        });
        scheme.fss.extend(fs_record(device(tree, *lv)?, &claim.fs));
    }
    Ok(())
}

fn convert_md(tree: &ClaimTree, md: ClaimId, scheme: &mut StorageScheme) -> Result<()> {
    let Claim::MdRaid(raid) = tree.get(md) else {
        return Err(Error::Internal(format!("{} is not an array", md)));
    };

    let devices = raid
        .members
        .iter()
        .map(|member| device(tree, *member))
        .collect::<Result<Vec<_>>>()?;

    scheme.mds.push(MdRecord {
        name: raid.name.clone(),
        level: raid.level.clone(),
        devices,
        keep_data: raid.fs.keep_data,
    });
    scheme.fss.extend(fs_record(raid.name.clone(), &raid.fs));
    Ok(())
}
