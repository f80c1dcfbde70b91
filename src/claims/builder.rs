//! Claim Tree Assembly
//!
//! Builds a `ClaimTree` from a `Deployment`: resolves disk identities,
//! attaches one typed claim per declared volume, links PVs to their volume
//! groups, groups RAID members into arrays and adds the implicit service
//! and multiboot partitions.

use super::tree::*;
use crate::config::PlannerConfig;
use crate::deployment::{Deployment, DiskSpec, DiskVolume, FilesystemDecl, VgSpec, VgVolume};
use crate::domain::size::SpaceClaim;
use crate::error::{Error, Result};
use crate::hardware::discovery::identity::DeviceResolver;
use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::{debug, info};

/// Mount point of the shared boot partition
pub const MULTIBOOT_MOUNT: &str = "multiboot";

/// Assembles claim trees
pub struct ClaimTreeBuilder<'a> {
    config: &'a PlannerConfig,
    resolver: &'a DeviceResolver,
}

impl<'a> ClaimTreeBuilder<'a> {
    pub fn new(config: &'a PlannerConfig, resolver: &'a DeviceResolver) -> Self {
        Self { config, resolver }
    }

    /// Assemble the tree; sizes are left unresolved
    pub async fn build(&self, deployment: &Deployment) -> Result<ClaimTree> {
        if deployment.disks().next().is_none() {
            return Err(Error::NoDisksDeclared);
        }

        let os_ids = deployment.os_ids();
        let mut tree = ClaimTree::new();

        for disk in deployment.disks() {
            self.add_disk(&mut tree, disk, &os_ids).await?;
        }

        let mut seen = HashSet::new();
        for vg in deployment.vgs() {
            if !seen.insert(vg.id.as_str()) {
                return Err(Error::DuplicateVolumeGroup { vg: vg.id.clone() });
            }
            add_vg(&mut tree, vg, &os_ids)?;
        }

        link_pvs(&mut tree)?;
        assemble_mds(&mut tree)?;
        self.augment(&mut tree, deployment.is_multiboot(), &os_ids);

        info!(
            "Built claim tree: {} disks, {} volume groups, {} arrays",
            tree.disks().len(),
            tree.vgs().len(),
            tree.mds().len()
        );
        Ok(tree)
    }

    async fn add_disk(&self, tree: &mut ClaimTree, spec: &DiskSpec, os_ids: &[u32]) -> Result<()> {
        let resolved = self.resolver.resolve(&spec.id).await?;
        let disk = tree.add(
            None,
            Claim::Disk(DiskClaim {
                idnr: spec.id.clone(),
                dev_path: resolved.dev_path,
                record: Some(resolved.record),
                size: spec.size.to_bytes()?,
                bootloader: spec.bootloader,
            }),
        );

        for volume in &spec.volumes {
            let claim = match volume {
                DiskVolume::Partition(p) => Claim::Partition(PartitionClaim {
                    sizing: Sizing::new(p.size),
                    role: PartitionRole::Declared,
                    is_boot: false,
                    guid: p.partition_guid.clone(),
                    fs: filesystem_attrs(p.filesystem(), os_ids),
                }),
                DiskVolume::Boot(b) => Claim::Partition(PartitionClaim {
                    sizing: Sizing::new(b.size),
                    role: PartitionRole::Declared,
                    is_boot: true,
                    guid: None,
                    fs: filesystem_attrs(b.filesystem(), os_ids),
                }),
                DiskVolume::Pv(pv) => Claim::LvmPv(PvClaim {
                    vg: pv.vg.clone(),
                    sizing: Sizing::new(pv.size),
                    meta_size: pv.lvm_meta_size.map(|size| size.to_bytes()).transpose()?,
                }),
                DiskVolume::Raid(raid) => Claim::MdDev(MdDevClaim {
                    mount: raid.mount.clone(),
                    name: raid.name.clone(),
                    level: raid.level.clone(),
                    sizing: Sizing::new(raid.size),
                    fs: filesystem_attrs(raid.filesystem(), os_ids),
                }),
                DiskVolume::LvmMetaPool(_) => {
                    debug!("Discarding lvm_meta_pool volume on {}", spec.id);
                    continue;
                }
            };
            tree.add(Some(disk), claim);
        }

        Ok(())
    }

    /// Prepend the service partition to every disk and the shared boot
    /// partition to the first one when several systems are deployed
    fn augment(&self, tree: &mut ClaimTree, multiboot: bool, os_ids: &[u32]) {
        for (position, disk) in tree.disks().into_iter().enumerate() {
            tree.insert(
                Some(disk),
                0,
                Claim::Partition(PartitionClaim {
                    sizing: Sizing::new(SpaceClaim::Exact(self.config.service_partition_size)),
                    role: PartitionRole::Service,
                    is_boot: false,
                    guid: None,
                    fs: FilesystemAttrs::default(),
                }),
            );

            if multiboot && position == 0 {
                tree.insert(
                    Some(disk),
                    1,
                    Claim::Partition(PartitionClaim {
                        sizing: Sizing::new(SpaceClaim::Exact(
                            self.config.multiboot_partition_size,
                        )),
                        role: PartitionRole::Multiboot,
                        is_boot: false,
                        guid: None,
                        fs: FilesystemAttrs {
                            mount: Some(MULTIBOOT_MOUNT.to_string()),
                            fs_type: Some("ext4".to_string()),
                            fstab_enabled: false,
                            os_ids: os_ids.to_vec(),
                            ..Default::default()
                        },
                    }),
                );
            }
        }
    }
}

fn filesystem_attrs(decl: FilesystemDecl, os_ids: &[u32]) -> FilesystemAttrs {
    FilesystemAttrs {
        mount: decl.mount,
        fs_type: decl.file_system,
        mount_options: decl.mount_opts,
        fs_options: decl.fs_options,
        fstab_enabled: decl.fstab_enabled,
        keep_data: decl.keep_data,
        os_ids: decl.images.unwrap_or_else(|| os_ids.to_vec()),
    }
}

fn add_vg(tree: &mut ClaimTree, spec: &VgSpec, os_ids: &[u32]) -> Result<()> {
    let vg = tree.add(
        None,
        Claim::LvmVg(VgClaim {
            id: spec.id.clone(),
            label: spec.label.clone(),
            min_size: spec.min_size.map(|size| size.to_bytes()).transpose()?,
            pvs: Vec::new(),
            capacity: None,
        }),
    );

    for volume in &spec.volumes {
        let VgVolume::Lv(lv) = volume;
        tree.add(
            Some(vg),
            Claim::LvmLv(LvClaim {
                name: lv.name.clone(),
                sizing: Sizing::new(lv.size),
                fs: filesystem_attrs(lv.filesystem(), os_ids),
            }),
        );
    }
    Ok(())
}

/// Attach every PV to the volume group it names
fn link_pvs(tree: &mut ClaimTree) -> Result<()> {
    for disk in tree.disks() {
        for child in tree.children(disk).to_vec() {
            let Claim::LvmPv(pv) = tree.get(child) else {
                continue;
            };
            let vg_name = pv.vg.clone();

            let vg = tree.find_vg(&vg_name).ok_or_else(|| Error::UndeclaredVolumeGroup {
                vg: vg_name.clone(),
                disk: tree.describe(disk),
            })?;
            if let Claim::LvmVg(vg) = tree.get_mut(vg) {
                vg.pvs.push(child);
            }
        }
    }
    Ok(())
}

/// Group RAID members by mount point into arrays
fn assemble_mds(tree: &mut ClaimTree) -> Result<()> {
    let mut groups: IndexMap<String, Vec<ClaimId>> = IndexMap::new();
    for disk in tree.disks() {
        for child in tree.children(disk) {
            if let Claim::MdDev(member) = tree.get(*child) {
                groups.entry(member.mount.clone()).or_default().push(*child);
            }
        }
    }

    let mut taken: HashSet<String> = groups
        .values()
        .flatten()
        .filter_map(|id| match tree.get(*id) {
            Claim::MdDev(member) => member.name.clone(),
            _ => None,
        })
        .collect();
    let mut next_index = 0;

    for (mount, members) in groups {
        let declared: Vec<MdDevClaim> = members
            .iter()
            .filter_map(|id| match tree.get(*id) {
                Claim::MdDev(member) => Some(member.clone()),
                _ => None,
            })
            .collect();
        let Some(merged) = merge_members(&mount, &declared)? else {
            continue;
        };

        let name = merged.name.unwrap_or_else(|| loop {
            let candidate = format!("/dev/md{}", next_index);
            next_index += 1;
            if taken.insert(candidate.clone()) {
                break candidate;
            }
        });

        debug!("Array {} on {} from {} members", name, mount, members.len());
        tree.add(
            None,
            Claim::MdRaid(MdRaidClaim {
                name,
                level: merged.level,
                fs: merged.fs,
                members,
            }),
        );
    }
    Ok(())
}

/// Fold the attributes of one array's members together
///
/// Any member may carry the array name, filesystem and its options. Two
/// members naming different values for the same attribute are rejected.
fn merge_members(mount: &str, members: &[MdDevClaim]) -> Result<Option<MdDevClaim>> {
    let Some((first, rest)) = members.split_first() else {
        return Ok(None);
    };
    let defaults = FilesystemAttrs::default();
    let mut merged = first.clone();

    for member in rest {
        if member.level != merged.level {
            return Err(conflict(mount, "level", &merged.level, &member.level));
        }
        agree(mount, "name", &mut merged.name, &member.name)?;
        agree(mount, "file_system", &mut merged.fs.fs_type, &member.fs.fs_type)?;

        if merged.fs.mount_options == defaults.mount_options {
            merged.fs.mount_options = member.fs.mount_options.clone();
        }
        if merged.fs.fs_options.is_empty() {
            merged.fs.fs_options = member.fs.fs_options.clone();
        }
        merged.fs.fstab_enabled &= member.fs.fstab_enabled;
        merged.fs.keep_data |= member.fs.keep_data;
    }
    Ok(Some(merged))
}

/// Take `other` when `value` is unset, fail when both are set and differ
fn agree(
    mount: &str,
    field: &str,
    value: &mut Option<String>,
    other: &Option<String>,
) -> Result<()> {
    match (value.as_ref(), other) {
        (Some(current), Some(other)) if current != other => {
            Err(conflict(mount, field, current, other))
        }
        (None, Some(other)) => {
            *value = Some(other.clone());
            Ok(())
        }
        _ => Ok(()),
    }
}

fn conflict(mount: &str, field: &str, first: &str, second: &str) -> Error {
    Error::RaidMemberConflict {
        mount: mount.to_string(),
        field: field.to_string(),
        first: first.to_string(),
        second: second.to_string(),
    }
}
