//! Claim Tree Validation
//!
//! Structural checks run after assembly and before size resolution.

use super::tree::{Claim, ClaimId, ClaimTree};
use crate::error::{Error, Result};

/// Check the structural invariants of an assembled tree
pub fn validate(tree: &ClaimTree) -> Result<()> {
    let disks = tree.disks();
    if disks.is_empty() {
        return Err(Error::NoDisksDeclared);
    }

    for disk in disks {
        let children = tree.children(disk);

        let boots: Vec<String> = children
            .iter()
            .filter(|id| matches!(tree.get(**id), Claim::Partition(p) if p.is_boot))
            .map(|id| tree.describe(*id))
            .collect();
        if boots.len() > 1 {
            return Err(Error::MultipleBootPartitions {
                disk: tree.describe(disk),
                claims: boots,
            });
        }

        check_single_remaining(tree, disk)?;
    }

    for vg in tree.vgs() {
        if let Claim::LvmVg(group) = tree.get(vg) {
            if group.pvs.is_empty() {
                return Err(Error::VolumeGroupWithoutPvs {
                    vg: group.id.clone(),
                });
            }
        }
        check_single_remaining(tree, vg)?;
    }

    Ok(())
}

/// At most one `remaining` claim among a container's children
fn check_single_remaining(tree: &ClaimTree, container: ClaimId) -> Result<()> {
    let remaining: Vec<String> = tree
        .children(container)
        .iter()
        .filter(|id| {
            tree.get(**id)
                .sized()
                .is_some_and(|sized| sized.size_claim().is_biggest())
        })
        .map(|id| tree.describe(*id))
        .collect();

    if remaining.len() > 1 {
        return Err(Error::MultipleRemainingClaims {
            container: tree.describe(container),
            claims: remaining,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::tree::*;
    use crate::domain::size::{SpaceClaim, MIB};
    use crate::hardware::discovery::identity::DevIdnr;
    use assert_matches::assert_matches;

    fn disk_tree() -> (ClaimTree, ClaimId) {
        let mut tree = ClaimTree::new();
        let disk = tree.add(
            None,
            Claim::Disk(DiskClaim {
                idnr: DevIdnr::name("sda"),
                dev_path: "/dev/sda".to_string(),
                record: None,
                size: 10_000 * MIB,
                bootloader: true,
            }),
        );
        (tree, disk)
    }

    fn partition(claim: SpaceClaim, is_boot: bool) -> Claim {
        Claim::Partition(PartitionClaim {
            sizing: Sizing::new(claim),
            role: PartitionRole::Declared,
            is_boot,
            guid: None,
            fs: FilesystemAttrs::default(),
        })
    }

    #[test]
    fn test_valid_tree() {
        let (mut tree, disk) = disk_tree();
        tree.add(Some(disk), partition(SpaceClaim::Exact(MIB), true));
        tree.add(Some(disk), partition(SpaceClaim::Biggest, false));
        assert!(validate(&tree).is_ok());
    }

    #[test]
    fn test_two_remaining_on_disk() {
        let (mut tree, disk) = disk_tree();
        tree.add(Some(disk), partition(SpaceClaim::Biggest, false));
        tree.add(Some(disk), partition(SpaceClaim::Biggest, false));

        assert_matches!(
            validate(&tree),
            Err(Error::MultipleRemainingClaims { container, claims })
                if container == "/dev/sda"
                    && claims == vec!["partition /dev/sda1", "partition /dev/sda2"]
        );
    }

    #[test]
    fn test_two_boot_partitions() {
        let (mut tree, disk) = disk_tree();
        tree.add(Some(disk), partition(SpaceClaim::Exact(MIB), true));
        tree.add(Some(disk), partition(SpaceClaim::Exact(MIB), true));
        assert_matches!(validate(&tree), Err(Error::MultipleBootPartitions { .. }));
    }

    #[test]
    fn test_vg_without_pvs() {
        let (mut tree, _) = disk_tree();
        tree.add(
            None,
            Claim::LvmVg(VgClaim {
                id: "os".to_string(),
                label: None,
                min_size: None,
                pvs: Vec::new(),
                capacity: None,
            }),
        );
        assert_matches!(
            validate(&tree),
            Err(Error::VolumeGroupWithoutPvs { vg }) if vg == "os"
        );
    }

    #[test]
    fn test_empty_tree() {
        assert_matches!(validate(&ClaimTree::new()), Err(Error::NoDisksDeclared));
    }
}
