//! Size Resolution
//!
//! Turns symbolic size claims into byte counts, container by container:
//! exact claims first, then percentages of what the exact claims leave,
//! then the single `remaining` claim. Disks resolve before volume groups
//! because a group's capacity is the sum of its resolved PVs.

use super::tree::{Claim, ClaimId, ClaimTree, HasSize};
use crate::config::PlannerConfig;
use crate::domain::size::{SpaceClaim, MIB};
use crate::error::{Error, Result};
use tracing::debug;

/// Resolve the children of one container
///
/// `overhead` is deducted once from what a `remaining` claim receives.
/// Percentages are taken of `capacity - Σexact` and floored to whole MiB.
pub fn resolve_container(
    container: &str,
    capacity: u64,
    claims: &[(String, SpaceClaim)],
    overhead: u64,
) -> Result<Vec<u64>> {
    let remaining: Vec<&String> = claims
        .iter()
        .filter(|(_, claim)| claim.is_biggest())
        .map(|(label, _)| label)
        .collect();
    if remaining.len() > 1 {
        return Err(Error::MultipleRemainingClaims {
            container: container.to_string(),
            claims: remaining.into_iter().cloned().collect(),
        });
    }

    let oversubscribed = |requested: u64| Error::Oversubscribed {
        container: container.to_string(),
        requested,
        capacity,
    };

    let exact = checked_sum(claims.iter().filter_map(|(_, claim)| match claim {
        SpaceClaim::Exact(bytes) => Some(*bytes),
        _ => None,
    }))
    .ok_or_else(|| oversubscribed(u64::MAX))?;
    if exact > capacity {
        return Err(oversubscribed(exact));
    }

    let base = capacity - exact;
    let percentage_of = |percent: f64| -> u64 {
        let bytes = (base as f64 * percent / 100.0).floor() as u64;
        bytes / MIB * MIB
    };

    let percentages = checked_sum(claims.iter().filter_map(|(_, claim)| match claim {
        SpaceClaim::Percentage(percent) => Some(percentage_of(*percent)),
        _ => None,
    }));
    let fixed = percentages
        .and_then(|sum| sum.checked_add(exact))
        .ok_or_else(|| oversubscribed(u64::MAX))?;

    let leftover = if remaining.is_empty() {
        if fixed > capacity {
            return Err(oversubscribed(fixed));
        }
        0
    } else {
        let needed = fixed.checked_add(overhead).unwrap_or(u64::MAX);
        match capacity.checked_sub(needed) {
            Some(left) if left > 0 => left,
            _ => return Err(oversubscribed(needed)),
        }
    };

    Ok(claims
        .iter()
        .map(|(_, claim)| match claim {
            SpaceClaim::Exact(bytes) => *bytes,
            SpaceClaim::Percentage(percent) => percentage_of(*percent),
            SpaceClaim::Biggest => leftover,
        })
        .collect())
}

/// Sum that reports overflow instead of wrapping
fn checked_sum(values: impl IntoIterator<Item = u64>) -> Option<u64> {
    values
        .into_iter()
        .try_fold(0u64, |total, value| total.checked_add(value))
}

/// Sized children of a container with their descriptions
fn sized_children(
    tree: &ClaimTree,
    container: ClaimId,
) -> Vec<(ClaimId, String, SpaceClaim)> {
    tree.children(container)
        .iter()
        .filter_map(|id| {
            tree.get(*id)
                .sized()
                .map(|sized| (*id, tree.describe(*id), sized.size_claim()))
        })
        .collect()
}

fn resolve_children(
    tree: &mut ClaimTree,
    container: ClaimId,
    capacity: u64,
    overhead: u64,
) -> Result<()> {
    let children = sized_children(tree, container);
    let claims: Vec<(String, SpaceClaim)> = children
        .iter()
        .map(|(_, label, claim)| (label.clone(), *claim))
        .collect();

    let sizes = resolve_container(&tree.describe(container), capacity, &claims, overhead)?;
    for ((id, label, _), size) in children.into_iter().zip(sizes) {
        debug!("{} resolved to {} bytes", label, size);
        if let Some(sized) = tree.get_mut(id).sized_mut() {
            sized.sizing_mut().resolved = Some(size);
        }
    }
    Ok(())
}

/// Resolve every size claim in the tree
pub fn resolve_sizes(tree: &mut ClaimTree, config: &PlannerConfig) -> Result<()> {
    for disk in tree.disks() {
        let Claim::Disk(claim) = tree.get(disk) else {
            continue;
        };
        let capacity = claim.size;
        resolve_children(tree, disk, capacity, config.disk_overhead)?;
    }

    for vg in tree.vgs() {
        let capacity = vg_capacity(tree, vg, config)?;
        if let Claim::LvmVg(group) = tree.get_mut(vg) {
            group.capacity = Some(capacity);
        }
        resolve_children(tree, vg, capacity, 0)?;
    }

    Ok(())
}

/// Σ(PV size − PV metadata) minus the per-group metadata reserve
fn vg_capacity(tree: &ClaimTree, vg: ClaimId, config: &PlannerConfig) -> Result<u64> {
    let Claim::LvmVg(group) = tree.get(vg) else {
        return Err(Error::Internal(format!("{} is not a volume group", vg)));
    };

    let mut total: u64 = 0;
    for pv in &group.pvs {
        let Claim::LvmPv(claim) = tree.get(*pv) else {
            return Err(Error::Internal(format!("{} is not a physical volume", pv)));
        };
        let size = claim.resolved_size().ok_or_else(|| {
            Error::Internal(format!("{} used before its size was resolved", tree.describe(*pv)))
        })?;
        total = total.saturating_add(size.saturating_sub(claim.meta_size.unwrap_or(0)));
    }

    total
        .checked_sub(config.lvm_metadata_overhead)
        .ok_or_else(|| Error::Oversubscribed {
            container: tree.describe(vg),
            requested: config.lvm_metadata_overhead,
            capacity: total,
        })
}
