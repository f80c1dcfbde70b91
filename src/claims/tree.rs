//! Storage Claim Tree
//!
//! Arena-backed tree of declared storage requests. Nodes own their children
//! by id and keep a non-owning parent id. Disks own partitions, PVs and MD
//! members (all of which become GPT partitions); volume groups own their
//! LVs and reference their PVs; MD arrays reference their members.

use crate::domain::gpt;
use crate::domain::ports::InventoryRecord;
use crate::domain::size::SpaceClaim;
use crate::hardware::discovery::identity::DevIdnr;
use crate::hardware::discovery::partition_table::partition_device;
use serde::Serialize;
use std::fmt;

// =============================================================================
// Identifiers
// =============================================================================

/// Index of a node in the claim arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClaimId(usize);

impl ClaimId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// Filesystem attributes of a filesystem-bearing claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilesystemAttrs {
    pub mount: Option<String>,
    pub fs_type: Option<String>,
    pub mount_options: String,
    /// Options passed to mkfs
    pub fs_options: String,
    pub fstab_enabled: bool,
    /// Preserve existing data
    pub keep_data: bool,
    /// Owning OS ids
    pub os_ids: Vec<u32>,
}

impl Default for FilesystemAttrs {
    fn default() -> Self {
        Self {
            mount: None,
            fs_type: None,
            mount_options: "defaults".to_string(),
            fs_options: String::new(),
            fstab_enabled: true,
            keep_data: false,
            os_ids: Vec::new(),
        }
    }
}

impl FilesystemAttrs {
    /// Carries a filesystem that has to exist on the device
    pub fn is_bearing(&self) -> bool {
        self.fs_type.is_some()
    }
}

/// Symbolic size and its resolution
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sizing {
    pub claim: SpaceClaim,
    pub resolved: Option<u64>,
}

impl Sizing {
    pub fn new(claim: SpaceClaim) -> Self {
        Self {
            claim,
            resolved: None,
        }
    }
}

pub trait HasSize {
    fn sizing(&self) -> &Sizing;
    fn sizing_mut(&mut self) -> &mut Sizing;

    fn size_claim(&self) -> SpaceClaim {
        self.sizing().claim
    }

    fn resolved_size(&self) -> Option<u64> {
        self.sizing().resolved
    }
}

pub trait HasFilesystem {
    fn filesystem(&self) -> &FilesystemAttrs;
}

pub trait HasGuid {
    /// GPT type GUID of the partition backing this claim
    fn type_guid(&self) -> String;
}

// =============================================================================
// Claim Kinds
// =============================================================================

/// Physical disk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskClaim {
    pub idnr: DevIdnr,
    /// Resolved device node
    pub dev_path: String,
    #[serde(skip)]
    pub record: Option<InventoryRecord>,
    /// Declared total size in bytes
    pub size: u64,
    /// Install the bootloader on this disk
    pub bootloader: bool,
}

/// What a plain partition is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionRole {
    /// Declared by the deployment
    Declared,
    /// Bootloader metadata region added to every disk
    Service,
    /// Boot partition shared between operating systems
    Multiboot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionClaim {
    pub sizing: Sizing,
    pub role: PartitionRole,
    pub is_boot: bool,
    /// Explicit type GUID
    pub guid: Option<String>,
    pub fs: FilesystemAttrs,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VgClaim {
    pub id: String,
    pub label: Option<String>,
    /// Allocation hint in bytes
    pub min_size: Option<u64>,
    /// PV claims feeding this group
    pub pvs: Vec<ClaimId>,
    /// Usable capacity once PVs are resolved
    pub capacity: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LvClaim {
    pub name: String,
    pub sizing: Sizing,
    pub fs: FilesystemAttrs,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PvClaim {
    /// Target volume group id
    pub vg: String,
    pub sizing: Sizing,
    /// Metadata area reserved on this PV
    pub meta_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MdRaidClaim {
    /// Array device (e.g., /dev/md0)
    pub name: String,
    pub level: String,
    pub fs: FilesystemAttrs,
    /// Member claims, one per disk
    pub members: Vec<ClaimId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MdDevClaim {
    /// Mount point shared by the members of one array
    pub mount: String,
    /// Explicit array name
    pub name: Option<String>,
    pub level: String,
    pub sizing: Sizing,
    pub fs: FilesystemAttrs,
}

/// Closed set of claim kinds
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Claim {
    Disk(DiskClaim),
    Partition(PartitionClaim),
    LvmVg(VgClaim),
    LvmLv(LvClaim),
    LvmPv(PvClaim),
    MdRaid(MdRaidClaim),
    MdDev(MdDevClaim),
}

impl HasSize for PartitionClaim {
    fn sizing(&self) -> &Sizing {
        &self.sizing
    }
    fn sizing_mut(&mut self) -> &mut Sizing {
        &mut self.sizing
    }
}

impl HasSize for LvClaim {
    fn sizing(&self) -> &Sizing {
        &self.sizing
    }
    fn sizing_mut(&mut self) -> &mut Sizing {
        &mut self.sizing
    }
}

impl HasSize for PvClaim {
    fn sizing(&self) -> &Sizing {
        &self.sizing
    }
    fn sizing_mut(&mut self) -> &mut Sizing {
        &mut self.sizing
    }
}

impl HasSize for MdDevClaim {
    fn sizing(&self) -> &Sizing {
        &self.sizing
    }
    fn sizing_mut(&mut self) -> &mut Sizing {
        &mut self.sizing
    }
}

impl HasFilesystem for PartitionClaim {
    fn filesystem(&self) -> &FilesystemAttrs {
        &self.fs
    }
}

impl HasFilesystem for LvClaim {
    fn filesystem(&self) -> &FilesystemAttrs {
        &self.fs
    }
}

impl HasFilesystem for MdRaidClaim {
    fn filesystem(&self) -> &FilesystemAttrs {
        &self.fs
    }
}

impl HasGuid for PartitionClaim {
    fn type_guid(&self) -> String {
        if let Some(guid) = &self.guid {
            return guid.to_ascii_uppercase();
        }
        match self.role {
            PartitionRole::Service => gpt::BIOS_BOOT_GUID.to_string(),
            _ if self.is_boot && self.fs.fs_type.as_deref() == Some("vfat") => {
                gpt::EFI_SYSTEM_GUID.to_string()
            }
            _ => gpt::guid_for_filesystem(self.fs.fs_type.as_deref()).to_string(),
        }
    }
}

impl HasGuid for PvClaim {
    fn type_guid(&self) -> String {
        gpt::LVM_GUID.to_string()
    }
}

impl HasGuid for MdDevClaim {
    fn type_guid(&self) -> String {
        gpt::RAID_GUID.to_string()
    }
}

impl Claim {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Claim::Disk(_) => "disk",
            Claim::Partition(_) => "partition",
            Claim::LvmVg(_) => "vg",
            Claim::LvmLv(_) => "lv",
            Claim::LvmPv(_) => "pv",
            Claim::MdRaid(_) => "md",
            Claim::MdDev(_) => "md member",
        }
    }

    pub fn sized(&self) -> Option<&dyn HasSize> {
        match self {
            Claim::Partition(c) => Some(c),
            Claim::LvmLv(c) => Some(c),
            Claim::LvmPv(c) => Some(c),
            Claim::MdDev(c) => Some(c),
            _ => None,
        }
    }

    pub fn sized_mut(&mut self) -> Option<&mut dyn HasSize> {
        match self {
            Claim::Partition(c) => Some(c),
            Claim::LvmLv(c) => Some(c),
            Claim::LvmPv(c) => Some(c),
            Claim::MdDev(c) => Some(c),
            _ => None,
        }
    }

    pub fn filesystem(&self) -> Option<&FilesystemAttrs> {
        match self {
            Claim::Partition(c) => Some(c.filesystem()),
            Claim::LvmLv(c) => Some(c.filesystem()),
            Claim::MdRaid(c) => Some(c.filesystem()),
            _ => None,
        }
    }

    /// Type GUID when this claim becomes a GPT partition
    pub fn type_guid(&self) -> Option<String> {
        match self {
            Claim::Partition(c) => Some(c.type_guid()),
            Claim::LvmPv(c) => Some(c.type_guid()),
            Claim::MdDev(c) => Some(c.type_guid()),
            _ => None,
        }
    }
}

// =============================================================================
// Tree
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimNode {
    pub id: ClaimId,
    /// Owning node; `None` for top-level claims
    pub parent: Option<ClaimId>,
    /// Owned children in declaration order
    pub children: Vec<ClaimId>,
    pub claim: Claim,
}

/// The claim arena; top-level claims hang off an implicit storage root
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClaimTree {
    nodes: Vec<ClaimNode>,
    roots: Vec<ClaimId>,
}

impl ClaimTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a claim to `parent`'s children (or to the top level)
    pub fn add(&mut self, parent: Option<ClaimId>, claim: Claim) -> ClaimId {
        let position = match parent {
            Some(parent) => self.nodes[parent.0].children.len(),
            None => self.roots.len(),
        };
        self.insert(parent, position, claim)
    }

    /// Insert a claim at `position` among `parent`'s children
    pub fn insert(&mut self, parent: Option<ClaimId>, position: usize, claim: Claim) -> ClaimId {
        let id = ClaimId(self.nodes.len());
        self.nodes.push(ClaimNode {
            id,
            parent,
            children: Vec::new(),
            claim,
        });

        let siblings = match parent {
            Some(parent) => &mut self.nodes[parent.0].children,
            None => &mut self.roots,
        };
        siblings.insert(position.min(siblings.len()), id);
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: ClaimId) -> &ClaimNode {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: ClaimId) -> &Claim {
        &self.nodes[id.0].claim
    }

    pub fn get_mut(&mut self, id: ClaimId) -> &mut Claim {
        &mut self.nodes[id.0].claim
    }

    pub fn children(&self, id: ClaimId) -> &[ClaimId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: ClaimId) -> Option<ClaimId> {
        self.nodes[id.0].parent
    }

    pub fn roots(&self) -> &[ClaimId] {
        &self.roots
    }

    fn roots_where(&self, keep: fn(&Claim) -> bool) -> Vec<ClaimId> {
        self.roots
            .iter()
            .copied()
            .filter(|id| keep(self.get(*id)))
            .collect()
    }

    pub fn disks(&self) -> Vec<ClaimId> {
        self.roots_where(|claim| matches!(claim, Claim::Disk(_)))
    }

    pub fn vgs(&self) -> Vec<ClaimId> {
        self.roots_where(|claim| matches!(claim, Claim::LvmVg(_)))
    }

    pub fn mds(&self) -> Vec<ClaimId> {
        self.roots_where(|claim| matches!(claim, Claim::MdRaid(_)))
    }

    pub fn find_vg(&self, vg_id: &str) -> Option<ClaimId> {
        self.vgs()
            .into_iter()
            .find(|id| matches!(self.get(*id), Claim::LvmVg(vg) if vg.id == vg_id))
    }

    /// Disk owning a partition-backed claim
    pub fn disk_of(&self, id: ClaimId) -> Option<&DiskClaim> {
        match self.get(self.parent(id)?) {
            Claim::Disk(disk) => Some(disk),
            _ => None,
        }
    }

    /// 1-based partition number of a disk child
    pub fn partition_index(&self, id: ClaimId) -> Option<u32> {
        let parent = self.parent(id)?;
        if !matches!(self.get(parent), Claim::Disk(_)) {
            return None;
        }
        self.children(parent)
            .iter()
            .position(|child| *child == id)
            .map(|position| position as u32 + 1)
    }

    /// Device node the claim will be reachable at
    pub fn device_path(&self, id: ClaimId) -> Option<String> {
        match self.get(id) {
            Claim::Disk(disk) => Some(disk.dev_path.clone()),
            Claim::Partition(_) | Claim::LvmPv(_) | Claim::MdDev(_) => {
                let disk = self.disk_of(id)?;
                Some(partition_device(&disk.dev_path, self.partition_index(id)?))
            }
            Claim::LvmLv(lv) => match self.get(self.parent(id)?) {
                Claim::LvmVg(vg) => Some(mapper_path(&vg.id, &lv.name)),
                _ => None,
            },
            Claim::LvmVg(vg) => Some(format!("/dev/{}", vg.id)),
            Claim::MdRaid(md) => Some(md.name.clone()),
        }
    }

    /// Human-readable identifier for errors and logs
    pub fn describe(&self, id: ClaimId) -> String {
        match self.get(id) {
            Claim::Disk(disk) => disk.dev_path.clone(),
            Claim::LvmVg(vg) => format!("vg {}", vg.id),
            Claim::LvmLv(lv) => match self.get(self.parent(id).unwrap_or(id)) {
                Claim::LvmVg(vg) => format!("lv {}/{}", vg.id, lv.name),
                _ => format!("lv {}", lv.name),
            },
            Claim::MdRaid(md) => md.name.clone(),
            claim => format!(
                "{} {}",
                claim.kind_name(),
                self.device_path(id).unwrap_or_else(|| id.to_string())
            ),
        }
    }
}

/// Device-mapper node of a logical volume; dashes in names are doubled
pub fn mapper_path(vg: &str, lv: &str) -> String {
    format!("/dev/mapper/{}-{}", vg.replace('-', "--"), lv.replace('-', "--"))
}
