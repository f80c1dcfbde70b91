//! Disk Segments
//!
//! Sector-addressed bookkeeping types for one disk. Ranges are half-open:
//! `begin` is the first sector, `end` is one past the last sector.

use crate::config::PlannerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Partition Table Label
// =============================================================================

/// Partition table format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableLabel {
    Gpt,
    Msdos,
    /// No partition table present
    None,
}

impl fmt::Display for TableLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableLabel::Gpt => write!(f, "gpt"),
            TableLabel::Msdos => write!(f, "msdos"),
            TableLabel::None => write!(f, "none"),
        }
    }
}

// =============================================================================
// Disk Geometry
// =============================================================================

/// Geometry of one disk as reported by the partition table tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskGeometry {
    /// Total logical sectors
    pub sectors: u64,
    /// Logical sector size in bytes
    pub sector_size: u64,
    /// Table format
    pub label: TableLabel,
    /// First sector usable by partitions
    pub first_usable: u64,
    /// Last sector usable by partitions (inclusive)
    pub last_usable: u64,
    /// Alignment granularity in sectors
    pub alignment: u64,
    /// Disk GUID
    pub disk_guid: Option<String>,
}

impl DiskGeometry {
    /// Geometry of a blank GPT disk of the given size
    pub fn blank(size_bytes: u64, config: &PlannerConfig) -> Self {
        let sectors = size_bytes / config.sector_size;
        Self {
            sectors,
            sector_size: config.sector_size,
            label: TableLabel::Gpt,
            first_usable: config.gpt_head_sectors.min(sectors),
            last_usable: sectors
                .saturating_sub(config.gpt_tail_sectors)
                .saturating_sub(1),
            alignment: config.alignment_sectors,
            disk_guid: None,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.sectors * self.sector_size
    }

    /// Whole sectors needed to hold `bytes`
    pub fn sectors_for(&self, bytes: u64) -> u64 {
        bytes.div_ceil(self.sector_size)
    }
}

// =============================================================================
// Partition Payload
// =============================================================================

/// A partition occupying a busy segment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Table index (1-based); unset for freshly allocated partitions
    pub index: Option<u32>,
    /// First sector
    pub begin: u64,
    /// One past the last sector
    pub end: u64,
    /// Short type code (e.g., EF02, 8E00)
    pub type_code: Option<String>,
    /// Type GUID
    pub type_guid: Option<String>,
    /// Unique partition GUID
    pub guid: Option<String>,
    /// Attribute flags as reported by the table tool
    pub attributes: Option<String>,
    /// Partition name
    pub name: Option<String>,
}

impl Partition {
    /// Bare partition covering `[begin, end)`
    pub fn spanning(begin: u64, end: u64) -> Self {
        Self {
            begin,
            end,
            ..Default::default()
        }
    }

    pub fn sectors(&self) -> u64 {
        self.end - self.begin
    }

    /// Last sector (inclusive), as partition tools print it
    pub fn last_sector(&self) -> u64 {
        self.end - 1
    }
}

// =============================================================================
// Segment
// =============================================================================

/// State of a sector range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    /// Usable and unallocated
    Free,
    /// Outside the usable table range
    Reserved,
    /// Free but shorter than one alignment unit
    Align,
    /// Occupied by a partition
    Busy(Partition),
}

/// A contiguous sector range of one disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub begin: u64,
    pub end: u64,
    pub kind: SegmentKind,
}

impl Segment {
    pub fn new(begin: u64, end: u64, kind: SegmentKind) -> Self {
        Self { begin, end, kind }
    }

    pub fn len(&self) -> u64 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub fn is_free(&self) -> bool {
        matches!(self.kind, SegmentKind::Free)
    }

    /// Whether `[begin, end)` lies entirely within this segment
    pub fn contains(&self, begin: u64, end: u64) -> bool {
        self.begin <= begin && end <= self.end
    }

    pub fn partition(&self) -> Option<&Partition> {
        match &self.kind {
            SegmentKind::Busy(partition) => Some(partition),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::size::MIB;

    #[test]
    fn test_blank_geometry() {
        let config = PlannerConfig::default();
        let geometry = DiskGeometry::blank(100 * MIB, &config);

        assert_eq!(geometry.sectors, 204800);
        assert_eq!(geometry.first_usable, 34);
        assert_eq!(geometry.last_usable, 204800 - 34);
        assert_eq!(geometry.size_bytes(), 100 * MIB);
    }

    #[test]
    fn test_sectors_for_rounds_up() {
        let geometry = DiskGeometry::blank(100 * MIB, &PlannerConfig::default());
        assert_eq!(geometry.sectors_for(512), 1);
        assert_eq!(geometry.sectors_for(513), 2);
        assert_eq!(geometry.sectors_for(MIB), 2048);
    }

    #[test]
    fn test_segment_contains() {
        let segment = Segment::new(100, 200, SegmentKind::Free);
        assert!(segment.contains(100, 200));
        assert!(segment.contains(150, 160));
        assert!(!segment.contains(99, 150));
        assert!(!segment.contains(150, 201));
        assert_eq!(segment.len(), 100);
    }
}
