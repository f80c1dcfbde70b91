//! Disk Space Allocator
//!
//! Owns the sector-range bookkeeping of one disk. The segment list always
//! tiles `[0, sectors)` without gaps or overlaps. The allocator is built
//! either from a host scan (existing partitions become busy segments) or
//! from a blank geometry for pure size planning, and hands out new
//! partitions first-fit.

use super::segment::{DiskGeometry, Partition, Segment, SegmentKind};
use crate::domain::ports::CommandExecutorRef;
use crate::error::{Error, Result};
use crate::hardware::discovery::partition_table::{DiskScan, PartitionTableScanner};
use tracing::{debug, info};

// =============================================================================
// Disk Space Allocator
// =============================================================================

/// Segment bookkeeping for one disk
#[derive(Debug, Clone)]
pub struct DiskSpaceAllocator {
    /// Device path the layout belongs to
    device: String,
    /// Disk geometry
    geometry: DiskGeometry,
    /// Ordered, tiling segment list
    segments: Vec<Segment>,
}

impl DiskSpaceAllocator {
    /// Layout of a disk without partitions
    pub fn empty(device: impl Into<String>, geometry: DiskGeometry) -> Self {
        let mut allocator = Self::unaligned(device.into(), geometry);
        allocator.split_alignment();
        allocator
    }

    /// Reconstruct the layout from a completed partition table scan
    pub fn from_scan(scan: &DiskScan) -> Result<Self> {
        let mut allocator = Self::unaligned(scan.device.clone(), scan.geometry.clone());

        for discovered in &scan.partitions {
            allocator.register(discovered.partition.clone())?;
        }

        allocator.split_alignment();
        debug!(
            "Reconstructed {} with {} segments",
            allocator.device,
            allocator.segments.len()
        );
        Ok(allocator)
    }

    /// Scan a device with the host partition tools and reconstruct its layout
    pub async fn scan(executor: CommandExecutorRef, device: &str) -> Result<Self> {
        let scan = PartitionTableScanner::new(executor).scan(device).await?;
        info!(
            "Scanned {}: {} sectors, {} partitions",
            device,
            scan.geometry.sectors,
            scan.partitions.len()
        );
        Self::from_scan(&scan)
    }

    /// Head and tail reserved, everything else free
    fn unaligned(device: String, geometry: DiskGeometry) -> Self {
        let sectors = geometry.sectors;
        let usable_begin = geometry.first_usable.min(sectors);
        let usable_end = (geometry.last_usable + 1).clamp(usable_begin, sectors);

        let segments = [
            Segment::new(0, usable_begin, SegmentKind::Reserved),
            Segment::new(usable_begin, usable_end, SegmentKind::Free),
            Segment::new(usable_end, sectors, SegmentKind::Reserved),
        ]
        .into_iter()
        .filter(|segment| !segment.is_empty())
        .collect();

        Self {
            device,
            geometry,
            segments,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn geometry(&self) -> &DiskGeometry {
        &self.geometry
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Partitions in ascending sector order
    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.segments.iter().filter_map(Segment::partition)
    }

    /// Length of the largest free segment in sectors
    pub fn largest_free(&self) -> u64 {
        self.segments
            .iter()
            .filter(|segment| segment.is_free())
            .map(Segment::len)
            .max()
            .unwrap_or(0)
    }

    /// Allocate a new partition of at least `size_bytes`, first fit
    pub fn allocate(&mut self, size_bytes: u64) -> Result<Partition> {
        let sectors = self.geometry.sectors_for(size_bytes);
        if sectors == 0 {
            return Err(Error::AllocationFailed {
                device: self.device.clone(),
                requested_sectors: 0,
                largest_free: self.largest_free(),
            });
        }

        let position = self
            .segments
            .iter()
            .position(|segment| segment.is_free() && segment.len() >= sectors)
            .ok_or_else(|| Error::AllocationFailed {
                device: self.device.clone(),
                requested_sectors: sectors,
                largest_free: self.largest_free(),
            })?;

        let free = &self.segments[position];
        let partition = Partition::spanning(free.begin, free.begin + sectors);

        let mut replacement = vec![Segment::new(
            partition.begin,
            partition.end,
            SegmentKind::Busy(partition.clone()),
        )];
        if partition.end < free.end {
            replacement.push(Segment::new(partition.end, free.end, SegmentKind::Free));
        }
        self.segments.splice(position..=position, replacement);
        self.split_alignment();

        debug!(
            "Allocated sectors [{}, {}) on {}",
            partition.begin, partition.end, self.device
        );
        debug_assert!(self.check_tiling().is_ok());
        Ok(partition)
    }

    /// Mark an existing partition's range busy
    ///
    /// The range must lie within one free or alignment segment. On failure
    /// the segment list is left untouched.
    pub fn register(&mut self, partition: Partition) -> Result<()> {
        if partition.begin >= partition.end || partition.end > self.geometry.sectors {
            return Err(self.invariant(format!(
                "partition range [{}, {}) outside disk of {} sectors",
                partition.begin, partition.end, self.geometry.sectors
            )));
        }

        let position = self
            .segments
            .iter()
            .position(|segment| segment.contains(partition.begin, partition.end))
            .ok_or_else(|| {
                self.invariant(format!(
                    "partition range [{}, {}) spans several segments",
                    partition.begin, partition.end
                ))
            })?;

        let target = &self.segments[position];
        if !matches!(target.kind, SegmentKind::Free | SegmentKind::Align) {
            return Err(self.invariant(format!(
                "partition range [{}, {}) overlaps a {} segment",
                partition.begin,
                partition.end,
                if target.partition().is_some() { "busy" } else { "reserved" }
            )));
        }

        let mut replacement = Vec::with_capacity(3);
        if target.begin < partition.begin {
            replacement.push(Segment::new(target.begin, partition.begin, target.kind.clone()));
        }
        if partition.end < target.end {
            replacement.push(Segment::new(partition.end, target.end, target.kind.clone()));
        }
        replacement.insert(
            usize::from(target.begin < partition.begin),
            Segment::new(partition.begin, partition.end, SegmentKind::Busy(partition)),
        );

        self.segments.splice(position..=position, replacement);
        Ok(())
    }

    /// Split the misaligned head off every free segment
    fn split_alignment(&mut self) {
        let alignment = self.geometry.alignment.max(1);
        let mut aligned = Vec::with_capacity(self.segments.len() + 2);

        for segment in self.segments.drain(..) {
            if !segment.is_free() || segment.begin % alignment == 0 {
                aligned.push(segment);
                continue;
            }

            let boundary = segment.begin.div_ceil(alignment) * alignment;
            if boundary >= segment.end {
                aligned.push(Segment::new(segment.begin, segment.end, SegmentKind::Align));
            } else {
                aligned.push(Segment::new(segment.begin, boundary, SegmentKind::Align));
                aligned.push(Segment::new(boundary, segment.end, SegmentKind::Free));
            }
        }

        self.segments = aligned;
    }

    /// Verify the segment list tiles the whole disk
    pub fn check_tiling(&self) -> Result<()> {
        let mut cursor = 0;
        for segment in &self.segments {
            if segment.begin != cursor {
                return Err(self.invariant(format!(
                    "segment starts at {} but previous ended at {}",
                    segment.begin, cursor
                )));
            }
            if segment.is_empty() {
                return Err(self.invariant(format!("empty segment at {}", segment.begin)));
            }
            cursor = segment.end;
        }

        if cursor != self.geometry.sectors {
            return Err(self.invariant(format!(
                "segments end at {} but disk has {} sectors",
                cursor, self.geometry.sectors
            )));
        }
        Ok(())
    }

    fn invariant(&self, reason: String) -> Error {
        Error::SegmentInvariant {
            device: self.device.clone(),
            reason,
        }
    }
}
