//! Bare-Metal Storage - Layout Planner and Executor
//!
//! Turns a declarative description of disks, volume groups and images into
//! partition tables, MD arrays, LVM volumes and filesystems on a freshly
//! provisioned host.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                           Deployment Document                               │
//! │                 (disks, volume groups, images, policy)                      │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │   Claim Tree    │  │     Device      │  │      Size Resolution        │  │
//! │  │    Builder      │◄─┤    Resolver     │  │  (exact / % / remaining)    │  │
//! │  └────────┬────────┘  └─────────────────┘  └─────────────┬───────────────┘  │
//! │           └────────────────────┬─────────────────────────┘                  │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │  Converter → Scheme   │                                │
//! │                    │ (disk space allocator)│                                │
//! │                    └───────────┬───────────┘                                │
//! ├────────────────────────────────┼────────────────────────────────────────────┤
//! │                         Policy Executor                                     │
//! │  ┌─────────────────┐  ┌────────┴────────┐  ┌─────────────────────────────┐  │
//! │  │     verify      │  │      clean      │  │          legacy             │  │
//! │  │ (scan + diff)   │  │ (full rebuild)  │  │ (rebuild unless keep_data)  │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────────┘  │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │          Host Tools: parted, sgdisk, dd, mdadm, lvm, mkfs, udevadm          │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`deployment`]: Declarative input document
//! - [`claims`]: Claim tree, validation and size resolution
//! - [`scheme`]: Flat storage scheme, conversion and hardware comparison
//! - [`hardware`]: Device identity, partition table scanning, space allocation
//! - [`partitioning`]: Host tools, udev bracket and policy executor
//! - [`domain`]: Sizes, GPT vocabulary and collaborator ports
//! - [`config`]: Planner configuration
//! - [`error`]: Error types and handling

pub mod claims;
pub mod config;
pub mod deployment;
pub mod domain;
pub mod error;
pub mod hardware;
pub mod partitioning;
pub mod planner;
pub mod scheme;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use claims::{ClaimId, ClaimTree, ClaimTreeBuilder};

pub use config::PlannerConfig;

pub use deployment::{Deployment, PartitionPolicy};

pub use domain::ports::{
    CommandExecutor, CommandExecutorRef, CommandOutput, HardwareInventory,
    HardwareInventoryRef, InventoryRecord, SystemExecutor,
};
pub use domain::size::{SizeUnit, SpaceClaim, Unit};

pub use error::{Error, ErrorKind, Result};

pub use hardware::{
    DevIdnr, DevIdnrKind, DeviceResolver, DiskGeometry, DiskScan, DiskSpaceAllocator,
    HostInventory, PartitionTableScanner, Segment, SegmentKind, StaticInventory,
};

pub use partitioning::{BuildReport, HostTools, PolicyExecutor};

pub use planner::{Plan, Planner};

pub use scheme::{SchemeDiff, StorageScheme};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
