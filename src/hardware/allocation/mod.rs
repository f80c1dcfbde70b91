//! Allocation Module
//!
//! Provides sector-level segment bookkeeping and first-fit partition
//! allocation for a single disk.

pub mod allocator;
pub mod segment;

pub use allocator::*;
pub use segment::*;
