//! Partitioning Module
//!
//! Host tool wrappers, the udev blacklist bracket and the policy executor
//! that turns a storage scheme into partitions, arrays, volumes and
//! filesystems.

pub mod executor;
pub mod tools;
pub mod udev;

pub use executor::*;
pub use tools::*;
pub use udev::*;
