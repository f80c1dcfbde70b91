//! Hardware Discovery Module
//!
//! Discovers block devices, resolves symbolic device references and reads
//! existing partition tables from the host.

pub mod identity;
pub mod inventory;
pub mod partition_table;

pub use identity::*;
pub use inventory::*;
pub use partition_table::*;
