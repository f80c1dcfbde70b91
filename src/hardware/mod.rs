//! Hardware Module
//!
//! Provides device discovery, identity resolution and per-disk space
//! allocation.

pub mod allocation;
pub mod discovery;

pub use allocation::*;
pub use discovery::*;
