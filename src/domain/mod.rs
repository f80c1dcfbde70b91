//! Domain Module
//!
//! Core value types and collaborator ports shared by every layer.

pub mod gpt;
pub mod ports;
pub mod size;

pub use ports::*;
pub use size::*;
