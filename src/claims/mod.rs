//! Claims Module
//!
//! The declarative claim tree, its assembly from a deployment document,
//! structural validation and symbolic size resolution.

pub mod builder;
pub mod resolve;
pub mod tree;
pub mod validate;

pub use builder::*;
pub use resolve::*;
pub use tree::*;
pub use validate::*;
