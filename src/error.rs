//! Error types for the storage layout planner
//!
//! Provides structured error types for every stage of a deployment:
//! input parsing, claim resolution, disk space allocation, hardware
//! verification and host tool execution.

use crate::scheme::diff::SchemeDiff;
use thiserror::Error;

/// Unified error type for the planner and executor
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Input Errors
    // =========================================================================
    #[error("Size parse error: {0}")]
    SizeParse(String),

    #[error("Invalid deployment: {0}")]
    InvalidDeployment(String),

    #[error("No disks declared in deployment")]
    NoDisksDeclared,

    #[error("More than one 'remaining' claim in {container}: {claims:?}")]
    MultipleRemainingClaims { container: String, claims: Vec<String> },

    #[error("More than one boot partition on {disk}: {claims:?}")]
    MultipleBootPartitions { disk: String, claims: Vec<String> },

    #[error("Container {container} oversubscribed: requested {requested} bytes, capacity {capacity} bytes")]
    Oversubscribed {
        container: String,
        requested: u64,
        capacity: u64,
    },

    #[error("Physical volume on {disk} references undeclared volume group {vg}")]
    UndeclaredVolumeGroup { vg: String, disk: String },

    #[error("Volume group {vg} has no physical volumes")]
    VolumeGroupWithoutPvs { vg: String },

    #[error("Duplicate volume group declaration: {vg}")]
    DuplicateVolumeGroup { vg: String },

    #[error("RAID members of {mount} disagree on {field}: {first} vs {second}")]
    RaidMemberConflict {
        mount: String,
        field: String,
        first: String,
        second: String,
    },

    // =========================================================================
    // Device Identity Errors
    // =========================================================================
    #[error("Device not found: {kind}={value}")]
    DeviceNotFound { kind: String, value: String },

    #[error("Ambiguous device reference {kind}={value}: matches {matches:?}")]
    AmbiguousDevice {
        kind: String,
        value: String,
        matches: Vec<String>,
    },

    // =========================================================================
    // Allocation Errors
    // =========================================================================
    #[error("Allocation failed on {device}: requested {requested_sectors} sectors, largest free run {largest_free} sectors")]
    AllocationFailed {
        device: String,
        requested_sectors: u64,
        largest_free: u64,
    },

    #[error("Segment invariant violated on {device}: {reason}")]
    SegmentInvariant { device: String, reason: String },

    // =========================================================================
    // Hardware Mismatch Errors
    // =========================================================================
    #[error("Partition {device} size mismatch: partition table reports {table_bytes} bytes, filesystem query reports {fs_bytes} bytes")]
    PartitionSizeMismatch {
        device: String,
        table_bytes: u64,
        fs_bytes: u64,
    },

    #[error("Declared scheme does not match hardware:\n{0}")]
    SchemeMismatch(SchemeDiff),

    // =========================================================================
    // Capacity Errors
    // =========================================================================
    #[error("Insufficient capacity on {device}: declared {declared} bytes, hardware provides {actual} bytes")]
    InsufficientCapacity {
        device: String,
        declared: u64,
        actual: u64,
    },

    // =========================================================================
    // Host Tool Errors
    // =========================================================================
    #[error("Device busy: {command} on {device} still busy after {attempts} attempts")]
    DeviceBusy {
        device: String,
        command: String,
        attempts: u32,
    },

    #[error("Command failed: {command} (exit {status}): {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("Partition device node missing after creation: {device}")]
    PartitionNodeMissing { device: String },

    #[error("Cannot parse {tool} output: {reason}")]
    HostToolParse { tool: String, reason: String },

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of errors by how a deployment should react to them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; fix the deployment document
    Input,
    /// Not enough or corrupted free space bookkeeping
    Allocation,
    /// Hardware differs from what was declared
    HardwareMismatch,
    /// Declared layout does not fit the hardware
    Capacity,
    /// Retryable condition (busy device)
    Transient,
    /// Host tool or IO failure
    Host,
}

impl Error {
    /// Determine the class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SizeParse(_)
            | Error::InvalidDeployment(_)
            | Error::NoDisksDeclared
            | Error::MultipleRemainingClaims { .. }
            | Error::MultipleBootPartitions { .. }
            | Error::Oversubscribed { .. }
            | Error::UndeclaredVolumeGroup { .. }
            | Error::VolumeGroupWithoutPvs { .. }
            | Error::DuplicateVolumeGroup { .. }
            | Error::RaidMemberConflict { .. }
            | Error::DeviceNotFound { .. }
            | Error::AmbiguousDevice { .. }
            | Error::Configuration(_)
            | Error::YamlParse(_) => ErrorKind::Input,

            Error::AllocationFailed { .. } | Error::SegmentInvariant { .. } => {
                ErrorKind::Allocation
            }

            Error::PartitionSizeMismatch { .. } | Error::SchemeMismatch(_) => {
                ErrorKind::HardwareMismatch
            }

            Error::InsufficientCapacity { .. } => ErrorKind::Capacity,

            Error::DeviceBusy { .. } => ErrorKind::Transient,

            Error::Internal(_)
            | Error::CommandFailed { .. }
            | Error::PartitionNodeMissing { .. }
            | Error::HostToolParse { .. }
            | Error::JsonParse(_)
            | Error::Io(_) => ErrorKind::Host,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }
}

/// Result type alias for the planner
pub type Result<T> = std::result::Result<T, Error>;
