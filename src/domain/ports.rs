//! Domain Ports
//!
//! Defines the trait interfaces (ports) for the collaborators the planner
//! depends on: the host command executor that runs partitioning, LVM, MD
//! and filesystem tools, and the hardware inventory used to resolve
//! symbolic device references.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Command Execution
// =============================================================================

/// Captured result of one host tool invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status (-1 when killed by a signal)
    pub status: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Standard output of a successful run, or a `CommandFailed` error
    pub fn into_stdout(self, command: &str) -> Result<String> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(Error::CommandFailed {
                command: command.to_string(),
                status: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Render a command line for logs and errors
pub fn command_line(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Port for running host tools
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a program to completion and capture its output
    async fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// Check whether a device node is present
    fn block_device_exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }
}

/// Executor backed by real processes
#[derive(Debug, Clone, Default)]
pub struct SystemExecutor;

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!("Running {}", command_line(program, args));

        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

// =============================================================================
// Hardware Inventory
// =============================================================================

/// Inventory record for one block device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    /// Kernel name (e.g., sda, nvme0n1)
    pub name: String,
    /// Device node (e.g., /dev/sda)
    pub dev_path: String,
    /// Capacity in bytes
    pub size_bytes: u64,
    /// SCSI address as H:C:T:L
    pub scsi_address: Option<String>,
    /// by-path identifiers without the /dev/disk/by-path/ prefix
    #[serde(default)]
    pub by_path: Vec<String>,
    /// Model name
    pub model: Option<String>,
    /// Serial number
    pub serial: Option<String>,
    /// Removable media
    #[serde(default)]
    pub removable: bool,
}

/// Port for block device inventory
#[async_trait]
pub trait HardwareInventory: Send + Sync {
    /// List whole-disk block devices present on the host
    async fn block_devices(&self) -> Result<Vec<InventoryRecord>>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type CommandExecutorRef = Arc<dyn CommandExecutor>;
pub type HardwareInventoryRef = Arc<dyn HardwareInventory>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_stdout() {
        let ok = CommandOutput {
            status: 0,
            stdout: "out".into(),
            stderr: String::new(),
        };
        assert_eq!(ok.into_stdout("true").unwrap(), "out");

        let failed = CommandOutput {
            status: 2,
            stdout: String::new(),
            stderr: "boom\n".into(),
        };
        match failed.into_stdout("false") {
            Err(Error::CommandFailed { status, stderr, .. }) => {
                assert_eq!(status, 2);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_command_line() {
        assert_eq!(command_line("udevadm", &[]), "udevadm");
        assert_eq!(
            command_line("parted", &["-s".into(), "/dev/sda".into()]),
            "parted -s /dev/sda"
        );
    }
}
