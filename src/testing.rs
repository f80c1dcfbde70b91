//! Test support: a scripted command executor and captured tool outputs

use crate::domain::ports::{command_line, CommandExecutor, CommandOutput, InventoryRecord};
use crate::domain::size::MIB;
use crate::error::Result;
use crate::hardware::discovery::identity::DeviceResolver;
use crate::hardware::discovery::inventory::StaticInventory;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Commands that only read host state
const READ_ONLY: &[&str] = &[
    "sgdisk --print",
    "sgdisk --info",
    "lsblk",
    "blockdev",
    "mdadm --detail",
    "lvs",
    "vgs",
    "pvs",
    "udevadm info",
];

/// Executor answering from a script and recording every invocation
///
/// Unscripted commands succeed with empty output. When several responses
/// are queued for one command they are consumed in order and the last one
/// repeats.
#[derive(Default)]
pub struct FakeExecutor {
    responses: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    calls: Mutex<Vec<String>>,
    missing_nodes: Mutex<HashSet<String>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, command: &str, stdout: &str) {
        self.push(
            command,
            CommandOutput {
                status: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
    }

    pub fn fail(&self, command: &str, status: i32, stderr: &str) {
        self.push(
            command,
            CommandOutput {
                status,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        );
    }

    pub fn push(&self, command: &str, output: CommandOutput) {
        self.responses
            .lock()
            .entry(command.to_string())
            .or_default()
            .push_back(output);
    }

    /// Report `path` as absent from /dev
    pub fn missing_node(&self, path: &str) {
        self.missing_nodes.lock().insert(path.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Invocations that change host state
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| !READ_ONLY.iter().any(|prefix| call.starts_with(prefix)))
            .collect()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls.lock().iter().any(|call| call.starts_with(prefix))
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let line = command_line(program, args);
        self.calls.lock().push(line.clone());

        let mut responses = self.responses.lock();
        let output = match responses.get_mut(&line) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => CommandOutput::default(),
        };
        Ok(output)
    }

    fn block_device_exists(&self, path: &str) -> bool {
        !self.missing_nodes.lock().contains(path)
    }
}

/// Resolver over 20000 MiB disks with the given kernel names
pub fn static_resolver(names: &[&str]) -> DeviceResolver {
    let records = names
        .iter()
        .map(|name| InventoryRecord {
            name: name.to_string(),
            dev_path: format!("/dev/{}", name),
            size_bytes: 20_000 * MIB,
            scsi_address: None,
            by_path: Vec::new(),
            model: None,
            serial: None,
            removable: false,
        })
        .collect();
    DeviceResolver::new(Arc::new(StaticInventory::new(records)))
}

// =============================================================================
// Captured Tool Output
// =============================================================================

/// `sgdisk --print /dev/sda` for a 10 MiB disk with two partitions
pub const SDA_PRINT: &str = "\
Disk /dev/sda: 20480 sectors, 10.0 MiB
Model: QEMU HARDDISK
Sector size (logical/physical): 512/512 bytes
Disk identifier (GUID): 6F1C8A4B-2E5D-4C7B-9A3E-0D1F2A3B4C5D
Partition table holds up to 128 entries
Main partition table begins at sector 2 and ends at sector 33
First usable sector is 34, last usable sector is 20446
Partitions will be aligned on 2048-sector boundaries
Total free space is 10173 sectors (5.0 MiB)

Number  Start (sector)    End (sector)  Size       Code  Name
   1            2048            4095   1024.0 KiB  EF02  primary
   2            4096           10239   3.0 MiB     8300
";

pub const SDA1_INFO: &str = "\
Partition GUID code: 21686148-6449-6E6F-744E-656564454649 (BIOS boot partition)
Partition unique GUID: 1B2F7E9A-0000-4000-8000-000000000001
First sector: 2048 (at 1024.0 KiB)
Last sector: 4095 (at 2.0 MiB)
Partition size: 2048 sectors (1024.0 KiB)
Attribute flags: 0000000000000000
Partition name: 'primary'
";

pub const SDA2_INFO: &str = "\
Partition GUID code: 0FC63DAF-8483-4772-8E79-3D69D8477DE4 (Linux filesystem)
Partition unique GUID: 1B2F7E9A-0000-4000-8000-000000000002
First sector: 4096 (at 2.0 MiB)
Last sector: 10239 (at 5.0 MiB)
Partition size: 6144 sectors (3.0 MiB)
Attribute flags: 0000000000000000
Partition name: ''
";

/// `sgdisk --print /dev/sda` right after a fresh GPT label on the same disk
pub const SDA_BLANK_PRINT: &str = "\
Disk /dev/sda: 20480 sectors, 10.0 MiB
Model: QEMU HARDDISK
Sector size (logical/physical): 512/512 bytes
Disk identifier (GUID): 6F1C8A4B-2E5D-4C7B-9A3E-0D1F2A3B4C5D
Partition table holds up to 128 entries
Main partition table begins at sector 2 and ends at sector 33
First usable sector is 34, last usable sector is 20446
Partitions will be aligned on 2048-sector boundaries
Total free space is 20413 sectors (10.0 MiB)

Number  Start (sector)    End (sector)  Size       Code  Name
";

/// Script a full scan of `/dev/sda` as described by `SDA_PRINT`
pub fn script_sda(executor: &FakeExecutor, sda2_size: &str) {
    executor.respond("sgdisk --print /dev/sda", SDA_PRINT);
    executor.respond("sgdisk --info=1 /dev/sda", SDA1_INFO);
    executor.respond("sgdisk --info=2 /dev/sda", SDA2_INFO);
    executor.respond(
        "lsblk --bytes --nodeps --pairs --output UUID,FSTYPE,SIZE /dev/sda1",
        "UUID=\"\" FSTYPE=\"\" SIZE=\"1048576\"",
    );
    executor.respond(
        "lsblk --bytes --nodeps --pairs --output UUID,FSTYPE,SIZE /dev/sda2",
        &format!("UUID=\"abcd\" FSTYPE=\"ext4\" SIZE=\"{}\"", sda2_size),
    );
}
