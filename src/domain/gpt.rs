//! GPT Partition Types
//!
//! Type GUIDs assigned to planned partitions and the partition table flags
//! they imply.

/// BIOS boot partition (sgdisk code EF02), holds bootloader metadata
pub const BIOS_BOOT_GUID: &str = "21686148-6449-6E6F-744E-656564454649";
/// EFI system partition (EF00)
pub const EFI_SYSTEM_GUID: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";
/// Linux LVM (8E00)
pub const LVM_GUID: &str = "E6D6D379-F507-44C2-A23C-238F2A3DF928";
/// Linux RAID (FD00)
pub const RAID_GUID: &str = "A19D880F-05FC-4D3B-A006-743F0F84911E";
/// Linux filesystem data (8300)
pub const LINUX_FS_GUID: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";
/// Linux swap (8200)
pub const SWAP_GUID: &str = "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F";

/// Partition table flag implied by a type GUID
pub fn table_flag(type_guid: &str) -> Option<&'static str> {
    let guid = type_guid.to_ascii_uppercase();
    match guid.as_str() {
        BIOS_BOOT_GUID => Some("bios_grub"),
        EFI_SYSTEM_GUID => Some("boot"),
        RAID_GUID => Some("raid"),
        LVM_GUID => Some("lvm"),
        _ => None,
    }
}

/// Default type GUID for a filesystem type
pub fn guid_for_filesystem(fs_type: Option<&str>) -> &'static str {
    match fs_type {
        Some("swap") => SWAP_GUID,
        _ => LINUX_FS_GUID,
    }
}
