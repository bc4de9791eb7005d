// SPDX-License-Identifier: GPL-3.0-only

//! Splitting kernel block device names into base disk and partition number

use std::path::Path;

use nix::unistd::{AccessFlags, access};
use vold_types::PartitionNumber;

/// Device families that put a `p` between the disk name and partition digits.
const SEPARATED_FAMILIES: &[&str] = &["mmcblk", "nvme"];

/// Split `name` unless a whole-disk node of that name exists under `sys_block`.
pub fn split_device_name(name: &str, sys_block: &Path) -> (String, PartitionNumber) {
    if access(&sys_block.join(name), AccessFlags::X_OK).is_ok() {
        return (name.to_string(), PartitionNumber::WholeDisk);
    }
    split_partition_suffix(name)
}

/// Split a partition name such as `sda1` or `mmcblk0p1` into `(base, partition)`.
///
/// Names without trailing digits, and separator-family names that lack the
/// separator (`mmcblk1`, `nvme0n1`), are returned unchanged as whole disks.
pub fn split_partition_suffix(name: &str) -> (String, PartitionNumber) {
    let whole = || (name.to_string(), PartitionNumber::WholeDisk);

    let base = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if base.len() == name.len() {
        return whole();
    }

    let Ok(index) = name[base.len()..].parse::<u32>() else {
        return whole();
    };

    if SEPARATED_FAMILIES.iter().any(|family| base.contains(family)) {
        return match base.strip_suffix('p') {
            Some(disk) if disk.ends_with(|c: char| c.is_ascii_digit()) => {
                (disk.to_string(), PartitionNumber::Index(index))
            }
            _ => whole(),
        };
    }

    (base.to_string(), PartitionNumber::Index(index))
}
