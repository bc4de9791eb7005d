// SPDX-License-Identifier: GPL-3.0-only

//! Partition discovery from sysfs

use std::fs;
use std::path::Path;

use vold_types::DeviceNumber;

use crate::error::{Result, SysError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    /// Kernel partition index (`partition` attribute)
    pub index: u32,
    /// Kernel name, e.g. "mmcblk1p1"
    pub name: String,
    pub device: DeviceNumber,
}

/// Read a `dev` attribute (`MAJ:MIN`) from a sysfs device directory.
pub fn read_device_number(dir: &Path) -> Result<DeviceNumber> {
    let raw = fs::read_to_string(dir.join("dev"))?;
    raw.parse().map_err(SysError::Parse)
}

/// List the partitions the kernel exposes under a disk's sysfs directory.
pub fn list_partitions(disk_dir: &Path) -> Result<Vec<PartitionEntry>> {
    let mut partitions = Vec::new();

    for entry in fs::read_dir(disk_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let path = entry.path();
        let Ok(index) = fs::read_to_string(path.join("partition")) else {
            continue;
        };
        let index = index.trim().parse().map_err(|_| {
            SysError::Parse(format!("invalid partition index in {}", path.display()))
        })?;

        partitions.push(PartitionEntry {
            index,
            name: entry.file_name().to_string_lossy().into_owned(),
            device: read_device_number(&path)?,
        });
    }

    partitions.sort_by_key(|partition| partition.index);
    Ok(partitions)
}
