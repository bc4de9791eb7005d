// SPDX-License-Identifier: GPL-3.0-only

//! Disk source rules
//!
//! A `DiskSource` is configuration, not an observed device: it describes which
//! kernel device paths the daemon manages and how matching disks are treated.

use std::fmt;

use enumflags2::{BitFlags, bitflags};
use serde::{Deserialize, Serialize};

/// Per-disk behaviour flags copied from the matching source
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiskFlag {
    /// Storage may be encrypted and adopted as extended internal storage
    Adoptable = 1 << 0,
    /// Storage should become the primary shared volume
    DefaultPrimary = 1 << 1,
    /// Storage is physically fixed to the device
    NonRemovable = 1 << 2,
}

/// Which part of a matched device becomes a volume
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionNumber {
    /// Every partition (or the whole device when it has none)
    #[default]
    WholeDisk,
    /// Only the partition with this kernel index
    Index(u32),
}

impl PartitionNumber {
    pub fn index(self) -> Option<u32> {
        match self {
            Self::WholeDisk => None,
            Self::Index(index) => Some(index),
        }
    }
}

impl fmt::Display for PartitionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Matches the -1 sentinel operators are used to seeing in boot logs
            Self::WholeDisk => f.write_str("-1"),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Configuration rule deciding whether and how a device is managed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSource {
    /// Wildcard sysfs path pattern (`*` matches within one segment)
    pub pattern: String,

    /// Human-readable label given to matching disks
    pub nickname: String,

    /// Partition restriction for matching disks
    pub partition: PartitionNumber,

    pub flags: BitFlags<DiskFlag>,

    /// Filesystem hint for mounting ("auto" means probe)
    pub fs_type: String,

    /// Extra mount options, empty for none
    pub mount_options: String,
}

impl DiskSource {
    pub fn is_adoptable(&self) -> bool {
        self.flags.contains(DiskFlag::Adoptable)
    }
}
