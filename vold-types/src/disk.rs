// SPDX-License-Identifier: GPL-3.0-only

//! Disk identity and snapshot models

use std::fmt;
use std::str::FromStr;

use enumflags2::BitFlags;
use serde::{Deserialize, Serialize};

use crate::{BusyOperation, DiskFlag, LifecycleState, VolumeId};

/// Kernel major/minor pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceNumber {
    pub major: u32,
    pub minor: u32,
}

impl DeviceNumber {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for DeviceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.major, self.minor)
    }
}

/// Parses the `MAJ:MIN` form found in sysfs `dev` attributes.
impl FromStr for DeviceNumber {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("invalid device number: {s:?}"))?;
        let major = major
            .parse()
            .map_err(|_| format!("invalid major number: {major:?}"))?;
        let minor = minor
            .parse()
            .map_err(|_| format!("invalid minor number: {minor:?}"))?;
        Ok(Self { major, minor })
    }
}

/// Stable identity of a disk for the lifetime of one attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiskId(pub DeviceNumber);

impl DiskId {
    pub fn device(&self) -> DeviceNumber {
        self.0
    }
}

impl fmt::Display for DiskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "disk:{}", self.0)
    }
}

impl FromStr for DiskId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("disk:")
            .ok_or_else(|| format!("invalid disk id: {s:?}"))?;
        let (major, minor) = rest
            .split_once(',')
            .ok_or_else(|| format!("invalid disk id: {s:?}"))?;
        DeviceNumber::from_str(&format!("{major}:{minor}")).map(Self)
    }
}

/// Snapshot of a managed disk, handed to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskInfo {
    pub id: DiskId,

    /// Kernel device path at the time of observation (e.g. "/devices/soc/mmcblk1")
    pub sysfs_path: String,

    /// Nickname from the matching disk source
    pub nickname: String,

    pub flags: BitFlags<DiskFlag>,
    pub fs_type: String,
    pub mount_options: String,
    pub state: LifecycleState,

    /// Operation in flight, if any
    pub busy: Option<BusyOperation>,

    pub volumes: Vec<VolumeId>,
}
