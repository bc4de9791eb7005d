// SPDX-License-Identifier: GPL-3.0-only

//! Volume identity and snapshot models

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{BusyOperation, DeviceNumber, DiskId, LifecycleState, PartitionNumber};

/// Identity of a mountable unit, keyed by its own block device number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(pub DeviceNumber);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "public:{}", self.0)
    }
}

impl FromStr for VolumeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("public:")
            .ok_or_else(|| format!("invalid volume id: {s:?}"))?;
        let (major, minor) = rest
            .split_once(',')
            .ok_or_else(|| format!("invalid volume id: {s:?}"))?;
        DeviceNumber::from_str(&format!("{major}:{minor}")).map(Self)
    }
}

/// Snapshot of a volume, handed to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeInfo {
    pub id: VolumeId,

    /// Disk this volume belongs to
    pub disk: DiskId,

    pub partition: PartitionNumber,

    /// Block node used for mount/format (e.g. "/dev/block/vold/public:179,1")
    pub dev_path: String,

    /// Detected filesystem, if probing found one
    pub fs_type: Option<String>,

    pub mount_point: Option<String>,
    pub state: LifecycleState,
    pub busy: Option<BusyOperation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_id_display_and_parse_agree() {
        let id = VolumeId(DeviceNumber::new(179, 1));
        assert_eq!(id.to_string(), "public:179,1");
        assert_eq!("public:179,1".parse::<VolumeId>(), Ok(id));
        assert!("disk:179,1".parse::<VolumeId>().is_err());
        assert!("public:179".parse::<VolumeId>().is_err());
    }
}
