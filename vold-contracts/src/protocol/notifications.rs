// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use vold_types::{DiskId, DiskInfo, LifecycleState, VolumeId};

/// Outbound events, delivered to clients in registry transition order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum Notification {
    DiskArrived(DiskInfo),
    DiskDeparted {
        disk: DiskId,
    },
    DiskStateChanged {
        disk: DiskId,
        state: LifecycleState,
    },
    VolumeStateChanged {
        volume: VolumeId,
        disk: DiskId,
        state: LifecycleState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use vold_types::DeviceNumber;

    #[test]
    fn volume_state_changed_is_tagged() {
        let event = Notification::VolumeStateChanged {
            volume: VolumeId(DeviceNumber::new(179, 33)),
            disk: DiskId(DeviceNumber::new(179, 32)),
            state: LifecycleState::Mounted,
        };

        let json = serde_json::to_string(&event).expect("serialize event");
        assert!(json.contains("\"type\":\"volume_state_changed\""));
        assert!(json.contains("\"state\":\"mounted\""));
    }
}
