// SPDX-License-Identifier: GPL-3.0-only

//! Disk/volume lifecycle
//!
//! ```text
//! Created -> Probed -> (Mountable | Unsupported | Encrypted) -> Mounted <-> Unmounted
//!                                      Encrypted -> Mountable (after unlock)
//! any state -> Removed (terminal)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Probed,
    Encrypted,
    Mountable,
    Unsupported,
    Mounted,
    Unmounted,
    Removed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        self == Self::Removed
    }

    /// Whether a mount request is acceptable in this state.
    pub fn is_mountable(self) -> bool {
        matches!(self, Self::Mountable | Self::Unmounted)
    }

    /// Check a single edge of the lifecycle graph.
    pub fn can_transition_to(self, next: Self) -> bool {
        use LifecycleState::*;

        if self == Removed {
            return false;
        }
        if next == Removed {
            return true;
        }

        matches!(
            (self, next),
            (Created, Probed)
                | (Probed, Mountable | Unsupported | Encrypted)
                | (Encrypted, Mountable | Unsupported)
                | (Mountable, Mounted)
                | (Mounted, Unmounted)
                | (Unmounted, Mounted)
                // format or re-probe
                | (Mountable | Unmounted | Unsupported, Mountable)
                | (Mountable | Unmounted, Unsupported)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Probed => "probed",
            Self::Encrypted => "encrypted",
            Self::Mountable => "mountable",
            Self::Unsupported => "unsupported",
            Self::Mounted => "mounted",
            Self::Unmounted => "unmounted",
            Self::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// Blocking work currently in flight for an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyOperation {
    Probing,
    Mounting,
    Unmounting,
    Formatting,
    Unlocking,
}

impl fmt::Display for BusyOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Probing => "probing",
            Self::Mounting => "mounting",
            Self::Unmounting => "unmounting",
            Self::Formatting => "formatting",
            Self::Unlocking => "unlocking",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::LifecycleState::*;
    use super::*;

    const ALL: [LifecycleState; 8] = [
        Created,
        Probed,
        Encrypted,
        Mountable,
        Unsupported,
        Mounted,
        Unmounted,
        Removed,
    ];

    #[test]
    fn removed_is_reachable_from_everything_and_terminal() {
        for state in ALL {
            if state != Removed {
                assert!(state.can_transition_to(Removed), "{state} -> removed");
            }
            assert!(!Removed.can_transition_to(state));
        }
        assert!(Removed.is_terminal());
    }

    #[test]
    fn happy_path_is_legal() {
        assert!(Created.can_transition_to(Probed));
        assert!(Probed.can_transition_to(Mountable));
        assert!(Mountable.can_transition_to(Mounted));
        assert!(Mounted.can_transition_to(Unmounted));
        assert!(Unmounted.can_transition_to(Mounted));
    }

    #[test]
    fn encrypted_requires_unlock_before_mount() {
        assert!(Probed.can_transition_to(Encrypted));
        assert!(!Encrypted.can_transition_to(Mounted));
        assert!(Encrypted.can_transition_to(Mountable));
        assert!(!Encrypted.is_mountable());
    }

    #[test]
    fn skipping_probe_is_rejected() {
        assert!(!Created.can_transition_to(Mountable));
        assert!(!Created.can_transition_to(Mounted));
        assert!(!Unsupported.can_transition_to(Mounted));
        assert!(!Mounted.can_transition_to(Mountable));
    }
}
