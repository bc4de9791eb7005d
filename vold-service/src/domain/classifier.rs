// SPDX-License-Identifier: GPL-3.0-only

//! Device classifier
//!
//! Turns kernel events into registry mutations. Replayed and live events go
//! through the same path.

use std::sync::Arc;

use vold_contracts::{VoldError, VoldErrorKind};
use vold_types::{DiskId, DiskInfo, Uevent, UeventAction};

use super::registry::{DiskRegistry, NewDisk, RemovedDisk};
use super::sources::SourceRegistry;

#[derive(Debug, Clone)]
pub enum Classification {
    /// A new disk was registered and needs probing
    Arrived(DiskInfo),
    /// A known disk was erased; its leftovers need cleaning up
    Departed(RemovedDisk),
    /// A known disk changed (media change, resize) and needs re-probing
    Changed(DiskId),
    /// Not a whole block disk, or an action we do not act on
    Ignored,
}

pub struct Classifier {
    sources: Arc<SourceRegistry>,
    registry: Arc<DiskRegistry>,
}

impl Classifier {
    pub fn new(sources: Arc<SourceRegistry>, registry: Arc<DiskRegistry>) -> Self {
        Self { sources, registry }
    }

    /// Classify one event.
    ///
    /// Discards come back as errors of kind `NoMatchingSource`,
    /// `DeviceAlreadyKnown` (replay of a registered disk) or `NotFound`
    /// (removal of a disk we never managed).
    pub fn classify(&self, event: &Uevent) -> Result<Classification, VoldError> {
        if !event.is_block_disk() {
            return Ok(Classification::Ignored);
        }
        let Some(device) = event.device_number() else {
            return Ok(Classification::Ignored);
        };
        let id = DiskId(device);

        match event.action {
            UeventAction::Add => {
                let source = self.sources.find(&event.devpath).ok_or_else(|| {
                    VoldError::new(
                        VoldErrorKind::NoMatchingSource,
                        format!("No source matches {}", event.devpath),
                    )
                })?;

                let info = self.registry.insert_disk(NewDisk {
                    id,
                    sysfs_path: event.devpath.clone(),
                    devname: event.devname().map(str::to_string),
                    source: source.clone(),
                })?;
                Ok(Classification::Arrived(info))
            }
            UeventAction::Remove => Ok(Classification::Departed(self.registry.remove_disk(id)?)),
            UeventAction::Change if self.registry.contains(id) => Ok(Classification::Changed(id)),
            UeventAction::Change | UeventAction::Other(_) => Ok(Classification::Ignored),
        }
    }
}
