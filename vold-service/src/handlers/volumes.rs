// SPDX-License-Identifier: GPL-3.0-only

//! Volume management D-Bus interface
//!
//! Lists the registry, runs mount/unmount/format/unlock requests and relays
//! registry notifications as signals, in the order they happened.

use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use vold_contracts::Notification;
use vold_types::VolumeId;
use zbus::object_server::SignalEmitter;
use zbus::{Connection, interface};

use crate::domain::VolumeCommands;
use crate::error::ServiceError;

pub const VOLUMES_PATH: &str = "/org/vold/Volumes";

/// D-Bus front end for [`VolumeCommands`]
pub struct VolumesHandler {
    commands: Arc<VolumeCommands>,
}

impl VolumesHandler {
    pub fn new(commands: Arc<VolumeCommands>) -> Self {
        Self { commands }
    }
}

fn parse_volume(volume_id: &str) -> Result<VolumeId, ServiceError> {
    VolumeId::from_str(volume_id).map_err(ServiceError::InvalidArgument)
}

fn to_json<T: Serialize>(value: &T) -> Result<String, ServiceError> {
    Ok(serde_json::to_string(value)?)
}

#[interface(name = "org.vold.Volumes")]
impl VolumesHandler {
    /// Emitted when a managed disk appears
    ///
    /// Args:
    /// - disk_id: e.g. "disk:179,32"
    /// - disk_info: JSON-serialized DiskInfo
    #[zbus(signal)]
    pub(crate) async fn disk_arrived(
        emitter: &SignalEmitter<'_>,
        disk_id: &str,
        disk_info: &str,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    pub(crate) async fn disk_departed(
        emitter: &SignalEmitter<'_>,
        disk_id: &str,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    pub(crate) async fn disk_state_changed(
        emitter: &SignalEmitter<'_>,
        disk_id: &str,
        state: &str,
    ) -> zbus::Result<()>;

    /// Emitted on every volume transition, including creation and removal
    #[zbus(signal)]
    pub(crate) async fn volume_state_changed(
        emitter: &SignalEmitter<'_>,
        volume_id: &str,
        disk_id: &str,
        state: &str,
    ) -> zbus::Result<()>;

    /// Emitted when the relay fell behind and dropped `count` transitions.
    ///
    /// Clients should re-list disks and volumes to resynchronise.
    #[zbus(signal)]
    pub(crate) async fn notifications_lost(
        emitter: &SignalEmitter<'_>,
        count: u64,
    ) -> zbus::Result<()>;

    /// List managed disks
    ///
    /// Returns a JSON-serialized array of DiskInfo objects.
    ///
    /// **Example:**
    /// ```bash
    /// busctl call org.vold.Daemon /org/vold/Volumes org.vold.Volumes ListDisks
    /// ```
    async fn list_disks(&self) -> zbus::fdo::Result<String> {
        let disks = self.commands.list_disks();
        tracing::debug!("ListDisks: {} disk(s)", disks.len());
        Ok(to_json(&disks)?)
    }

    /// List volumes of every managed disk as JSON VolumeInfo objects
    async fn list_volumes(&self) -> zbus::fdo::Result<String> {
        let volumes = self.commands.list_volumes();
        tracing::debug!("ListVolumes: {} volume(s)", volumes.len());
        Ok(to_json(&volumes)?)
    }

    /// Mount a volume under the mount root, returning its updated VolumeInfo
    ///
    /// **Example:**
    /// ```bash
    /// busctl call org.vold.Daemon /org/vold/Volumes org.vold.Volumes Mount s "public:179,33"
    /// ```
    async fn mount(&self, volume_id: &str) -> zbus::fdo::Result<String> {
        let id = parse_volume(volume_id)?;
        let info = self.commands.mount(id).await.map_err(|e| {
            tracing::warn!("Mount of {volume_id} failed: {e}");
            ServiceError::from(e)
        })?;
        Ok(to_json(&info)?)
    }

    async fn unmount(&self, volume_id: &str) -> zbus::fdo::Result<String> {
        let id = parse_volume(volume_id)?;
        let info = self.commands.unmount(id).await.map_err(|e| {
            tracing::warn!("Unmount of {volume_id} failed: {e}");
            ServiceError::from(e)
        })?;
        Ok(to_json(&info)?)
    }

    /// Format a volume; `fs_type` must be one of the supported filesystems
    async fn format(&self, volume_id: &str, fs_type: &str) -> zbus::fdo::Result<String> {
        let id = parse_volume(volume_id)?;
        let info = self.commands.format(id, fs_type).await.map_err(|e| {
            tracing::warn!("Format of {volume_id} as {fs_type} failed: {e}");
            ServiceError::from(e)
        })?;
        Ok(to_json(&info)?)
    }

    /// Unlock an encrypted adoptable volume and probe its contents
    async fn unlock(&self, volume_id: &str) -> zbus::fdo::Result<String> {
        let id = parse_volume(volume_id)?;
        let info = self.commands.unlock(id).await.map_err(|e| {
            tracing::warn!("Unlock of {volume_id} failed: {e}");
            ServiceError::from(e)
        })?;
        Ok(to_json(&info)?)
    }

    async fn set_debug(&self, enabled: bool) -> zbus::fdo::Result<()> {
        self.commands
            .set_debug(enabled)
            .map_err(|e| ServiceError::from(e).into())
    }
}

/// What the signal relay should do next
#[derive(Debug, Clone, PartialEq, Eq)]
enum Relayed {
    Signal(Notification),
    Lost(u64),
    Stop,
}

async fn next_relayed(notifications: &mut broadcast::Receiver<Notification>) -> Relayed {
    match notifications.recv().await {
        Ok(notification) => Relayed::Signal(notification),
        Err(RecvError::Lagged(missed)) => Relayed::Lost(missed),
        Err(RecvError::Closed) => Relayed::Stop,
    }
}

/// Relay registry notifications as signals on `object_path` until the
/// notifier goes away.
pub async fn forward_notifications(
    connection: Connection,
    object_path: &'static str,
    mut notifications: broadcast::Receiver<Notification>,
) -> zbus::Result<()> {
    let iface_ref = connection
        .object_server()
        .interface::<_, VolumesHandler>(object_path)
        .await?;

    tokio::spawn(async move {
        loop {
            let emitter = iface_ref.signal_emitter();
            let notification = match next_relayed(&mut notifications).await {
                Relayed::Signal(notification) => notification,
                Relayed::Lost(missed) => {
                    tracing::warn!("Signal relay fell behind, {missed} notification(s) lost");
                    if let Err(e) = VolumesHandler::notifications_lost(emitter, missed).await {
                        tracing::error!("Failed to emit signal: {e}");
                    }
                    continue;
                }
                Relayed::Stop => break,
            };

            let result = match &notification {
                Notification::DiskArrived(info) => match serde_json::to_string(info) {
                    Ok(json) => {
                        VolumesHandler::disk_arrived(emitter, &info.id.to_string(), &json).await
                    }
                    Err(e) => {
                        tracing::error!("Failed to serialize disk info: {e}");
                        continue;
                    }
                },
                Notification::DiskDeparted { disk } => {
                    VolumesHandler::disk_departed(emitter, &disk.to_string()).await
                }
                Notification::DiskStateChanged { disk, state } => {
                    VolumesHandler::disk_state_changed(
                        emitter,
                        &disk.to_string(),
                        &state.to_string(),
                    )
                    .await
                }
                Notification::VolumeStateChanged {
                    volume,
                    disk,
                    state,
                } => {
                    VolumesHandler::volume_state_changed(
                        emitter,
                        &volume.to_string(),
                        &disk.to_string(),
                        &state.to_string(),
                    )
                    .await
                }
            };

            if let Err(e) = result {
                tracing::error!("Failed to emit signal: {e}");
            }
        }
        tracing::debug!("Signal relay stopped");
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use vold_types::{DeviceNumber, DiskId};

    use super::*;

    fn departed(minor: u32) -> Notification {
        Notification::DiskDeparted {
            disk: DiskId(DeviceNumber::new(179, minor)),
        }
    }

    #[tokio::test]
    async fn falling_behind_is_reported_before_resuming() {
        let (tx, mut rx) = broadcast::channel(2);
        for minor in 0..5 {
            tx.send(departed(minor)).expect("send");
        }

        assert_eq!(next_relayed(&mut rx).await, Relayed::Lost(3));
        assert_eq!(next_relayed(&mut rx).await, Relayed::Signal(departed(3)));
        assert_eq!(next_relayed(&mut rx).await, Relayed::Signal(departed(4)));

        drop(tx);
        assert_eq!(next_relayed(&mut rx).await, Relayed::Stop);
    }
}
