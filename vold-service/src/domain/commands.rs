// SPDX-License-Identifier: GPL-3.0-only

//! Client-facing volume operations
//!
//! Each request marks its volume busy, runs the backend call without the
//! registry lock, and applies the result afterwards. Failures leave the
//! volume where it was.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use vold_contracts::{CryptBackend, MountBackend, MountRequest, VoldError, VoldErrorKind};
use vold_types::{BusyOperation, DiskInfo, VolumeId, VolumeInfo};

use super::probe::Prober;
use super::registry::{DiskRegistry, VolumeOutcome, VolumeTicket};
use crate::logging::DebugSwitch;

pub struct VolumeCommands {
    registry: Arc<DiskRegistry>,
    prober: Arc<Prober>,
    backend: Arc<dyn MountBackend>,
    crypt: Arc<dyn CryptBackend>,
    debug: Arc<dyn DebugSwitch>,
    mount_root: PathBuf,
}

/// Name of the cleartext mapping for an unlocked volume.
pub fn crypt_name(volume: VolumeId) -> String {
    format!("expand_{}_{}", volume.0.major, volume.0.minor)
}

fn as_mount_failure(err: VoldError) -> VoldError {
    match err.kind {
        VoldErrorKind::UnsupportedFilesystem | VoldErrorKind::MountOperationFailed => err,
        _ => VoldError::mount_failed(err.message),
    }
}

impl VolumeCommands {
    pub fn new(
        registry: Arc<DiskRegistry>,
        prober: Arc<Prober>,
        backend: Arc<dyn MountBackend>,
        crypt: Arc<dyn CryptBackend>,
        debug: Arc<dyn DebugSwitch>,
        mount_root: PathBuf,
    ) -> Self {
        Self {
            registry,
            prober,
            backend,
            crypt,
            debug,
            mount_root,
        }
    }

    pub fn list_disks(&self) -> Vec<DiskInfo> {
        self.registry.disks()
    }

    pub fn list_volumes(&self) -> Vec<VolumeInfo> {
        self.registry.volumes()
    }

    pub fn set_debug(&self, enabled: bool) -> Result<(), VoldError> {
        self.debug.set_debug(enabled)
    }

    pub fn mount_point(&self, volume: VolumeId) -> PathBuf {
        self.mount_root
            .join(format!("{}_{}", volume.0.major, volume.0.minor))
    }

    /// Apply `result` for `ticket`, clearing the busy marker either way.
    fn settle(
        &self,
        ticket: &VolumeTicket,
        result: Result<VolumeOutcome, VoldError>,
    ) -> Result<VolumeInfo, VoldError> {
        match result {
            Ok(outcome) => self.registry.finish_volume_op(ticket, outcome),
            Err(e) => {
                self.registry
                    .finish_volume_op(ticket, VolumeOutcome::Unchanged)?;
                Err(e)
            }
        }
    }

    pub async fn mount(&self, id: VolumeId) -> Result<VolumeInfo, VoldError> {
        let ticket = self.registry.begin_volume_op(id, BusyOperation::Mounting)?;
        let target = self.mount_point(id);

        let result = self.mount_ticket(&ticket, &target).await;
        let mounted = result.is_ok();

        match self.settle(&ticket, result) {
            Ok(info) => {
                info!(volume = %id, "Mounted at {}", target.display());
                Ok(info)
            }
            Err(e) if mounted && e.kind == VoldErrorKind::DeviceRemovedDuringOperation => {
                warn!(volume = %id, "Device vanished during mount, detaching {}", target.display());
                if let Err(unmount) = self.backend.unmount(&target).await {
                    warn!("Failed to detach {}: {unmount}", target.display());
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn mount_ticket(
        &self,
        ticket: &VolumeTicket,
        target: &Path,
    ) -> Result<VolumeOutcome, VoldError> {
        let fs_type = ticket.mount_fs_type().ok_or_else(|| {
            VoldError::new(
                VoldErrorKind::UnsupportedFilesystem,
                format!("No filesystem detected on {}", ticket.volume),
            )
        })?;

        self.backend
            .check(&ticket.dev_path, fs_type)
            .await
            .map_err(as_mount_failure)?;

        self.backend
            .mount(&MountRequest {
                dev_path: ticket.dev_path.clone(),
                fs_type: fs_type.to_string(),
                mount_options: ticket.mount_options.clone(),
                target: target.to_path_buf(),
            })
            .await
            .map_err(as_mount_failure)?;

        Ok(VolumeOutcome::Mounted(target.to_path_buf()))
    }

    pub async fn unmount(&self, id: VolumeId) -> Result<VolumeInfo, VoldError> {
        let ticket = self.registry.begin_volume_op(id, BusyOperation::Unmounting)?;

        let result = match ticket.mount_point.as_deref() {
            Some(target) => self
                .backend
                .unmount(target)
                .await
                .map(|()| VolumeOutcome::Unmounted)
                .map_err(as_mount_failure),
            None => Err(VoldError::new(
                VoldErrorKind::InvalidState,
                format!("{id} has no mount point"),
            )),
        };

        let info = self.settle(&ticket, result)?;
        info!(volume = %id, "Unmounted");
        Ok(info)
    }

    pub async fn format(&self, id: VolumeId, fs_type: &str) -> Result<VolumeInfo, VoldError> {
        if !self.prober.is_supported(fs_type) {
            return Err(VoldError::new(
                VoldErrorKind::UnsupportedFilesystem,
                format!("Cannot format as {fs_type}"),
            ));
        }

        let ticket = self.registry.begin_volume_op(id, BusyOperation::Formatting)?;
        let result = self
            .backend
            .format(&ticket.dev_path, fs_type)
            .await
            .map(|()| VolumeOutcome::Formatted(fs_type.to_string()))
            .map_err(as_mount_failure);

        let info = self.settle(&ticket, result)?;
        info!(volume = %id, "Formatted as {fs_type}");
        Ok(info)
    }

    /// Unlock an encrypted volume and probe the cleartext device.
    pub async fn unlock(&self, id: VolumeId) -> Result<VolumeInfo, VoldError> {
        let ticket = self.registry.begin_volume_op(id, BusyOperation::Unlocking)?;
        let name = crypt_name(id);

        let result = match self.crypt.unlock(&ticket.dev_path, &name).await {
            Ok(cleartext) => {
                let (fs_type, state) = self.prober.classify_volume(&cleartext, false).await;
                Ok(VolumeOutcome::Unlocked {
                    dev_path: cleartext,
                    crypt_name: name.clone(),
                    fs_type,
                    state,
                })
            }
            Err(e) => Err(e),
        };
        let unlocked = result.is_ok();

        match self.settle(&ticket, result) {
            Ok(info) => {
                info!(volume = %id, "Unlocked as {name}, now {}", info.state);
                Ok(info)
            }
            Err(e) => {
                if unlocked && let Err(lock) = self.crypt.lock(&name).await {
                    warn!("Failed to close {name}: {lock}");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use vold_contracts::NoLabels;
    use vold_types::{DeviceNumber, DiskId, LifecycleState};

    use super::*;
    use crate::domain::notifier::Notifier;
    use crate::domain::probe::LUKS_FS_TYPE;
    use crate::domain::registry::NewDisk;
    use crate::domain::registry::tests::sdcard_source;
    use crate::testing::{Call, FakeBackend, FakeDebug};

    const DISK: DiskId = DiskId(DeviceNumber { major: 179, minor: 32 });
    const VOLUME: VolumeId = VolumeId(DeviceNumber { major: 179, minor: 32 });

    struct Harness {
        registry: Arc<DiskRegistry>,
        prober: Arc<Prober>,
        backend: FakeBackend,
        debug: Arc<FakeDebug>,
        commands: VolumeCommands,
        _sysfs: tempfile::TempDir,
    }

    /// One adoptable whole-disk volume at /dev/mmcblk1, already probed.
    async fn harness(fs_type: &str) -> Harness {
        let sysfs = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(DiskRegistry::new(Notifier::new(64)));
        let backend = FakeBackend::default().with_filesystem("/dev/mmcblk1", fs_type);
        let debug = Arc::new(FakeDebug::default());

        let prober = Arc::new(Prober::new(
            Arc::clone(&registry),
            Arc::new(backend.clone()),
            Arc::new(NoLabels),
            sysfs.path().to_path_buf(),
            None,
            vec!["vfat".to_string(), "ext4".to_string()],
        ));

        registry
            .insert_disk(NewDisk {
                id: DISK,
                sysfs_path: "/devices/soc/mmcblk1".to_string(),
                devname: Some("mmcblk1".to_string()),
                source: sdcard_source(),
            })
            .expect("insert");
        prober.probe_disk(DISK).await.expect("probe");

        let commands = VolumeCommands::new(
            Arc::clone(&registry),
            Arc::clone(&prober),
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            debug.clone(),
            PathBuf::from("/mnt/media_rw"),
        );

        Harness {
            registry,
            prober,
            backend,
            debug,
            commands,
            _sysfs: sysfs,
        }
    }

    #[tokio::test]
    async fn mount_then_unmount_round_trip() {
        let h = harness("vfat").await;

        let info = h.commands.mount(VOLUME).await.expect("mount");
        assert_eq!(info.state, LifecycleState::Mounted);
        assert_eq!(info.mount_point.as_deref(), Some("/mnt/media_rw/179_32"));
        assert!(h.backend.calls().contains(&Call::Mount(MountRequest {
            dev_path: PathBuf::from("/dev/mmcblk1"),
            fs_type: "vfat".to_string(),
            mount_options: String::new(),
            target: PathBuf::from("/mnt/media_rw/179_32"),
        })));

        let info = h.commands.unmount(VOLUME).await.expect("unmount");
        assert_eq!(info.state, LifecycleState::Unmounted);
        assert_eq!(info.mount_point, None);
        assert_eq!(h.registry.disk(DISK).expect("disk").state, LifecycleState::Unmounted);

        // Unmounted toggles back to Mounted
        let info = h.commands.mount(VOLUME).await.expect("remount");
        assert_eq!(info.state, LifecycleState::Mounted);
    }

    #[tokio::test]
    async fn failed_mount_leaves_state_unchanged() {
        let h = harness("vfat").await;
        h.backend.fail_mounts();

        let err = h.commands.mount(VOLUME).await.unwrap_err();
        assert_eq!(err.kind, VoldErrorKind::MountOperationFailed);

        let volume = h.registry.volume(VOLUME).expect("volume");
        assert_eq!(volume.state, LifecycleState::Mountable);
        assert_eq!(volume.busy, None);
        assert_eq!(h.registry.disk(DISK).expect("disk").state, LifecycleState::Mountable);
    }

    #[tokio::test]
    async fn removal_racing_mount_fails_and_detaches() {
        let h = harness("vfat").await;
        let registry = Arc::clone(&h.registry);
        h.backend.during_mount(move || {
            registry.remove_disk(DISK).expect("remove during mount");
        });

        let err = h.commands.mount(VOLUME).await.unwrap_err();
        assert_eq!(err.kind, VoldErrorKind::DeviceRemovedDuringOperation);
        assert!(h.registry.is_empty());
        assert!(h.registry.volume(VOLUME).is_none());
        assert_eq!(
            h.backend.calls().last(),
            Some(&Call::Unmount(PathBuf::from("/mnt/media_rw/179_32")))
        );
    }

    #[tokio::test]
    async fn mount_after_removal_is_not_found() {
        let h = harness("vfat").await;
        h.registry.remove_disk(DISK).expect("remove");

        let err = h.commands.mount(VOLUME).await.unwrap_err();
        assert_eq!(err.kind, VoldErrorKind::NotFound);
    }

    #[tokio::test]
    async fn unsupported_volume_can_be_formatted_then_mounted() {
        let h = harness("btrfs").await;

        let err = h.commands.mount(VOLUME).await.unwrap_err();
        assert_eq!(err.kind, VoldErrorKind::UnsupportedFilesystem);

        let err = h.commands.format(VOLUME, "btrfs").await.unwrap_err();
        assert_eq!(err.kind, VoldErrorKind::UnsupportedFilesystem);

        let info = h.commands.format(VOLUME, "ext4").await.expect("format");
        assert_eq!(info.state, LifecycleState::Mountable);
        assert_eq!(info.fs_type.as_deref(), Some("ext4"));
        assert_eq!(h.registry.disk(DISK).expect("disk").state, LifecycleState::Mountable);

        h.commands.mount(VOLUME).await.expect("mount");
    }

    #[tokio::test]
    async fn unlock_reprobes_cleartext_device() {
        let h = harness(LUKS_FS_TYPE).await;
        assert_eq!(h.registry.volume(VOLUME).expect("volume").state, LifecycleState::Encrypted);

        let err = h.commands.mount(VOLUME).await.unwrap_err();
        assert_eq!(err.kind, VoldErrorKind::InvalidState);

        let cleartext = PathBuf::from("/dev/mapper/expand_179_32");
        let backend = h.backend.clone().with_filesystem(cleartext.clone(), "ext4");

        let info = h.commands.unlock(VOLUME).await.expect("unlock");
        assert_eq!(info.state, LifecycleState::Mountable);
        assert_eq!(info.dev_path, "/dev/mapper/expand_179_32");
        assert!(backend.calls().contains(&Call::Unlock(
            PathBuf::from("/dev/mmcblk1"),
            "expand_179_32".to_string()
        )));

        let removed = h.registry.remove_disk(DISK).expect("remove");
        assert_eq!(removed.crypt_names, vec!["expand_179_32".to_string()]);
    }

    #[tokio::test]
    async fn media_change_keeps_an_unlocked_mapping_tracked() {
        let h = harness(LUKS_FS_TYPE).await;
        let cleartext = PathBuf::from("/dev/mapper/expand_179_32");
        let _ = h.backend.clone().with_filesystem(cleartext, "ext4");
        h.commands.unlock(VOLUME).await.expect("unlock");

        let err = h.prober.probe_disk(DISK).await.unwrap_err();
        assert_eq!(err.kind, VoldErrorKind::Busy);

        let volume = h.registry.volume(VOLUME).expect("volume");
        assert_eq!(volume.state, LifecycleState::Mountable);
        assert_eq!(volume.dev_path, "/dev/mapper/expand_179_32");
        assert_eq!(h.registry.disk(DISK).expect("disk").state, LifecycleState::Mountable);

        let removed = h.registry.remove_disk(DISK).expect("remove");
        assert_eq!(removed.crypt_names, vec!["expand_179_32".to_string()]);
    }

    #[tokio::test]
    async fn media_change_after_format_reprobes_the_new_filesystem() {
        let h = harness("btrfs").await;
        h.commands.format(VOLUME, "vfat").await.expect("format");

        let info = h.prober.probe_disk(DISK).await.expect("reprobe");
        assert_eq!(info.state, LifecycleState::Mountable);

        let volume = h.registry.volume(VOLUME).expect("volume");
        assert_eq!(volume.state, LifecycleState::Mountable);
        assert_eq!(volume.fs_type.as_deref(), Some("vfat"));
        assert_eq!(volume.busy, None);
    }

    #[tokio::test]
    async fn unknown_volume_and_debug_switch() {
        let h = harness("vfat").await;

        let err = h
            .commands
            .unmount(VolumeId(DeviceNumber::new(8, 1)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, VoldErrorKind::NotFound);

        h.commands.set_debug(true).expect("set debug");
        assert!(h.debug.enabled.load(Ordering::SeqCst));
        assert_eq!(h.commands.list_disks().len(), 1);
        assert_eq!(h.commands.list_volumes().len(), 1);
    }
}
