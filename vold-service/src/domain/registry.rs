// SPDX-License-Identifier: GPL-3.0-only

//! Disk/volume state registry
//!
//! The registry exclusively owns every `Disk` and `Volume`. All mutation goes
//! through one mutex, and notifications are emitted while it is held so that
//! clients see transitions in the order they happened.
//!
//! Blocking work (probing, mounting, formatting) never runs under the lock.
//! Callers take a ticket with `begin_*`, which marks the entity busy, do the
//! work, then hand the result back with `finish_*`. Each disk attachment has
//! a generation number, so a result for a disk that was removed (or removed
//! and re-attached) in the meantime is rejected with
//! `DeviceRemovedDuringOperation`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use enumflags2::BitFlags;
use tracing::{debug, info, warn};
use vold_contracts::{Notification, VoldError, VoldErrorKind};
use vold_types::{
    BusyOperation, DiskFlag, DiskId, DiskInfo, DiskSource, LifecycleState, PartitionNumber,
    VolumeId, VolumeInfo,
};

use super::notifier::Notifier;

/// A disk the classifier wants registered
#[derive(Debug, Clone)]
pub struct NewDisk {
    pub id: DiskId,
    pub sysfs_path: String,
    pub devname: Option<String>,
    pub source: DiskSource,
}

/// One volume discovered by a probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedVolume {
    pub id: VolumeId,
    pub partition: PartitionNumber,
    pub dev_path: PathBuf,
    /// Private node created for this volume, removed on departure
    pub node: Option<PathBuf>,
    pub fs_type: Option<String>,
    /// Probe verdict: `Mountable`, `Unsupported` or `Encrypted`
    pub outcome: LifecycleState,
}

/// Everything a probe discovered about one disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Private node for the whole disk, removed on departure
    pub disk_node: Option<PathBuf>,
    pub volumes: Vec<ProbedVolume>,
}

/// Proof that a disk-level operation was started on a given attachment
#[derive(Debug, Clone)]
pub struct DiskTicket {
    pub disk: DiskId,
    generation: u64,
    pub sysfs_path: String,
    pub devname: Option<String>,
    pub source: DiskSource,
}

/// Proof that a volume-level operation was started on a given attachment
#[derive(Debug, Clone)]
pub struct VolumeTicket {
    pub volume: VolumeId,
    pub disk: DiskId,
    generation: u64,
    pub operation: BusyOperation,
    pub dev_path: PathBuf,
    pub fs_type: Option<String>,
    pub source_fs_type: String,
    pub mount_options: String,
    pub mount_point: Option<PathBuf>,
    pub flags: BitFlags<DiskFlag>,
    pub crypt_name: Option<String>,
}

impl VolumeTicket {
    /// Filesystem to mount with: the source hint unless it asks for probing.
    pub fn mount_fs_type(&self) -> Option<&str> {
        match self.source_fs_type.as_str() {
            "" | "auto" => self.fs_type.as_deref(),
            fixed => Some(fixed),
        }
    }
}

/// Result of a volume operation, applied under the lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeOutcome {
    /// The operation failed; state stays as it was
    Unchanged,
    Mounted(PathBuf),
    Unmounted,
    Formatted(String),
    Unlocked {
        dev_path: PathBuf,
        crypt_name: String,
        fs_type: Option<String>,
        state: LifecycleState,
    },
}

/// A disk after its volumes were replaced by a probe
#[derive(Debug, Clone)]
pub struct ProbedDisk {
    pub info: DiskInfo,
    /// Nodes of replaced volumes that the new layout no longer uses
    pub stale_nodes: Vec<PathBuf>,
}

/// Everything left to clean up after a disk was erased
#[derive(Debug, Clone)]
pub struct RemovedDisk {
    pub info: DiskInfo,
    /// Mount points that were active when the device vanished
    pub mounted: Vec<PathBuf>,
    pub nodes: Vec<PathBuf>,
    pub crypt_names: Vec<String>,
}

#[derive(Debug)]
struct DiskEntry {
    id: DiskId,
    generation: u64,
    sysfs_path: String,
    devname: Option<String>,
    source: DiskSource,
    node: Option<PathBuf>,
    state: LifecycleState,
    busy: Option<BusyOperation>,
    volumes: Vec<VolumeId>,
}

impl DiskEntry {
    fn info(&self) -> DiskInfo {
        DiskInfo {
            id: self.id,
            sysfs_path: self.sysfs_path.clone(),
            nickname: self.source.nickname.clone(),
            flags: self.source.flags,
            fs_type: self.source.fs_type.clone(),
            mount_options: self.source.mount_options.clone(),
            state: self.state,
            busy: self.busy,
            volumes: self.volumes.clone(),
        }
    }
}

#[derive(Debug)]
struct VolumeEntry {
    id: VolumeId,
    disk: DiskId,
    partition: PartitionNumber,
    dev_path: PathBuf,
    node: Option<PathBuf>,
    fs_type: Option<String>,
    mount_point: Option<PathBuf>,
    state: LifecycleState,
    busy: Option<BusyOperation>,
    crypt_name: Option<String>,
}

impl VolumeEntry {
    fn info(&self) -> VolumeInfo {
        VolumeInfo {
            id: self.id,
            disk: self.disk,
            partition: self.partition,
            dev_path: self.dev_path.display().to_string(),
            fs_type: self.fs_type.clone(),
            mount_point: self
                .mount_point
                .as_ref()
                .map(|path| path.display().to_string()),
            state: self.state,
            busy: self.busy,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    disks: BTreeMap<DiskId, DiskEntry>,
    volumes: BTreeMap<VolumeId, VolumeEntry>,
    next_generation: u64,
}

#[derive(Debug)]
pub struct DiskRegistry {
    state: Mutex<RegistryState>,
    notifier: Notifier,
}

fn removed_during(what: impl std::fmt::Display) -> VoldError {
    VoldError::removed(format!("{what} was removed while the operation was in flight"))
}

impl DiskRegistry {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            notifier,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a newly observed disk in `Created` state.
    ///
    /// A disk that is already known yields `DeviceAlreadyKnown` and is left untouched.
    pub fn insert_disk(&self, new: NewDisk) -> Result<DiskInfo, VoldError> {
        let mut state = self.lock();
        if state.disks.contains_key(&new.id) {
            return Err(VoldError::new(
                VoldErrorKind::DeviceAlreadyKnown,
                format!("{} is already registered", new.id),
            ));
        }

        state.next_generation += 1;
        let entry = DiskEntry {
            id: new.id,
            generation: state.next_generation,
            sysfs_path: new.sysfs_path,
            devname: new.devname,
            source: new.source,
            node: None,
            state: LifecycleState::Created,
            busy: None,
            volumes: Vec::new(),
        };

        let info = entry.info();
        state.disks.insert(new.id, entry);
        info!(disk = %info.id, nickname = %info.nickname, "Disk arrived at {}", info.sysfs_path);
        self.notifier.send(Notification::DiskArrived(info.clone()));
        Ok(info)
    }

    /// Transition a disk and its volumes to `Removed` and erase them.
    pub fn remove_disk(&self, id: DiskId) -> Result<RemovedDisk, VoldError> {
        let mut guard = self.lock();
        let RegistryState { disks, volumes, .. } = &mut *guard;

        let mut disk = disks
            .remove(&id)
            .ok_or_else(|| VoldError::not_found(format!("{id} is not registered")))?;

        let mut mounted = Vec::new();
        let mut nodes = Vec::new();
        let mut crypt_names = Vec::new();

        for volume_id in &disk.volumes {
            let Some(mut volume) = volumes.remove(volume_id) else {
                continue;
            };
            if volume.state == LifecycleState::Mounted
                && let Some(mount_point) = volume.mount_point.take()
            {
                mounted.push(mount_point);
            }
            nodes.extend(volume.node.take());
            crypt_names.extend(volume.crypt_name.take());
            set_volume_state(&self.notifier, &mut volume, LifecycleState::Removed);
        }

        nodes.extend(disk.node.take());
        set_disk_state(&self.notifier, &mut disk, LifecycleState::Removed);
        self.notifier.send(Notification::DiskDeparted { disk: id });
        info!(disk = %id, "Disk departed");

        Ok(RemovedDisk {
            info: disk.info(),
            mounted,
            nodes,
            crypt_names,
        })
    }

    /// Mark a disk busy for a disk-wide operation (probing).
    ///
    /// Refused while any volume is busy, mounted or unlocked, since a probe
    /// replaces every volume and would orphan the mount or mapping.
    pub fn begin_disk_op(
        &self,
        id: DiskId,
        operation: BusyOperation,
    ) -> Result<DiskTicket, VoldError> {
        let mut guard = self.lock();
        let RegistryState { disks, volumes, .. } = &mut *guard;

        let disk = disks
            .get_mut(&id)
            .ok_or_else(|| VoldError::not_found(format!("{id} is not registered")))?;

        if let Some(busy) = disk.busy {
            return Err(VoldError::busy(format!("{id} is busy {busy}")));
        }

        let in_use = disk
            .volumes
            .iter()
            .filter_map(|v| volumes.get(v))
            .any(|volume| {
                volume.busy.is_some()
                    || volume.state == LifecycleState::Mounted
                    || volume.crypt_name.is_some()
            });
        if in_use {
            return Err(VoldError::busy(format!("{id} has volumes in use")));
        }

        disk.busy = Some(operation);
        debug!(disk = %id, "Began {operation}");

        Ok(DiskTicket {
            disk: id,
            generation: disk.generation,
            sysfs_path: disk.sysfs_path.clone(),
            devname: disk.devname.clone(),
            source: disk.source.clone(),
        })
    }

    /// Release a disk-level ticket without applying anything.
    pub fn abort_disk_op(&self, ticket: &DiskTicket) {
        let mut state = self.lock();
        if let Some(disk) = state.disks.get_mut(&ticket.disk)
            && disk.generation == ticket.generation
        {
            disk.busy = None;
        }
    }

    /// Replace a disk's volumes with probe results and settle its state.
    ///
    /// Nodes the old volumes owned and the new layout does not reuse are
    /// handed back for removal.
    pub fn finish_probe(
        &self,
        ticket: &DiskTicket,
        report: ProbeReport,
    ) -> Result<ProbedDisk, VoldError> {
        let mut guard = self.lock();
        let RegistryState { disks, volumes, .. } = &mut *guard;

        let disk = match disks.get_mut(&ticket.disk) {
            Some(disk) if disk.generation == ticket.generation => disk,
            _ => return Err(removed_during(ticket.disk)),
        };
        disk.busy = None;

        let reused = |path: &PathBuf| {
            report.disk_node.as_ref() == Some(path)
                || report.volumes.iter().any(|v| v.node.as_ref() == Some(path))
        };

        let mut stale_nodes = Vec::new();
        if report.disk_node.is_some() {
            stale_nodes.extend(disk.node.take().filter(|node| !reused(node)));
            disk.node = report.disk_node.clone();
        }

        for stale in disk.volumes.drain(..) {
            if let Some(mut volume) = volumes.remove(&stale) {
                stale_nodes.extend(volume.node.take().filter(|node| !reused(node)));
                set_volume_state(&self.notifier, &mut volume, LifecycleState::Removed);
            }
        }

        for probe in report.volumes {
            let mut volume = VolumeEntry {
                id: probe.id,
                disk: disk.id,
                partition: probe.partition,
                dev_path: probe.dev_path,
                node: probe.node,
                fs_type: probe.fs_type,
                mount_point: None,
                state: LifecycleState::Created,
                busy: None,
                crypt_name: None,
            };
            self.notifier.send(Notification::VolumeStateChanged {
                volume: volume.id,
                disk: volume.disk,
                state: volume.state,
            });
            set_volume_state(&self.notifier, &mut volume, LifecycleState::Probed);
            set_volume_state(&self.notifier, &mut volume, probe.outcome);

            disk.volumes.push(volume.id);
            volumes.insert(volume.id, volume);
        }

        if disk.state == LifecycleState::Created {
            set_disk_state(&self.notifier, disk, LifecycleState::Probed);
        }
        settle_disk_state(&self.notifier, disk, volumes);

        Ok(ProbedDisk {
            info: disk.info(),
            stale_nodes,
        })
    }

    /// Filter `nodes` down to those no registered disk or volume owns.
    pub fn unclaimed_nodes(&self, nodes: Vec<PathBuf>) -> Vec<PathBuf> {
        let state = self.lock();
        nodes
            .into_iter()
            .filter(|node| {
                let owned = Some(node);
                !state.disks.values().any(|disk| disk.node.as_ref() == owned)
                    && !state.volumes.values().any(|volume| volume.node.as_ref() == owned)
            })
            .collect()
    }

    /// Mark a volume busy for `operation`, checking the lifecycle allows it.
    pub fn begin_volume_op(
        &self,
        id: VolumeId,
        operation: BusyOperation,
    ) -> Result<VolumeTicket, VoldError> {
        let mut guard = self.lock();
        let RegistryState { disks, volumes, .. } = &mut *guard;

        let volume = volumes
            .get_mut(&id)
            .ok_or_else(|| VoldError::not_found(format!("{id} is not registered")))?;
        let disk = disks
            .get(&volume.disk)
            .ok_or_else(|| VoldError::not_found(format!("{} is not registered", volume.disk)))?;

        if let Some(busy) = volume.busy.or(disk.busy) {
            return Err(VoldError::busy(format!("{id} is busy {busy}")));
        }

        let state = volume.state;
        let allowed = match operation {
            BusyOperation::Mounting => state.is_mountable(),
            BusyOperation::Unmounting => state == LifecycleState::Mounted,
            BusyOperation::Formatting => matches!(
                state,
                LifecycleState::Mountable | LifecycleState::Unmounted | LifecycleState::Unsupported
            ),
            BusyOperation::Unlocking => state == LifecycleState::Encrypted,
            BusyOperation::Probing => false,
        };
        if !allowed {
            let kind = if operation == BusyOperation::Mounting
                && state == LifecycleState::Unsupported
            {
                VoldErrorKind::UnsupportedFilesystem
            } else {
                VoldErrorKind::InvalidState
            };
            return Err(VoldError::new(kind, format!("{id} is {state}, cannot start {operation}")));
        }

        volume.busy = Some(operation);
        debug!(volume = %id, "Began {operation}");

        Ok(VolumeTicket {
            volume: id,
            disk: disk.id,
            generation: disk.generation,
            operation,
            dev_path: volume.dev_path.clone(),
            fs_type: volume.fs_type.clone(),
            source_fs_type: disk.source.fs_type.clone(),
            mount_options: disk.source.mount_options.clone(),
            mount_point: volume.mount_point.clone(),
            flags: disk.source.flags,
            crypt_name: volume.crypt_name.clone(),
        })
    }

    /// Apply the result of a volume operation and clear its busy marker.
    ///
    /// Fails with `DeviceRemovedDuringOperation` when the owning disk
    /// attachment no longer exists.
    pub fn finish_volume_op(
        &self,
        ticket: &VolumeTicket,
        outcome: VolumeOutcome,
    ) -> Result<VolumeInfo, VoldError> {
        let mut guard = self.lock();
        let RegistryState { disks, volumes, .. } = &mut *guard;

        let disk = match disks.get_mut(&ticket.disk) {
            Some(disk) if disk.generation == ticket.generation => disk,
            _ => return Err(removed_during(ticket.volume)),
        };

        let info = {
            let Some(volume) = volumes.get_mut(&ticket.volume) else {
                return Err(removed_during(ticket.volume));
            };
            volume.busy = None;

            match outcome {
                VolumeOutcome::Unchanged => {}
                VolumeOutcome::Mounted(mount_point) => {
                    volume.mount_point = Some(mount_point);
                    set_volume_state(&self.notifier, volume, LifecycleState::Mounted);
                }
                VolumeOutcome::Unmounted => {
                    volume.mount_point = None;
                    set_volume_state(&self.notifier, volume, LifecycleState::Unmounted);
                }
                VolumeOutcome::Formatted(fs_type) => {
                    volume.fs_type = Some(fs_type);
                    set_volume_state(&self.notifier, volume, LifecycleState::Mountable);
                }
                VolumeOutcome::Unlocked {
                    dev_path,
                    crypt_name,
                    fs_type,
                    state,
                } => {
                    volume.dev_path = dev_path;
                    volume.crypt_name = Some(crypt_name);
                    volume.fs_type = fs_type;
                    set_volume_state(&self.notifier, volume, state);
                }
            }
            volume.info()
        };

        settle_disk_state(&self.notifier, disk, volumes);
        Ok(info)
    }

    pub fn disks(&self) -> Vec<DiskInfo> {
        self.lock().disks.values().map(DiskEntry::info).collect()
    }

    pub fn volumes(&self) -> Vec<VolumeInfo> {
        self.lock().volumes.values().map(VolumeEntry::info).collect()
    }

    pub fn disk(&self, id: DiskId) -> Option<DiskInfo> {
        self.lock().disks.get(&id).map(DiskEntry::info)
    }

    pub fn volume(&self, id: VolumeId) -> Option<VolumeInfo> {
        self.lock().volumes.get(&id).map(VolumeEntry::info)
    }

    pub fn contains(&self, id: DiskId) -> bool {
        self.lock().disks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().disks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn set_volume_state(notifier: &Notifier, volume: &mut VolumeEntry, next: LifecycleState) -> bool {
    if volume.state == next {
        return true;
    }
    if !volume.state.can_transition_to(next) {
        warn!(volume = %volume.id, "Ignoring illegal transition {} -> {next}", volume.state);
        return false;
    }

    debug!(volume = %volume.id, "{} -> {next}", volume.state);
    volume.state = next;
    notifier.send(Notification::VolumeStateChanged {
        volume: volume.id,
        disk: volume.disk,
        state: next,
    });
    true
}

fn set_disk_state(notifier: &Notifier, disk: &mut DiskEntry, next: LifecycleState) -> bool {
    if disk.state == next {
        return true;
    }
    if !disk.state.can_transition_to(next) {
        warn!(disk = %disk.id, "Ignoring illegal transition {} -> {next}", disk.state);
        return false;
    }

    debug!(disk = %disk.id, "{} -> {next}", disk.state);
    disk.state = next;
    notifier.send(Notification::DiskStateChanged {
        disk: disk.id,
        state: next,
    });
    true
}

/// Derive a disk's state from its volumes once probing has happened.
fn settle_disk_state(
    notifier: &Notifier,
    disk: &mut DiskEntry,
    volumes: &BTreeMap<VolumeId, VolumeEntry>,
) {
    use LifecycleState::*;

    if matches!(disk.state, Created | Removed) {
        return;
    }

    let states: Vec<LifecycleState> = disk
        .volumes
        .iter()
        .filter_map(|id| volumes.get(id))
        .map(|volume| volume.state)
        .collect();
    let any = |state: LifecycleState| states.contains(&state);

    let target = if any(Mounted) {
        Mounted
    } else if matches!(disk.state, Mounted | Unmounted) {
        Unmounted
    } else if any(Mountable) {
        Mountable
    } else if any(Encrypted) {
        Encrypted
    } else {
        Unsupported
    };

    set_disk_state(notifier, disk, target);
}
