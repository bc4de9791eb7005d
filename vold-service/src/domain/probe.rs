// SPDX-License-Identifier: GPL-3.0-only

//! Partition and filesystem discovery for newly registered disks

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use vold_contracts::{LabelProvider, MountBackend, VoldError, VoldErrorKind};
use vold_sys::{devnode, sysfs};
use vold_types::{
    BusyOperation, DeviceNumber, DiskId, DiskInfo, LifecycleState, PartitionNumber, VolumeId,
};

use super::registry::{DiskRegistry, DiskTicket, ProbeReport, ProbedVolume};

/// Filesystem type blkid reports for LUKS containers.
pub const LUKS_FS_TYPE: &str = "crypto_LUKS";

/// Where a volume's block device lives before filesystem detection
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    id: VolumeId,
    partition: PartitionNumber,
    dev_path: PathBuf,
    node: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct Layout {
    disk_node: Option<PathBuf>,
    candidates: Vec<Candidate>,
}

/// Detects volumes on a disk and records the outcome in the registry.
pub struct Prober {
    registry: Arc<DiskRegistry>,
    backend: Arc<dyn MountBackend>,
    labels: Arc<dyn LabelProvider>,
    sysfs_root: PathBuf,
    node_dir: Option<PathBuf>,
    supported: Vec<String>,
}

impl Prober {
    pub fn new(
        registry: Arc<DiskRegistry>,
        backend: Arc<dyn MountBackend>,
        labels: Arc<dyn LabelProvider>,
        sysfs_root: PathBuf,
        node_dir: Option<PathBuf>,
        supported: Vec<String>,
    ) -> Self {
        Self {
            registry,
            backend,
            labels,
            sysfs_root,
            node_dir,
            supported,
        }
    }

    pub fn is_supported(&self, fs_type: &str) -> bool {
        self.supported.iter().any(|supported| supported == fs_type)
    }

    /// Probe a registered disk, replacing its volumes.
    ///
    /// The disk is marked busy for the duration; sysfs access and filesystem
    /// detection happen without the registry lock held.
    pub async fn probe_disk(&self, id: DiskId) -> Result<DiskInfo, VoldError> {
        let ticket = self.registry.begin_disk_op(id, BusyOperation::Probing)?;

        let layout = match self.lay_out(&ticket).await {
            Ok(layout) => layout,
            Err(e) => {
                self.registry.abort_disk_op(&ticket);
                return Err(e);
            }
        };

        let adoptable = ticket.source.is_adoptable();
        let mut volumes = Vec::with_capacity(layout.candidates.len());
        for candidate in layout.candidates {
            let (fs_type, outcome) = self.classify_volume(&candidate.dev_path, adoptable).await;
            debug!(
                volume = %candidate.id,
                "{} holds {} -> {outcome}",
                candidate.dev_path.display(),
                fs_type.as_deref().unwrap_or("nothing recognised"),
            );
            volumes.push(ProbedVolume {
                id: candidate.id,
                partition: candidate.partition,
                dev_path: candidate.dev_path,
                node: candidate.node,
                fs_type,
                outcome,
            });
        }

        let created: Vec<PathBuf> = layout
            .disk_node
            .iter()
            .chain(volumes.iter().filter_map(|volume| volume.node.as_ref()))
            .cloned()
            .collect();

        let report = ProbeReport {
            disk_node: layout.disk_node,
            volumes,
        };
        let probed = match self.registry.finish_probe(&ticket, report) {
            Ok(probed) => probed,
            Err(e) => {
                remove_nodes(self.registry.unclaimed_nodes(created)).await;
                return Err(e);
            }
        };

        remove_nodes(probed.stale_nodes).await;
        let info = probed.info;
        info!(disk = %id, "Probed {} volume(s), disk is {}", info.volumes.len(), info.state);
        Ok(info)
    }

    /// Detect the filesystem on `dev_path` and decide what the volume can become.
    pub async fn classify_volume(
        &self,
        dev_path: &Path,
        adoptable: bool,
    ) -> (Option<String>, LifecycleState) {
        let fs_type = match self.backend.probe(dev_path).await {
            Ok(fs_type) => fs_type,
            Err(e) => {
                warn!("Failed to probe {}: {e}", dev_path.display());
                None
            }
        };

        let outcome = match fs_type.as_deref() {
            Some(fs) if self.is_supported(fs) => LifecycleState::Mountable,
            Some(LUKS_FS_TYPE) if adoptable => LifecycleState::Encrypted,
            _ => LifecycleState::Unsupported,
        };
        (fs_type, outcome)
    }

    async fn lay_out(&self, ticket: &DiskTicket) -> Result<Layout, VoldError> {
        let disk_dir = self
            .sysfs_root
            .join(ticket.sysfs_path.trim_start_matches('/'));
        let device = ticket.disk.device();
        let devname = ticket.devname.clone();
        let wanted = ticket.source.partition;
        let node_dir = self.node_dir.clone();
        let labels = Arc::clone(&self.labels);

        tokio::task::spawn_blocking(move || {
            lay_out_blocking(&disk_dir, device, devname, wanted, node_dir.as_deref(), &*labels)
        })
        .await
        .map_err(|e| VoldError::new(VoldErrorKind::Internal, format!("Probe task failed: {e}")))
    }
}

fn lay_out_blocking(
    disk_dir: &Path,
    device: DeviceNumber,
    devname: Option<String>,
    wanted: PartitionNumber,
    node_dir: Option<&Path>,
    labels: &dyn LabelProvider,
) -> Layout {
    let partitions = sysfs::list_partitions(disk_dir).unwrap_or_else(|e| {
        warn!("Failed to list partitions under {}: {e}", disk_dir.display());
        Vec::new()
    });

    let found: Vec<(VolumeId, PartitionNumber, Option<String>)> = if partitions.is_empty() {
        vec![(VolumeId(device), PartitionNumber::WholeDisk, devname)]
    } else {
        partitions
            .into_iter()
            .filter(|partition| wanted.index().is_none_or(|index| index == partition.index))
            .map(|partition| {
                (
                    VolumeId(partition.device),
                    PartitionNumber::Index(partition.index),
                    Some(partition.name),
                )
            })
            .collect()
    };

    let disk_node =
        node_dir.and_then(|dir| make_node(dir, &DiskId(device).to_string(), device, labels));

    let candidates = found
        .into_iter()
        .map(|(id, partition, name)| {
            let node = node_dir.and_then(|dir| make_node(dir, &id.to_string(), id.0, labels));
            let dev_path = node
                .clone()
                .unwrap_or_else(|| kernel_dev_path(id.0, name.as_deref()));
            Candidate {
                id,
                partition,
                dev_path,
                node,
            }
        })
        .collect();

    Layout {
        disk_node,
        candidates,
    }
}

fn make_node(
    dir: &Path,
    name: &str,
    device: DeviceNumber,
    labels: &dyn LabelProvider,
) -> Option<PathBuf> {
    match devnode::create_block_node(dir, name, device, labels) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("Failed to create node {name} in {}: {e}", dir.display());
            None
        }
    }
}

/// Delete private nodes off the runtime's worker threads.
pub(crate) async fn remove_nodes(nodes: Vec<PathBuf>) {
    if nodes.is_empty() {
        return;
    }

    let result = tokio::task::spawn_blocking(move || {
        for node in &nodes {
            if let Err(e) = devnode::remove_block_node(node) {
                warn!("Failed to remove {}: {e}", node.display());
            }
        }
    })
    .await;
    if let Err(e) = result {
        warn!("Node cleanup task failed: {e}");
    }
}

/// Device path as exposed by devtmpfs.
fn kernel_dev_path(device: DeviceNumber, name: Option<&str>) -> PathBuf {
    match name {
        Some(name) => Path::new("/dev").join(name),
        None => PathBuf::from(format!("/dev/block/{}:{}", device.major, device.minor)),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use vold_contracts::NoLabels;

    use super::*;
    use crate::domain::notifier::Notifier;
    use crate::domain::registry::NewDisk;
    use crate::domain::registry::tests::sdcard_source;
    use crate::hotplug::clean_up;
    use crate::testing::{Call, FakeBackend, RecordingLabels, can_make_nodes};

    fn supported() -> Vec<String> {
        vec!["vfat".to_string(), "ext4".to_string()]
    }

    fn fake_partition(disk_dir: &Path, name: &str, index: u32, dev: &str) {
        let dir = disk_dir.join(name);
        fs::create_dir_all(&dir).expect("mkdir partition");
        fs::write(dir.join("partition"), format!("{index}\n")).expect("write partition");
        fs::write(dir.join("dev"), format!("{dev}\n")).expect("write dev");
    }

    fn setup(
        sysfs: &Path,
        source: vold_types::DiskSource,
        backend: &FakeBackend,
    ) -> (Arc<DiskRegistry>, Prober, DiskId) {
        setup_with_nodes(sysfs, source, backend, None, Arc::new(NoLabels))
    }

    fn setup_with_nodes(
        sysfs: &Path,
        source: vold_types::DiskSource,
        backend: &FakeBackend,
        node_dir: Option<&Path>,
        labels: Arc<dyn LabelProvider>,
    ) -> (Arc<DiskRegistry>, Prober, DiskId) {
        let registry = Arc::new(DiskRegistry::new(Notifier::new(64)));
        let id = DiskId(DeviceNumber::new(179, 32));
        registry
            .insert_disk(NewDisk {
                id,
                sysfs_path: "/devices/soc/mmcblk1".to_string(),
                devname: Some("mmcblk1".to_string()),
                source,
            })
            .expect("insert");

        let prober = Prober::new(
            Arc::clone(&registry),
            Arc::new(backend.clone()),
            labels,
            sysfs.to_path_buf(),
            node_dir.map(Path::to_path_buf),
            supported(),
        );
        (registry, prober, id)
    }

    #[tokio::test]
    async fn disk_without_partitions_yields_whole_disk_volume() {
        let sysfs = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(sysfs.path().join("devices/soc/mmcblk1")).expect("mkdir");

        let backend = FakeBackend::default().with_filesystem("/dev/mmcblk1", "vfat");
        let (registry, prober, id) = setup(sysfs.path(), sdcard_source(), &backend);

        let info = prober.probe_disk(id).await.expect("probe");
        assert_eq!(info.state, LifecycleState::Mountable);

        let volumes = registry.volumes();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].id, VolumeId(DeviceNumber::new(179, 32)));
        assert_eq!(volumes[0].partition, PartitionNumber::WholeDisk);
        assert_eq!(volumes[0].dev_path, "/dev/mmcblk1");
        assert_eq!(volumes[0].fs_type.as_deref(), Some("vfat"));
        assert_eq!(backend.calls(), vec![Call::Probe(PathBuf::from("/dev/mmcblk1"))]);
    }

    #[tokio::test]
    async fn partitions_are_classified_individually() {
        let sysfs = tempfile::tempdir().expect("tempdir");
        let disk_dir = sysfs.path().join("devices/soc/mmcblk1");
        fake_partition(&disk_dir, "mmcblk1p1", 1, "179:33");
        fake_partition(&disk_dir, "mmcblk1p2", 2, "179:34");

        let backend = FakeBackend::default()
            .with_filesystem("/dev/mmcblk1p1", "btrfs")
            .with_filesystem("/dev/mmcblk1p2", LUKS_FS_TYPE);
        let (registry, prober, id) = setup(sysfs.path(), sdcard_source(), &backend);

        let info = prober.probe_disk(id).await.expect("probe");
        assert_eq!(info.state, LifecycleState::Encrypted);

        let states: Vec<_> = registry.volumes().iter().map(|v| v.state).collect();
        assert_eq!(states, vec![LifecycleState::Unsupported, LifecycleState::Encrypted]);
    }

    #[tokio::test]
    async fn fixed_partition_number_restricts_volumes() {
        let sysfs = tempfile::tempdir().expect("tempdir");
        let disk_dir = sysfs.path().join("devices/soc/mmcblk1");
        fake_partition(&disk_dir, "mmcblk1p1", 1, "179:33");
        fake_partition(&disk_dir, "mmcblk1p2", 2, "179:34");

        let mut source = sdcard_source();
        source.partition = PartitionNumber::Index(2);
        let backend = FakeBackend::default().with_filesystem("/dev/mmcblk1p2", "ext4");
        let (registry, prober, id) = setup(sysfs.path(), source, &backend);

        prober.probe_disk(id).await.expect("probe");
        let volumes = registry.volumes();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].partition, PartitionNumber::Index(2));
        assert_eq!(volumes[0].state, LifecycleState::Mountable);
    }

    #[tokio::test]
    async fn luks_on_non_adoptable_disk_is_unsupported() {
        let sysfs = tempfile::tempdir().expect("tempdir");
        let mut source = sdcard_source();
        source.flags = Default::default();
        let backend = FakeBackend::default().with_filesystem("/dev/mmcblk1", LUKS_FS_TYPE);
        let (_registry, prober, id) = setup(sysfs.path(), source, &backend);

        let info = prober.probe_disk(id).await.expect("probe");
        assert_eq!(info.state, LifecycleState::Unsupported);
    }

    #[tokio::test]
    async fn probing_unknown_disk_is_not_found() {
        let sysfs = tempfile::tempdir().expect("tempdir");
        let backend = FakeBackend::default();
        let (_registry, prober, _id) = setup(sysfs.path(), sdcard_source(), &backend);

        let err = prober
            .probe_disk(DiskId(DeviceNumber::new(8, 0)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, VoldErrorKind::NotFound);
    }

    fn node_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    #[tokio::test]
    async fn nodes_follow_the_disk_from_probe_to_departure() {
        if !can_make_nodes() {
            eprintln!("skipping: creating block nodes needs root");
            return;
        }

        let sysfs = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(sysfs.path().join("devices/soc/mmcblk1")).expect("mkdir");
        let nodes = tempfile::tempdir().expect("tempdir");
        let node_dir = nodes.path().join("vold");
        let public = node_dir.join("public:179,32");

        let backend = FakeBackend::default().with_filesystem(public.clone(), "vfat");
        let labels = Arc::new(RecordingLabels::default());
        let (registry, prober, id) = setup_with_nodes(
            sysfs.path(),
            sdcard_source(),
            &backend,
            Some(&node_dir),
            labels.clone(),
        );

        let info = prober.probe_disk(id).await.expect("probe");
        assert_eq!(info.state, LifecycleState::Mountable);
        assert_eq!(node_names(&node_dir), vec!["disk:179,32", "public:179,32"]);
        assert_eq!(registry.volumes()[0].dev_path, public.display().to_string());
        assert_eq!(
            *labels.asked.lock().unwrap(),
            vec![node_dir.join("disk:179,32"), public.clone()]
        );

        let removed = registry.remove_disk(id).expect("remove");
        assert_eq!(removed.nodes.len(), 2);
        clean_up(removed, Arc::new(backend.clone()), Arc::new(backend.clone())).await;
        assert!(node_names(&node_dir).is_empty());
    }

    #[tokio::test]
    async fn abandoned_probe_removes_the_nodes_it_created() {
        if !can_make_nodes() {
            eprintln!("skipping: creating block nodes needs root");
            return;
        }

        let sysfs = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(sysfs.path().join("devices/soc/mmcblk1")).expect("mkdir");
        let nodes = tempfile::tempdir().expect("tempdir");
        let node_dir = nodes.path().join("vold");

        let backend = FakeBackend::default();
        let (registry, prober, id) = setup_with_nodes(
            sysfs.path(),
            sdcard_source(),
            &backend,
            Some(&node_dir),
            Arc::new(NoLabels),
        );

        let racing = Arc::clone(&registry);
        backend.during_probe(move || {
            let removed = racing.remove_disk(id).expect("remove during probe");
            assert!(removed.nodes.is_empty());
        });

        let err = prober.probe_disk(id).await.unwrap_err();
        assert_eq!(err.kind, VoldErrorKind::DeviceRemovedDuringOperation);
        assert!(registry.is_empty());
        assert!(node_names(&node_dir).is_empty());
    }
}
