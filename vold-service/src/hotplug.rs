// SPDX-License-Identifier: GPL-3.0-only

//! Hotplug event source and the classifier loop
//!
//! The kernel socket is read on a dedicated thread and events are forwarded
//! through a bounded channel to a single consumer task, which classifies them
//! in kernel order. Probing and cleanup run on their own tasks so a slow
//! device never stalls the stream.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use vold_contracts::{CryptBackend, MountBackend, VoldError, VoldErrorKind};
use vold_sys::UeventSocket;
use vold_types::{DiskId, Uevent};

use crate::domain::probe::remove_nodes;
use crate::domain::{Classification, Classifier, Prober, RemovedDisk};

/// Kernel receive buffer requested for the uevent socket.
pub const UEVENT_RCVBUF: usize = 64 * 1024;

/// Something that delivers kernel device events.
///
/// `start` must only return once events are being captured, so that anything
/// the kernel emits afterwards reaches `events`.
pub trait HotplugSource: Send {
    fn start(self: Box<Self>, events: mpsc::Sender<Uevent>) -> Result<(), VoldError>;
}

pub struct NetlinkHotplug {
    rcvbuf: usize,
}

impl NetlinkHotplug {
    pub fn new(rcvbuf: usize) -> Self {
        Self { rcvbuf }
    }
}

impl HotplugSource for NetlinkHotplug {
    fn start(self: Box<Self>, events: mpsc::Sender<Uevent>) -> Result<(), VoldError> {
        let mut socket = UeventSocket::open(self.rcvbuf).map_err(|e| {
            VoldError::new(
                VoldErrorKind::ManagerStartFailure,
                format!("Unable to open uevent socket: {e}"),
            )
        })?;

        std::thread::Builder::new()
            .name("vold-uevent".to_string())
            .spawn(move || {
                loop {
                    match socket.recv() {
                        Ok(event) => {
                            if events.blocking_send(event).is_err() {
                                debug!("Event loop gone, uevent listener exiting");
                                break;
                            }
                        }
                        Err(e) => {
                            error!("uevent socket failed: {e}");
                            break;
                        }
                    }
                }
            })
            .map_err(|e| {
                VoldError::new(
                    VoldErrorKind::ManagerStartFailure,
                    format!("Unable to spawn uevent listener: {e}"),
                )
            })?;

        info!("Listening for kernel uevents");
        Ok(())
    }
}

/// Consumes hotplug events and drives the registry.
pub struct EventLoop {
    classifier: Classifier,
    prober: Arc<Prober>,
    backend: Arc<dyn MountBackend>,
    crypt: Arc<dyn CryptBackend>,
}

impl EventLoop {
    pub fn new(
        classifier: Classifier,
        prober: Arc<Prober>,
        backend: Arc<dyn MountBackend>,
        crypt: Arc<dyn CryptBackend>,
    ) -> Self {
        Self {
            classifier,
            prober,
            backend,
            crypt,
        }
    }

    pub fn spawn(self, mut events: mpsc::Receiver<Uevent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.dispatch(&event);
            }
            debug!("Hotplug channel closed");
        })
    }

    fn dispatch(&self, event: &Uevent) {
        match self.classifier.classify(event) {
            Ok(Classification::Arrived(info)) => self.spawn_probe(info.id),
            Ok(Classification::Changed(id)) => {
                debug!(disk = %id, "Media changed, re-probing");
                self.spawn_probe(id);
            }
            Ok(Classification::Departed(removed)) => self.spawn_cleanup(removed),
            Ok(Classification::Ignored) => {}
            Err(e) => match e.kind {
                VoldErrorKind::NoMatchingSource => trace!("{}", e.message),
                VoldErrorKind::DeviceAlreadyKnown | VoldErrorKind::NotFound => {
                    debug!("Discarding {} {}: {}", event.action, event.devpath, e.message)
                }
                _ => warn!("Failed to handle {} {}: {e}", event.action, event.devpath),
            },
        }
    }

    fn spawn_probe(&self, id: DiskId) {
        let prober = Arc::clone(&self.prober);
        tokio::spawn(async move {
            if let Err(e) = prober.probe_disk(id).await {
                match e.kind {
                    VoldErrorKind::DeviceRemovedDuringOperation | VoldErrorKind::NotFound => {
                        debug!(disk = %id, "Probe abandoned: {}", e.message)
                    }
                    VoldErrorKind::Busy => info!(disk = %id, "Re-probe skipped: {}", e.message),
                    _ => warn!(disk = %id, "Probe failed: {e}"),
                }
            }
        });
    }

    fn spawn_cleanup(&self, removed: RemovedDisk) {
        let backend = Arc::clone(&self.backend);
        let crypt = Arc::clone(&self.crypt);
        tokio::spawn(clean_up(removed, backend, crypt));
    }
}

/// Release what a vanished disk left behind: mounts, mappings and nodes.
pub async fn clean_up(
    removed: RemovedDisk,
    backend: Arc<dyn MountBackend>,
    crypt: Arc<dyn CryptBackend>,
) {
    let disk = removed.info.id;

    for target in &removed.mounted {
        if let Err(e) = backend.unmount(target).await {
            warn!(disk = %disk, "Failed to detach {}: {e}", target.display());
        }
    }

    for name in &removed.crypt_names {
        if let Err(e) = crypt.lock(name).await {
            warn!(disk = %disk, "Failed to close {name}: {e}");
        }
    }

    remove_nodes(removed.nodes).await;
}
