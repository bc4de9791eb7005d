// SPDX-License-Identifier: GPL-3.0-only

//! Startup sequencing
//!
//! The order is strict: the event consumer and kernel listener come up
//! first, then already-present devices are replayed, then clients may
//! connect, and only then is readiness published to other processes.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vold_contracts::{PropertyPublisher, VoldError, VoldErrorKind};
use vold_sys::coldboot;

use crate::hotplug::{EventLoop, HotplugSource};

pub const HAS_ADOPTABLE_KEY: &str = "has_adoptable";

/// Re-announces devices that were present before the listener started.
#[async_trait]
pub trait Coldboot: Send + Sync {
    async fn replay(&self);
}

/// Replays the configured sysfs trees by writing to their `uevent` attributes.
pub struct SysfsColdboot {
    roots: Vec<PathBuf>,
}

impl SysfsColdboot {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }
}

#[async_trait]
impl Coldboot for SysfsColdboot {
    async fn replay(&self) {
        for root in self.roots.iter().cloned() {
            let shown = root.display().to_string();
            if let Err(e) = tokio::task::spawn_blocking(move || coldboot::replay(&root)).await {
                warn!("Coldboot of {shown} did not complete: {e}");
            }
        }
    }
}

/// The client-facing command channel.
#[async_trait]
pub trait CommandSurface: Send + Sync {
    /// Begin accepting requests. Returns once clients can connect.
    async fn start(&self) -> Result<(), VoldError>;
}

pub struct Startup {
    pub hotplug: Box<dyn HotplugSource>,
    pub event_loop: EventLoop,
    pub coldboot: Box<dyn Coldboot>,
    pub surface: Box<dyn CommandSurface>,
    pub publisher: Box<dyn PropertyPublisher>,
    pub has_adoptable: bool,
    /// Mirrors the published flag for in-process readers
    pub published: Arc<AtomicBool>,
    pub queue_depth: usize,
}

fn fatal(err: VoldError) -> VoldError {
    if err.kind.is_fatal() {
        err
    } else {
        VoldError::new(VoldErrorKind::ManagerStartFailure, err.message)
    }
}

impl Startup {
    /// Bring the daemon up. Any error returned is fatal.
    ///
    /// The returned surface must be kept alive for as long as the daemon runs.
    pub async fn run(self) -> Result<(Box<dyn CommandSurface>, JoinHandle<()>), VoldError> {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let events = self.event_loop.spawn(rx);

        self.hotplug.start(tx).map_err(fatal)?;

        info!("Coldboot replay starting");
        self.coldboot.replay().await;
        info!("Coldboot replay finished");

        self.surface.start().await.map_err(fatal)?;

        let value = if self.has_adoptable { "1" } else { "0" };
        if let Err(e) = self.publisher.publish(HAS_ADOPTABLE_KEY, value) {
            warn!("Failed to publish {HAS_ADOPTABLE_KEY}: {e}");
        }
        self.published.store(self.has_adoptable, Ordering::SeqCst);

        Ok((self.surface, events))
    }
}
