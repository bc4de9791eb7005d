// SPDX-License-Identifier: GPL-3.0-only

//! vold - storage volume daemon
//!
//! Discovers block devices through kernel uevents, classifies them against
//! the platform disk sources and drives each managed disk through its
//! lifecycle, exposing the result on the D-Bus system bus.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::Result;
use clap::Parser;
use vold_contracts::{LabelProvider, NoLabels, StaticLabel};
use vold_sys::{CryptsetupBackend, FilePropertyPublisher, ToolMountBackend, filesystems};

mod config;
mod domain;
mod error;
mod handlers;
mod hotplug;
mod logging;
mod service;
mod startup;
#[cfg(test)]
mod testing;

use config::VoldConfig;
use domain::{Classifier, DiskRegistry, Notifier, Prober, SourceRegistry, VolumeCommands};
use hotplug::{EventLoop, NetlinkHotplug, UEVENT_RCVBUF};
use service::DbusSurface;
use startup::{Startup, SysfsColdboot};

#[derive(Debug, Parser)]
#[command(name = "vold")]
#[command(about = "Storage volume daemon", version)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = VoldConfig::load(Some(args.config.as_path()))?;
    let log_control = Arc::new(logging::init(args.debug || config.debug)?);

    tracing::info!("vold {} firing up", env!("CARGO_PKG_VERSION"));

    if unsafe { libc::geteuid() } != 0 {
        tracing::error!("vold must run as root");
        anyhow::bail!("Daemon must run with root privileges");
    }

    let supported = if config.supported_filesystems.is_empty() {
        filesystems::detect_supported(Path::new("/proc/filesystems"))
    } else {
        config.supported_filesystems.clone()
    };
    tracing::info!("Detected support for: {}", supported.join(" "));

    // Core managers exist before any event source is started
    let notifier = Notifier::new(config.notification_queue_depth);
    let registry = Arc::new(DiskRegistry::new(notifier.clone()));

    let sources = Arc::new(SourceRegistry::load(&config));
    tracing::info!(
        "Loaded {} disk source(s), adoptable storage {}",
        sources.len(),
        if sources.has_adoptable() { "available" } else { "absent" }
    );

    let backend = Arc::new(ToolMountBackend::new());
    let crypt = Arc::new(CryptsetupBackend::new(config.key_dir.clone()));
    let labels: Arc<dyn LabelProvider> = match &config.device_node_label {
        Some(context) => Arc::new(StaticLabel(context.clone())),
        None => Arc::new(NoLabels),
    };

    let prober = Arc::new(Prober::new(
        Arc::clone(&registry),
        backend.clone(),
        labels,
        config.sysfs_root.clone(),
        config.device_node_dir.clone(),
        supported,
    ));
    let commands = Arc::new(VolumeCommands::new(
        Arc::clone(&registry),
        Arc::clone(&prober),
        backend.clone(),
        crypt.clone(),
        log_control,
        config.mount_root.clone(),
    ));

    let published = Arc::new(AtomicBool::new(false));
    let startup = Startup {
        hotplug: Box::new(NetlinkHotplug::new(UEVENT_RCVBUF)),
        event_loop: EventLoop::new(
            Classifier::new(Arc::clone(&sources), Arc::clone(&registry)),
            prober,
            backend,
            crypt,
        ),
        coldboot: Box::new(SysfsColdboot::new(config.coldboot_roots.clone())),
        surface: Box::new(DbusSurface::new(commands, notifier, Arc::clone(&published))),
        publisher: Box::new(FilePropertyPublisher::new(config.run_dir.clone())),
        has_adoptable: sources.has_adoptable(),
        published,
        queue_depth: config.hotplug_queue_depth,
    };

    let (_surface, events) = startup.run().await.map_err(|e| {
        tracing::error!("Startup failed: {e}");
        anyhow::Error::new(e)
    })?;

    tracing::info!("vold ready with {} disk(s), waiting for requests...", registry.len());
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Received shutdown signal");
        }
        _ = events => {
            tracing::error!("Hotplug event loop stopped");
        }
    }

    tracing::info!("vold shutting down");
    Ok(())
}
