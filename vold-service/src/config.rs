// SPDX-License-Identifier: GPL-3.0-only

//! Daemon configuration
//!
//! Read once at startup from a TOML file. Every field has a default, so a
//! missing file means a stock configuration; a malformed one is fatal.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/vold/vold.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VoldConfig {
    /// Platform table listing the disk sources
    pub fstab_path: PathBuf,
    /// Kernel command line, searched for the `SDCARD=` override
    pub cmdline_path: PathBuf,
    /// Block class directory; an entry here marks a name as a whole disk
    pub sys_block_path: PathBuf,
    pub sysfs_root: PathBuf,
    /// Trees replayed at startup so already-present devices are announced
    pub coldboot_roots: Vec<PathBuf>,
    /// Where private block nodes are created; unset to use kernel nodes
    pub device_node_dir: Option<PathBuf>,
    /// Security label applied to created nodes
    pub device_node_label: Option<String>,
    pub mount_root: PathBuf,
    /// Published properties land here
    pub run_dir: PathBuf,
    /// LUKS key files, one `<name>.key` per mapping
    pub key_dir: PathBuf,
    /// Filesystems treated as mountable; detected when empty
    pub supported_filesystems: Vec<String>,
    pub hotplug_queue_depth: usize,
    /// Notifications buffered per signal subscriber before it starts losing them
    pub notification_queue_depth: usize,
    pub debug: bool,
    /// Flag every managed source as the default primary storage
    pub default_primary: bool,
}

impl Default for VoldConfig {
    fn default() -> Self {
        Self {
            fstab_path: PathBuf::from("/vendor/etc/fstab.vold"),
            cmdline_path: PathBuf::from("/proc/cmdline"),
            sys_block_path: PathBuf::from("/sys/block"),
            sysfs_root: PathBuf::from("/sys"),
            coldboot_roots: vec![PathBuf::from("/sys/block")],
            device_node_dir: Some(PathBuf::from("/dev/block/vold")),
            device_node_label: None,
            mount_root: PathBuf::from("/mnt/media_rw"),
            run_dir: PathBuf::from("/run/vold"),
            key_dir: PathBuf::from("/data/misc/vold/keys"),
            supported_filesystems: Vec::new(),
            hotplug_queue_depth: 256,
            notification_queue_depth: 1024,
            debug: false,
            default_primary: false,
        }
    }
}

impl VoldConfig {
    /// Load `path`, or the default location when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No configuration at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        anyhow::ensure!(
            config.hotplug_queue_depth > 0,
            "hotplug_queue_depth must be at least 1"
        );
        anyhow::ensure!(
            config.notification_queue_depth > 0,
            "notification_queue_depth must be at least 1"
        );
        Ok(config)
    }
}
