// SPDX-License-Identifier: GPL-3.0-only

//! Disk source registry
//!
//! Built once at startup from the platform fstab and the kernel command line
//! override, immutable afterwards. Sources are scanned in order and the first
//! match wins.

use std::path::Path;

use tracing::{error, info, warn};
use vold_contracts::{VoldError, VoldErrorKind};
use vold_sys::fstab::FstabEntry;
use vold_sys::{cmdline, fstab, partition};
use vold_types::{DiskFlag, DiskSource};

use super::pattern::SysPattern;
use crate::config::VoldConfig;

#[derive(Debug, Clone)]
struct CompiledSource {
    source: DiskSource,
    pattern: SysPattern,
}

#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<CompiledSource>,
    has_adoptable: bool,
}

impl SourceRegistry {
    /// Load sources from the configured platform table and boot override.
    ///
    /// Never fails: an unreadable table leaves only the override (if any).
    pub fn load(config: &VoldConfig) -> Self {
        let entries = fstab::read_fstab(&config.fstab_path).map_err(|e| {
            VoldError::new(
                VoldErrorKind::ConfigUnavailable,
                format!("Failed to open {}: {e}", config.fstab_path.display()),
            )
        });

        let storage_override = cmdline::read_storage_override(&config.cmdline_path)
            .unwrap_or_else(|e| {
                warn!("Failed to read {}: {e}", config.cmdline_path.display());
                None
            });

        Self::build(
            entries,
            storage_override.as_deref(),
            &config.sys_block_path,
            config.default_primary,
        )
    }

    pub fn build(
        entries: Result<Vec<FstabEntry>, VoldError>,
        storage_override: Option<&str>,
        sys_block: &Path,
        force_default_primary: bool,
    ) -> Self {
        let mut registry = Self::default();

        match entries {
            Ok(entries) => {
                for source in entries
                    .iter()
                    .filter_map(|entry| entry.disk_source(force_default_primary))
                {
                    registry.push(source);
                }
            }
            Err(e) => error!("Error reading configuration... continuing anyways: {e}"),
        }

        if let Some(name) = storage_override {
            let (base, partition) = partition::split_device_name(name, sys_block);
            info!("Add SDCARD={base} partnum={partition}");
            registry.push(DiskSource {
                pattern: format!("/devices/*/{base}"),
                nickname: base,
                partition,
                flags: DiskFlag::Adoptable.into(),
                fs_type: "auto".to_string(),
                mount_options: String::new(),
            });
        }

        registry
    }

    fn push(&mut self, source: DiskSource) {
        self.has_adoptable |= source.is_adoptable();
        self.sources.push(CompiledSource {
            pattern: SysPattern::new(&source.pattern),
            source,
        });
    }

    /// First source whose pattern matches `devpath`.
    pub fn find(&self, devpath: &str) -> Option<&DiskSource> {
        self.sources
            .iter()
            .find(|compiled| compiled.pattern.matches(devpath))
            .map(|compiled| &compiled.source)
    }

    pub fn sources(&self) -> impl Iterator<Item = &DiskSource> {
        self.sources.iter().map(|compiled| &compiled.source)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn has_adoptable(&self) -> bool {
        self.has_adoptable
    }
}
