// SPDX-License-Identifier: GPL-3.0-only

//! Platform storage table (fs_mgr style fstab)
//!
//! Each line is `<blk_device> <mount_point> <fs_type> <mnt_options> <fs_mgr_flags>`.
//! Only entries flagged `voldmanaged=<label>:<partnum|auto>` describe devices
//! this daemon manages.

use std::path::Path;

use enumflags2::BitFlags;
use tracing::warn;
use vold_types::{DiskFlag, DiskSource, PartitionNumber};

use crate::error::Result;

const ENCRYPTABLE_FLAGS: &[&str] = &["encryptable", "forceencrypt", "forcefdeorfbe"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    pub blk_device: String,
    pub mount_point: String,
    pub fs_type: String,
    pub mount_options: String,
    pub fs_mgr_flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoldManaged {
    pub label: String,
    pub partition: PartitionNumber,
}

impl FstabEntry {
    fn flag_value(&self, name: &str) -> Option<&str> {
        self.fs_mgr_flags.iter().find_map(|flag| {
            flag.strip_prefix(name)
                .and_then(|rest| rest.strip_prefix('='))
        })
    }

    fn has_flag(&self, name: &str) -> bool {
        self.fs_mgr_flags
            .iter()
            .any(|flag| flag == name || flag.split_once('=').is_some_and(|(key, _)| key == name))
    }

    pub fn vold_managed(&self) -> Option<VoldManaged> {
        let value = self.flag_value("voldmanaged")?;
        let (label, partnum) = value.split_once(':').unwrap_or((value, "auto"));

        let partition = match partnum {
            "auto" => PartitionNumber::WholeDisk,
            number => match number.parse() {
                Ok(index) => PartitionNumber::Index(index),
                Err(_) => {
                    warn!("Invalid voldmanaged partition {number:?} for {}", self.blk_device);
                    PartitionNumber::WholeDisk
                }
            },
        };

        Some(VoldManaged {
            label: label.to_string(),
            partition,
        })
    }

    pub fn is_encryptable(&self) -> bool {
        ENCRYPTABLE_FLAGS.iter().any(|flag| self.has_flag(flag))
    }

    /// Convert a vold-managed entry into a disk source.
    pub fn disk_source(&self, force_default_primary: bool) -> Option<DiskSource> {
        let managed = self.vold_managed()?;

        let mut flags = BitFlags::empty();
        if self.is_encryptable() {
            flags |= DiskFlag::Adoptable;
        }
        if self.has_flag("noemulatedsd") || force_default_primary {
            flags |= DiskFlag::DefaultPrimary;
        }
        if self.has_flag("nonremovable") {
            flags |= DiskFlag::NonRemovable;
        }

        Some(DiskSource {
            pattern: self.blk_device.clone(),
            nickname: managed.label,
            partition: managed.partition,
            flags,
            fs_type: self.fs_type.clone(),
            mount_options: self.mount_options.clone(),
        })
    }
}

pub fn read_fstab(path: &Path) -> Result<Vec<FstabEntry>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(parse_fstab(&contents))
}

pub fn parse_fstab(contents: &str) -> Vec<FstabEntry> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [blk_device, mount_point, fs_type, options, flags, ..] = fields[..] else {
                warn!("Skipping malformed fstab line: {line}");
                return None;
            };

            Some(FstabEntry {
                blk_device: blk_device.to_string(),
                mount_point: mount_point.to_string(),
                fs_type: fs_type.to_string(),
                mount_options: normalize_options(options),
                fs_mgr_flags: flags.split(',').map(str::to_string).collect(),
            })
        })
        .collect()
}

fn normalize_options(options: &str) -> String {
    options
        .split(',')
        .filter(|option| !option.is_empty() && *option != "defaults")
        .collect::<Vec<_>>()
        .join(",")
}
