// SPDX-License-Identifier: GPL-3.0-only

//! Kernel command line overrides

use std::path::Path;

use tracing::debug;

use crate::error::Result;

/// Boot parameter naming a removable device to manage as adoptable storage.
pub const SDCARD_KEY: &str = "SDCARD=";

/// Read the kernel command line and return the storage override, if any.
///
/// A missing command line file is not an error; the override is simply absent.
pub fn read_storage_override(cmdline_path: &Path) -> Result<Option<String>> {
    let cmdline = match std::fs::read_to_string(cmdline_path) {
        Ok(cmdline) => cmdline,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No kernel command line at {}", cmdline_path.display());
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    Ok(find_storage_override(&cmdline).map(str::to_string))
}

/// Extract the `SDCARD=` value from a command line; empty values count as absent.
pub fn find_storage_override(cmdline: &str) -> Option<&str> {
    let start = cmdline.find(SDCARD_KEY)? + SDCARD_KEY.len();
    let rest = &cmdline[start..];
    let value = rest
        .split(|c: char| c == ' ' || c == '\n')
        .next()
        .unwrap_or_default();

    if value.is_empty() { None } else { Some(value) }
}
