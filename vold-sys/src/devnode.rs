// SPDX-License-Identifier: GPL-3.0-only

//! Private block device nodes

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use nix::sys::stat::{Mode, SFlag, makedev, mknod};
use tracing::warn;
use vold_contracts::LabelProvider;
use vold_types::DeviceNumber;

use crate::error::Result;

const SELINUX_XATTR: &str = "security.selinux";

/// Create (or replace) block node `dir/name` for `device`, labelled by `labels`.
///
/// Label failures are logged and do not fail node creation.
pub fn create_block_node(
    dir: &Path,
    name: &str,
    device: DeviceNumber,
    labels: &dyn LabelProvider,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(name);

    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    mknod(
        &path,
        SFlag::S_IFBLK,
        Mode::from_bits_truncate(0o600),
        makedev(device.major.into(), device.minor.into()),
    )?;

    match labels.file_context(&path) {
        Ok(Some(context)) => {
            if let Err(e) = set_label(&path, &context) {
                warn!("Failed to label {}: {e}", path.display());
            }
        }
        Ok(None) => {}
        Err(e) => warn!("No label context for {}: {e}", path.display()),
    }

    Ok(path)
}

pub fn remove_block_node(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn set_label(path: &Path, context: &str) -> io::Result<()> {
    let path = CString::new(path.as_os_str().as_bytes())?;
    let name = CString::new(SELINUX_XATTR)?;
    let value = CString::new(context)?;
    let value = value.as_bytes_with_nul();

    // SAFETY: all pointers come from live CStrings and the length matches `value`.
    let rc = unsafe {
        libc::lsetxattr(
            path.as_ptr(),
            name.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            0,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
