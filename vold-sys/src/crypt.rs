// SPDX-License-Identifier: GPL-3.0-only

//! Unlock backend for adoptable storage using cryptsetup and per-volume key files

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;
use vold_contracts::{CryptBackend, VoldError, VoldErrorKind};

use crate::mount::require_tool;

const MAPPER_DIR: &str = "/dev/mapper";

/// Opens LUKS containers with keys stored as `<key_dir>/<name>.key`.
#[derive(Debug, Clone)]
pub struct CryptsetupBackend {
    key_dir: PathBuf,
}

impl CryptsetupBackend {
    pub fn new(key_dir: impl Into<PathBuf>) -> Self {
        Self {
            key_dir: key_dir.into(),
        }
    }

    fn key_file(&self, name: &str) -> PathBuf {
        self.key_dir.join(format!("{name}.key"))
    }
}

async fn cryptsetup(args: &[&OsStr]) -> Result<(), VoldError> {
    require_tool("cryptsetup")?;

    let output = Command::new("cryptsetup")
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            VoldError::new(
                VoldErrorKind::Internal,
                format!("Failed to run cryptsetup: {e}"),
            )
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(VoldError::mount_failed(format!(
            "cryptsetup exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

#[async_trait]
impl CryptBackend for CryptsetupBackend {
    async fn unlock(&self, dev_path: &Path, name: &str) -> Result<PathBuf, VoldError> {
        let key_file = self.key_file(name);
        if !key_file.exists() {
            return Err(VoldError::new(
                VoldErrorKind::NotFound,
                format!("No key for {name} in {}", self.key_dir.display()),
            ));
        }

        cryptsetup(&[
            OsStr::new("open"),
            OsStr::new("--type"),
            OsStr::new("luks"),
            OsStr::new("--key-file"),
            key_file.as_os_str(),
            dev_path.as_os_str(),
            OsStr::new(name),
        ])
        .await?;

        info!("Unlocked {} as {name}", dev_path.display());
        Ok(Path::new(MAPPER_DIR).join(name))
    }

    async fn lock(&self, name: &str) -> Result<(), VoldError> {
        cryptsetup(&[OsStr::new("close"), OsStr::new(name)]).await
    }
}
