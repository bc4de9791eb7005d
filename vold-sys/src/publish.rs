// SPDX-License-Identifier: GPL-3.0-only

//! File-backed property publishing

use std::fs;
use std::path::PathBuf;

use tracing::info;
use vold_contracts::{PropertyPublisher, VoldError, VoldErrorKind};

/// Publishes each property as `<dir>/<key>`, replaced atomically.
#[derive(Debug, Clone)]
pub struct FilePropertyPublisher {
    dir: PathBuf,
}

impl FilePropertyPublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl PropertyPublisher for FilePropertyPublisher {
    fn publish(&self, key: &str, value: &str) -> Result<(), VoldError> {
        let io_err = |e: std::io::Error| {
            VoldError::new(VoldErrorKind::Internal, format!("Failed to publish {key}: {e}"))
        };

        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let target = self.dir.join(key);
        let staging = self.dir.join(format!(".{key}.tmp"));
        fs::write(&staging, format!("{value}\n")).map_err(io_err)?;
        fs::rename(&staging, &target).map_err(io_err)?;

        info!("Published {key}={value}");
        Ok(())
    }
}
