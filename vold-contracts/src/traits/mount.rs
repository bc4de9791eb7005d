// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::VoldError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    pub dev_path: PathBuf,
    pub fs_type: String,
    /// Comma separated options, empty for none
    pub mount_options: String,
    pub target: PathBuf,
}

/// Filesystem-specific tooling. Every call may block for a long time.
#[async_trait]
pub trait MountBackend: Send + Sync {
    /// Detect the filesystem on a block device, `None` when nothing is recognised.
    async fn probe(&self, dev_path: &Path) -> Result<Option<String>, VoldError>;

    async fn check(&self, dev_path: &Path, fs_type: &str) -> Result<(), VoldError>;

    async fn mount(&self, request: &MountRequest) -> Result<(), VoldError>;

    async fn unmount(&self, target: &Path) -> Result<(), VoldError>;

    async fn format(&self, dev_path: &Path, fs_type: &str) -> Result<(), VoldError>;
}
