// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::VoldError;

/// External unlock step for encrypted (adoptable) volumes.
#[async_trait]
pub trait CryptBackend: Send + Sync {
    /// Unlock `dev_path` as `name`, returning the cleartext block device.
    async fn unlock(&self, dev_path: &Path, name: &str) -> Result<PathBuf, VoldError>;

    async fn lock(&self, name: &str) -> Result<(), VoldError>;
}
