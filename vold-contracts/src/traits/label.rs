// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use crate::VoldError;

/// Supplies security label contexts for device nodes the daemon creates.
pub trait LabelProvider: Send + Sync {
    fn file_context(&self, path: &Path) -> Result<Option<String>, VoldError>;
}

/// Provider for systems without a labelling policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLabels;

impl LabelProvider for NoLabels {
    fn file_context(&self, _path: &Path) -> Result<Option<String>, VoldError> {
        Ok(None)
    }
}

/// Applies one fixed context to every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticLabel(pub String);

impl LabelProvider for StaticLabel {
    fn file_context(&self, _path: &Path) -> Result<Option<String>, VoldError> {
        Ok(Some(self.0.clone()))
    }
}
