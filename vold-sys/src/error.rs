// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;
use vold_contracts::{VoldError, VoldErrorKind};

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System call failed: {0}")]
    Errno(#[from] nix::errno::Errno),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Tool not available: {0}")]
    ToolMissing(String),
}

impl From<SysError> for VoldError {
    fn from(err: SysError) -> Self {
        let kind = match &err {
            SysError::Parse(_) => VoldErrorKind::InvalidInput,
            SysError::ToolMissing(_) => VoldErrorKind::UnsupportedFilesystem,
            _ => VoldErrorKind::Internal,
        };
        VoldError::new(kind, err.to_string())
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
