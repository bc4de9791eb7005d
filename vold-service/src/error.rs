// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;
use vold_contracts::{VoldError, VoldErrorKind};
use zbus::fdo;

/// Errors returned over the command surface
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Vold(#[from] VoldError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ServiceError> for fdo::Error {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidArgument(msg) => fdo::Error::InvalidArgs(msg),
            ServiceError::Vold(e) => match e.kind {
                VoldErrorKind::InvalidInput => fdo::Error::InvalidArgs(e.message),
                VoldErrorKind::UnsupportedFilesystem => fdo::Error::NotSupported(e.message),
                VoldErrorKind::NotFound => {
                    fdo::Error::Failed(format!("Device not found: {}", e.message))
                }
                _ => fdo::Error::Failed(format!(
                    "{} ({}): {}",
                    kind_name(e.kind),
                    e.kind.code(),
                    e.message
                )),
            },
            _ => fdo::Error::Failed(err.to_string()),
        }
    }
}

fn kind_name(kind: VoldErrorKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{kind:?}"))
}
