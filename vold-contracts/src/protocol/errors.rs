// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoldErrorKind {
    /// Platform configuration could not be read; the registry stays empty
    ConfigUnavailable,
    /// A core manager or listener failed to start; the daemon exits
    ManagerStartFailure,
    /// An event matched no disk source and was dropped
    NoMatchingSource,
    /// A replayed device was already registered
    DeviceAlreadyKnown,
    UnsupportedFilesystem,
    MountOperationFailed,
    /// The device vanished while an operation on it was in flight
    DeviceRemovedDuringOperation,
    NotFound,
    Busy,
    InvalidState,
    InvalidInput,
    Internal,
}

impl VoldErrorKind {
    pub fn code(self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::NotFound | Self::NoMatchingSource => 404,
            Self::DeviceAlreadyKnown | Self::InvalidState => 409,
            Self::DeviceRemovedDuringOperation => 410,
            Self::Busy => 423,
            Self::UnsupportedFilesystem => 501,
            Self::MountOperationFailed => 502,
            Self::ConfigUnavailable | Self::ManagerStartFailure => 503,
            Self::Internal => 500,
        }
    }

    /// Whether the daemon cannot continue after an error of this kind.
    pub fn is_fatal(self) -> bool {
        self == Self::ManagerStartFailure
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct VoldError {
    pub kind: VoldErrorKind,
    pub message: String,
}

impl VoldError {
    pub fn new(kind: VoldErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(VoldErrorKind::NotFound, message)
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(VoldErrorKind::Busy, message)
    }

    pub fn removed(message: impl Into<String>) -> Self {
        Self::new(VoldErrorKind::DeviceRemovedDuringOperation, message)
    }

    pub fn mount_failed(message: impl Into<String>) -> Self {
        Self::new(VoldErrorKind::MountOperationFailed, message)
    }
}
