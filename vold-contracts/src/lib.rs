// SPDX-License-Identifier: GPL-3.0-only

pub mod protocol;
pub mod traits;

pub use protocol::{Notification, VoldError, VoldErrorKind};
pub use traits::{
    CryptBackend, LabelProvider, MountBackend, MountRequest, NoLabels, PropertyPublisher,
    StaticLabel,
};
