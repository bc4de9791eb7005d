// SPDX-License-Identifier: GPL-3.0-only

pub mod crypt;
pub mod label;
pub mod mount;
pub mod publish;

pub use crypt::CryptBackend;
pub use label::{LabelProvider, NoLabels, StaticLabel};
pub use mount::{MountBackend, MountRequest};
pub use publish::PropertyPublisher;
