// SPDX-License-Identifier: GPL-3.0-only

pub mod volumes;

pub use volumes::{VolumesHandler, forward_notifications};
