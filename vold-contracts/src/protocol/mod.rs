// SPDX-License-Identifier: GPL-3.0-only

pub mod errors;
pub mod notifications;

pub use errors::{VoldError, VoldErrorKind};
pub use notifications::Notification;
