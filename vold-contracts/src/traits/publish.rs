// SPDX-License-Identifier: GPL-3.0-only

use crate::VoldError;

/// Publishes process-wide values for other system components to read.
pub trait PropertyPublisher: Send + Sync {
    fn publish(&self, key: &str, value: &str) -> Result<(), VoldError>;
}
