// SPDX-License-Identifier: GPL-3.0-only

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};
use vold_contracts::{VoldError, VoldErrorKind};

const DEFAULT_FILTER: &str = "vold=info,warn";
const DEBUG_FILTER: &str = "vold=debug,info";

/// Runtime switch for verbose logging.
pub trait DebugSwitch: Send + Sync {
    fn set_debug(&self, enabled: bool) -> Result<(), VoldError>;
}

/// Handle onto the installed log filter.
pub struct LogControl {
    handle: reload::Handle<EnvFilter, Registry>,
}

fn filter(debug: bool) -> EnvFilter {
    if debug {
        EnvFilter::new(DEBUG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Install the global subscriber, logging to stderr.
pub fn init(debug: bool) -> anyhow::Result<LogControl> {
    let (filter, handle) = reload::Layer::new(filter(debug));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    Ok(LogControl { handle })
}

impl DebugSwitch for LogControl {
    fn set_debug(&self, enabled: bool) -> Result<(), VoldError> {
        self.handle.reload(filter(enabled)).map_err(|e| {
            VoldError::new(VoldErrorKind::Internal, format!("Failed to switch log level: {e}"))
        })?;
        info!("Debug logging {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }
}
