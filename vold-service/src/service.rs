// SPDX-License-Identifier: GPL-3.0-only

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use vold_contracts::{VoldError, VoldErrorKind};
use zbus::connection::Builder as ConnectionBuilder;
use zbus::{Connection, interface};

use crate::domain::{Notifier, VolumeCommands};
use crate::handlers::volumes::VOLUMES_PATH;
use crate::handlers::{VolumesHandler, forward_notifications};
use crate::startup::CommandSurface;

pub const BUS_NAME: &str = "org.vold.Daemon";
pub const DAEMON_PATH: &str = "/org/vold/Daemon";

/// Root daemon object
pub struct VoldDaemon {
    version: String,
    has_adoptable: Arc<AtomicBool>,
}

impl VoldDaemon {
    pub fn new(has_adoptable: Arc<AtomicBool>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            has_adoptable,
        }
    }
}

#[interface(name = "org.vold.Daemon")]
impl VoldDaemon {
    #[zbus(property)]
    async fn version(&self) -> &str {
        &self.version
    }

    /// Whether any adoptable storage source is configured
    #[zbus(property)]
    async fn has_adoptable(&self) -> bool {
        self.has_adoptable.load(Ordering::SeqCst)
    }
}

/// Command surface on the system bus.
pub struct DbusSurface {
    commands: Arc<VolumeCommands>,
    notifier: Notifier,
    has_adoptable: Arc<AtomicBool>,
    connection: Mutex<Option<Connection>>,
}

impl DbusSurface {
    pub fn new(
        commands: Arc<VolumeCommands>,
        notifier: Notifier,
        has_adoptable: Arc<AtomicBool>,
    ) -> Self {
        Self {
            commands,
            notifier,
            has_adoptable,
            connection: Mutex::new(None),
        }
    }
}

fn bus_failure(e: zbus::Error) -> VoldError {
    VoldError::new(
        VoldErrorKind::ManagerStartFailure,
        format!("Unable to start command surface: {e}"),
    )
}

#[async_trait]
impl CommandSurface for DbusSurface {
    async fn start(&self) -> Result<(), VoldError> {
        // Subscribe before serving so no transition falls between the two
        let notifications = self.notifier.subscribe();

        let connection = ConnectionBuilder::system()
            .and_then(|builder| builder.name(BUS_NAME))
            .and_then(|builder| {
                builder.serve_at(DAEMON_PATH, VoldDaemon::new(Arc::clone(&self.has_adoptable)))
            })
            .and_then(|builder| {
                builder.serve_at(VOLUMES_PATH, VolumesHandler::new(Arc::clone(&self.commands)))
            })
            .map_err(bus_failure)?
            .build()
            .await
            .map_err(bus_failure)?;

        forward_notifications(connection.clone(), VOLUMES_PATH, notifications)
            .await
            .map_err(bus_failure)?;

        tracing::info!("Service registered on D-Bus system bus");
        tracing::info!("  - {BUS_NAME} at {DAEMON_PATH}");
        tracing::info!("  - org.vold.Volumes at {VOLUMES_PATH}");

        *self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(connection);
        Ok(())
    }
}
