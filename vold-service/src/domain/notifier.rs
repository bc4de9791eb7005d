// SPDX-License-Identifier: GPL-3.0-only

use tokio::sync::broadcast;
use tracing::trace;
use vold_contracts::Notification;

/// Fan-out of registry transitions to every interested client.
///
/// Sends happen while the registry lock is held, so subscribers observe
/// notifications in transition order.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn send(&self, notification: Notification) {
        // No subscribers yet is fine; nobody is listening during early startup.
        if self.tx.send(notification).is_err() {
            trace!("Notification dropped, no subscribers");
        }
    }
}
