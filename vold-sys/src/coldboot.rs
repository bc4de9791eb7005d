// SPDX-License-Identifier: GPL-3.0-only

//! Coldboot replay
//!
//! Devices present before the daemon started are re-announced by writing
//! `add` to every `uevent` attribute under a sysfs root. The kernel then emits
//! real hotplug events, so the replay never builds disks itself.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

const TRIGGER_ATTRIBUTE: &str = "uevent";
const TRIGGER_ACTION: &[u8] = b"add\n";

/// Replay `add` events for every device node under `root`.
///
/// Children of `root` are descended into whatever their reported type
/// (`/sys/block` entries are symlinks); deeper levels only follow real
/// directories. A missing root is a no-op.
pub fn replay(root: &Path) {
    let mut triggered = 0usize;
    let mut worklist: Vec<(PathBuf, usize)> = vec![(root.to_path_buf(), 0)];

    while let Some((dir, depth)) = worklist.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };

        if trigger_add(&dir) {
            triggered += 1;
        }

        for entry in entries.flatten() {
            if entry.file_name().as_encoded_bytes().starts_with(b".") {
                continue;
            }

            if depth > 0 && !entry.file_type().is_ok_and(|kind| kind.is_dir()) {
                continue;
            }

            worklist.push((entry.path(), depth + 1));
        }
    }

    debug!("Coldboot replay of {} triggered {triggered} nodes", root.display());
}

fn trigger_add(dir: &Path) -> bool {
    OpenOptions::new()
        .write(true)
        .open(dir.join(TRIGGER_ATTRIBUTE))
        .and_then(|mut file| file.write_all(TRIGGER_ACTION))
        .is_ok()
}
