// SPDX-License-Identifier: GPL-3.0-only

//! Recording fakes for the external collaborators

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use vold_contracts::{CryptBackend, LabelProvider, MountBackend, MountRequest, VoldError};

use crate::logging::DebugSwitch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Probe(PathBuf),
    Check(PathBuf, String),
    Mount(MountRequest),
    Unmount(PathBuf),
    Format(PathBuf, String),
    Unlock(PathBuf, String),
    Lock(String),
}

type Hook = Box<dyn FnOnce() + Send>;

/// Mount and crypt backend that records every call.
#[derive(Clone, Default)]
pub struct FakeBackend {
    calls: Arc<Mutex<Vec<Call>>>,
    filesystems: Arc<Mutex<HashMap<PathBuf, String>>>,
    fail_mount: Arc<AtomicBool>,
    during_mount: Arc<Mutex<Option<Hook>>>,
    during_probe: Arc<Mutex<Option<Hook>>>,
}

impl FakeBackend {
    pub fn with_filesystem(self, dev_path: impl Into<PathBuf>, fs_type: &str) -> Self {
        self.filesystems
            .lock()
            .unwrap()
            .insert(dev_path.into(), fs_type.to_string());
        self
    }

    pub fn fail_mounts(&self) {
        self.fail_mount.store(true, Ordering::SeqCst);
    }

    /// Run `hook` while the next mount is in flight.
    pub fn during_mount(&self, hook: impl FnOnce() + Send + 'static) {
        *self.during_mount.lock().unwrap() = Some(Box::new(hook));
    }

    /// Run `hook` while the next filesystem probe is in flight.
    pub fn during_probe(&self, hook: impl FnOnce() + Send + 'static) {
        *self.during_probe.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MountBackend for FakeBackend {
    async fn probe(&self, dev_path: &Path) -> Result<Option<String>, VoldError> {
        self.record(Call::Probe(dev_path.to_path_buf()));
        let hook = self.during_probe.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(self.filesystems.lock().unwrap().get(dev_path).cloned())
    }

    async fn check(&self, dev_path: &Path, fs_type: &str) -> Result<(), VoldError> {
        self.record(Call::Check(dev_path.to_path_buf(), fs_type.to_string()));
        Ok(())
    }

    async fn mount(&self, request: &MountRequest) -> Result<(), VoldError> {
        self.record(Call::Mount(request.clone()));
        let hook = self.during_mount.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        if self.fail_mount.load(Ordering::SeqCst) {
            return Err(VoldError::mount_failed("mount: wrong fs type"));
        }
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<(), VoldError> {
        self.record(Call::Unmount(target.to_path_buf()));
        Ok(())
    }

    async fn format(&self, dev_path: &Path, fs_type: &str) -> Result<(), VoldError> {
        self.record(Call::Format(dev_path.to_path_buf(), fs_type.to_string()));
        self.filesystems
            .lock()
            .unwrap()
            .insert(dev_path.to_path_buf(), fs_type.to_string());
        Ok(())
    }
}

#[async_trait]
impl CryptBackend for FakeBackend {
    async fn unlock(&self, dev_path: &Path, name: &str) -> Result<PathBuf, VoldError> {
        self.record(Call::Unlock(dev_path.to_path_buf(), name.to_string()));
        Ok(Path::new("/dev/mapper").join(name))
    }

    async fn lock(&self, name: &str) -> Result<(), VoldError> {
        self.record(Call::Lock(name.to_string()));
        Ok(())
    }
}

/// Label provider that remembers which paths it was asked about.
#[derive(Debug, Default)]
pub struct RecordingLabels {
    pub asked: Mutex<Vec<PathBuf>>,
}

impl LabelProvider for RecordingLabels {
    fn file_context(&self, path: &Path) -> Result<Option<String>, VoldError> {
        self.asked.lock().unwrap().push(path.to_path_buf());
        Ok(None)
    }
}

/// Whether this process may create block nodes (root with `CAP_MKNOD`).
pub fn can_make_nodes() -> bool {
    let Ok(dir) = tempfile::tempdir() else {
        return false;
    };
    vold_sys::devnode::create_block_node(
        dir.path(),
        "trial",
        vold_types::DeviceNumber::new(7, 200),
        &vold_contracts::NoLabels,
    )
    .is_ok()
}

#[derive(Debug, Default)]
pub struct FakeDebug {
    pub enabled: AtomicBool,
}

impl DebugSwitch for FakeDebug {
    fn set_debug(&self, enabled: bool) -> Result<(), VoldError> {
        self.enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll `done` until it holds, failing the test after a few seconds.
pub async fn wait_for(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
