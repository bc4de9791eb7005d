// SPDX-License-Identifier: GPL-3.0-only

//! Mount backend driving the system filesystem tools

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use vold_contracts::{MountBackend, MountRequest, VoldError, VoldErrorKind};

use crate::error::SysError;

/// blkid exit status when no recognised signature was found.
const BLKID_NOTHING_FOUND: i32 = 2;

/// Runs `blkid`, `fsck.*`, `mount`, `umount` and `mkfs.*`.
#[derive(Debug, Clone, Default)]
pub struct ToolMountBackend;

impl ToolMountBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Resolve `tool` on `PATH`.
pub(crate) fn require_tool(tool: &str) -> Result<PathBuf, SysError> {
    which::which(tool).map_err(|_| SysError::ToolMissing(format!("{tool} is not installed")))
}

async fn run<I, S>(program: &str, args: I) -> Result<Output, VoldError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    debug!("Running {program}");
    Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            VoldError::new(
                VoldErrorKind::Internal,
                format!("Failed to run {program}: {e}"),
            )
        })
}

fn failure(program: &str, output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{program} exited with {}: {}", output.status, stderr.trim())
}

#[async_trait]
impl MountBackend for ToolMountBackend {
    async fn probe(&self, dev_path: &Path) -> Result<Option<String>, VoldError> {
        let output = run(
            "blkid",
            [
                OsStr::new("-c"),
                OsStr::new("/dev/null"),
                OsStr::new("-o"),
                OsStr::new("value"),
                OsStr::new("-s"),
                OsStr::new("TYPE"),
                dev_path.as_os_str(),
            ],
        )
        .await?;

        if output.status.code() == Some(BLKID_NOTHING_FOUND) {
            return Ok(None);
        }
        if !output.status.success() {
            return Err(VoldError::new(VoldErrorKind::Internal, failure("blkid", &output)));
        }

        let fs_type = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!fs_type.is_empty()).then_some(fs_type))
    }

    async fn check(&self, dev_path: &Path, fs_type: &str) -> Result<(), VoldError> {
        let tool = format!("fsck.{fs_type}");
        if require_tool(&tool).is_err() {
            debug!("No {tool} available, skipping check of {}", dev_path.display());
            return Ok(());
        }

        let output = run(&tool, [OsStr::new("-n"), dev_path.as_os_str()]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(VoldError::mount_failed(failure(&tool, &output)))
        }
    }

    async fn mount(&self, request: &MountRequest) -> Result<(), VoldError> {
        tokio::fs::create_dir_all(&request.target)
            .await
            .map_err(|e| {
                VoldError::mount_failed(format!(
                    "Failed to create {}: {e}",
                    request.target.display()
                ))
            })?;

        let mut args = vec![OsStr::new("-t"), OsStr::new(&request.fs_type)];
        if !request.mount_options.is_empty() {
            args.push(OsStr::new("-o"));
            args.push(OsStr::new(&request.mount_options));
        }
        args.push(request.dev_path.as_os_str());
        args.push(request.target.as_os_str());

        let output = run("mount", args).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(VoldError::mount_failed(failure("mount", &output)))
        }
    }

    async fn unmount(&self, target: &Path) -> Result<(), VoldError> {
        let output = run("umount", [target.as_os_str()]).await?;
        if !output.status.success() {
            return Err(VoldError::mount_failed(failure("umount", &output)));
        }

        if let Err(e) = tokio::fs::remove_dir(target).await {
            debug!("Leaving mount point {} in place: {e}", target.display());
        }
        Ok(())
    }

    async fn format(&self, dev_path: &Path, fs_type: &str) -> Result<(), VoldError> {
        let tool = format!("mkfs.{fs_type}");
        require_tool(&tool)?;

        let output = run(&tool, [dev_path.as_os_str()]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(VoldError::mount_failed(failure(&tool, &output)))
        }
    }
}
