// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for the vold daemon
//!
//! This crate talks to the kernel and platform directly:
//! - Kernel command line and fstab parsing
//! - Coldboot replay through sysfs `uevent` attributes
//! - The uevent netlink socket
//! - Block device nodes and filesystem tooling
//!
//! These operations require elevated privileges and should only be called
//! from the daemon itself.

pub mod cmdline;
pub mod coldboot;
pub mod crypt;
pub mod devnode;
pub mod error;
pub mod filesystems;
pub mod fstab;
pub mod mount;
pub mod netlink;
pub mod partition;
pub mod publish;
pub mod sysfs;

pub use crypt::CryptsetupBackend;
pub use error::{Result, SysError};
pub use mount::ToolMountBackend;
pub use netlink::UeventSocket;
pub use publish::FilePropertyPublisher;
