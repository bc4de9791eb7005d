// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for the vold storage daemon
//!
//! These types are shared by every layer of the daemon:
//!
//! - **vold-sys**: produces `DiskSource` entries and `Uevent`s from the platform
//! - **vold-service**: owns `Disk`/`Volume` state and serializes snapshots for clients
//!
//! ## Entities
//!
//! - `DiskSource` → configuration rule describing which devices are managed
//! - `DiskInfo` → snapshot of an observed block device
//! - `VolumeInfo` → snapshot of a mountable unit of a disk
//! - `LifecycleState` → shared state machine for disks and volumes

pub mod disk;
pub mod source;
pub mod state;
pub mod uevent;
pub mod volume;

pub use disk::{DeviceNumber, DiskId, DiskInfo};
pub use source::{DiskFlag, DiskSource, PartitionNumber};
pub use state::{BusyOperation, LifecycleState};
pub use uevent::{Uevent, UeventAction};
pub use volume::{VolumeId, VolumeInfo};
