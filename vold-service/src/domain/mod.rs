// SPDX-License-Identifier: GPL-3.0-only

//! Disk enumeration and lifecycle
//!
//! Sources decide which devices are managed, the classifier turns kernel
//! events into registry changes, and the registry owns every disk and
//! volume along with their lifecycle.

pub mod classifier;
pub mod commands;
pub mod notifier;
pub mod pattern;
pub mod probe;
pub mod registry;
pub mod sources;

pub use classifier::{Classification, Classifier};
pub use commands::VolumeCommands;
pub use notifier::Notifier;
pub use probe::Prober;
pub use registry::{DiskRegistry, RemovedDisk};
pub use sources::SourceRegistry;
