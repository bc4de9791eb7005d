// SPDX-License-Identifier: GPL-3.0-only

//! Kernel hotplug (uevent) messages

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::DeviceNumber;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UeventAction {
    Add,
    Remove,
    Change,
    /// Actions the daemon does not act on (bind, move, online, ...)
    Other(String),
}

impl FromStr for UeventAction {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "add" => Self::Add,
            "remove" => Self::Remove,
            "change" => Self::Change,
            other => Self::Other(other.to_string()),
        })
    }
}

impl fmt::Display for UeventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => f.write_str("add"),
            Self::Remove => f.write_str("remove"),
            Self::Change => f.write_str("change"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

/// A single kernel device event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uevent {
    pub action: UeventAction,

    /// Device path relative to sysfs (e.g. "/devices/soc/mmcblk1")
    pub devpath: String,

    /// Remaining `KEY=VALUE` pairs
    pub attributes: BTreeMap<String, String>,
}

impl Uevent {
    pub fn new(action: UeventAction, devpath: impl Into<String>) -> Self {
        Self {
            action,
            devpath: devpath.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn subsystem(&self) -> Option<&str> {
        self.attribute("SUBSYSTEM")
    }

    pub fn devtype(&self) -> Option<&str> {
        self.attribute("DEVTYPE")
    }

    pub fn devname(&self) -> Option<&str> {
        self.attribute("DEVNAME")
    }

    /// Major/minor numbers, when the event carries both.
    pub fn device_number(&self) -> Option<DeviceNumber> {
        let major = self.attribute("MAJOR")?.parse().ok()?;
        let minor = self.attribute("MINOR")?.parse().ok()?;
        Some(DeviceNumber::new(major, minor))
    }

    /// Whether this is an event for a whole block device.
    pub fn is_block_disk(&self) -> bool {
        self.subsystem() == Some("block") && self.devtype() == Some("disk")
    }

    /// Parse a raw kernel netlink message.
    ///
    /// The payload is `action@devpath` followed by NUL separated `KEY=VALUE`
    /// pairs. Messages rebroadcast by udev (prefixed `libudev`) are ignored.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let mut fields = buf
            .split(|b| *b == 0)
            .filter(|field| !field.is_empty())
            .map(String::from_utf8_lossy);

        let header = fields.next()?;
        let (action, devpath) = header.split_once('@')?;

        let mut event = Uevent::new(action.parse().ok()?, devpath);
        for field in fields {
            if let Some((key, value)) = field.split_once('=') {
                event.attributes.insert(key.to_string(), value.to_string());
            }
        }

        // The header is authoritative; ACTION/DEVPATH only duplicate it.
        event.attributes.remove("ACTION");
        event.attributes.remove("DEVPATH");
        Some(event)
    }
}
