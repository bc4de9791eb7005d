// SPDX-License-Identifier: GPL-3.0-only

//! Filesystem support detection

use std::path::Path;

/// Filesystems the daemon knows how to mount, in log order.
pub const KNOWN_FILESYSTEMS: &[&str] = &["exfat", "ext4", "f2fs", "iso9660", "ntfs", "vfat"];

/// Parse `/proc/filesystems` into the list of filesystem names.
pub fn parse_proc_filesystems(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter_map(|line| line.split_whitespace().last())
        .map(str::to_string)
        .collect()
}

/// Known filesystems the kernel or a userspace mount helper can handle.
pub fn detect_supported(proc_filesystems: &Path) -> Vec<String> {
    let kernel = std::fs::read_to_string(proc_filesystems)
        .map(|contents| parse_proc_filesystems(&contents))
        .unwrap_or_default();

    KNOWN_FILESYSTEMS
        .iter()
        .filter(|fs| {
            kernel.iter().any(|name| name.as_str() == **fs)
                || which::which(format!("mount.{fs}")).is_ok()
        })
        .map(|fs| fs.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nodev_and_block_filesystems() {
        let sample = "nodev\tsysfs\nnodev\ttmpfs\n\text4\n\tvfat\n";
        assert_eq!(
            parse_proc_filesystems(sample),
            vec!["sysfs", "tmpfs", "ext4", "vfat"]
        );
    }

    #[test]
    fn detects_kernel_filesystems() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("filesystems");
        std::fs::write(&path, "\text4\n\tvfat\nnodev\tproc\n").expect("write");

        let supported = detect_supported(&path);
        assert!(supported.contains(&"ext4".to_string()));
        assert!(supported.contains(&"vfat".to_string()));
        assert!(!supported.contains(&"proc".to_string()));
    }
}
