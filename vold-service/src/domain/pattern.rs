// SPDX-License-Identifier: GPL-3.0-only

//! Sysfs path patterns
//!
//! Patterns are compared segment by segment on `/`. Inside a segment `*`
//! matches any run of characters, so a lone `*` stands for exactly one path
//! segment. A `**` segment matches any number of segments, including none.
//! Matching is anchored and case-sensitive.

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    AnyDepth,
    Glob(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysPattern {
    segments: Vec<Segment>,
}

impl SysPattern {
    pub fn new(pattern: &str) -> Self {
        let segments = pattern
            .split('/')
            .map(|segment| match segment {
                "**" => Segment::AnyDepth,
                glob => Segment::Glob(glob.to_string()),
            })
            .collect();
        Self { segments }
    }

    pub fn matches(&self, path: &str) -> bool {
        let path: Vec<&str> = path.split('/').collect();
        match_segments(&self.segments, &path)
    }
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((Segment::AnyDepth, rest)) => {
            (0..=path.len()).any(|skip| match_segments(rest, &path[skip..]))
        }
        Some((Segment::Glob(glob), rest)) => match path.split_first() {
            Some((segment, path_rest)) => {
                glob_matches(glob, segment) && match_segments(rest, path_rest)
            }
            None => false,
        },
    }
}

/// Match one segment against a glob whose only wildcard is `*`.
fn glob_matches(glob: &str, text: &str) -> bool {
    let mut parts = glob.split('*');
    let Some(first) = parts.next() else {
        return text.is_empty();
    };
    let Some(mut remaining) = text.strip_prefix(first) else {
        return false;
    };

    let rest: Vec<&str> = parts.collect();
    let Some((last, middle)) = rest.split_last() else {
        // No wildcard at all
        return remaining.is_empty();
    };

    for part in middle {
        match remaining.find(part) {
            Some(index) => remaining = &remaining[index + part.len()..],
            None => return false,
        }
    }

    remaining.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_exactly_one_segment() {
        let pattern = SysPattern::new("/devices/*/mmcblk0");
        assert!(pattern.matches("/devices/soc/mmcblk0"));
        assert!(!pattern.matches("/devices/soc/usb/mmcblk0"));
        assert!(!pattern.matches("/devices/mmcblk0"));
    }

    #[test]
    fn matching_is_anchored_and_case_sensitive() {
        let pattern = SysPattern::new("/devices/*/mmcblk0");
        assert!(!pattern.matches("/devices/soc/mmcblk0/mmcblk0p1"));
        assert!(!pattern.matches("/sys/devices/soc/mmcblk0"));
        assert!(!pattern.matches("/devices/soc/MMCBLK0"));
    }

    #[test]
    fn star_inside_segment_stays_within_segment() {
        let pattern = SysPattern::new("/devices/platform/mmc_host/mmc1*");
        assert!(pattern.matches("/devices/platform/mmc_host/mmc1"));
        assert!(pattern.matches("/devices/platform/mmc_host/mmc1:0001"));
        assert!(!pattern.matches("/devices/platform/mmc_host/mmc1:0001/block"));
        assert!(!pattern.matches("/devices/platform/mmc_host/mmc2"));

        let infix = SysPattern::new("/devices/xhci-hcd.*.auto/usb*");
        assert!(infix.matches("/devices/xhci-hcd.0.auto/usb1"));
        assert!(!infix.matches("/devices/xhci-hcd.0/usb1"));
    }

    #[test]
    fn double_star_spans_any_depth() {
        let pattern = SysPattern::new("/devices/**/block/sd*");
        assert!(pattern.matches("/devices/block/sda"));
        assert!(pattern.matches("/devices/pci0000:00/0000:00:14.0/usb2/2-1/block/sdb"));
        assert!(!pattern.matches("/devices/pci0000:00/block/sda/sda1"));
    }

    #[test]
    fn glob_edge_cases() {
        assert!(glob_matches("*", ""));
        assert!(glob_matches("a*b*c", "a-b-c"));
        assert!(!glob_matches("a*b*c", "a-c-b"));
        assert!(glob_matches("ab*b", "abb"));
        assert!(!glob_matches("abc", "abcd"));
    }
}
