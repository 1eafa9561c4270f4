use once_cell::sync::Lazy;
use regex::Regex;

static DISK_ID: Lazy<Regex> = Lazy::new(|| Regex::new("disk[0-9]+").expect("valid regex"));

/// Parse the whole-disk identifier out of a device identifier or device node
///
/// `disk1`, `/dev/disk1` and `disk1s2` all yield `disk1`.
pub fn parse_disk_id(s: &str) -> Option<&str> {
    if s.trim().is_empty() {
        return None;
    }
    DISK_ID.find(s).map(|found| found.as_str())
}
