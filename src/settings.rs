/*! Configurable knobs, fixed system paths, and build information
*/
use std::time::Duration;

/// The `diskutil` binary driven by [`SystemDiskutil`](crate::diskutil::SystemDiskutil)
pub const DISKUTIL_PATH: &str = "/usr/sbin/diskutil";

/// Feeds affirmative answers to tools which prompt before mutating a disk
pub const YES_PATH: &str = "/usr/bin/yes";

/// Directory service cache query tool, consulted when `getpwnam` cannot find a user
pub const DSCACHEUTIL_PATH: &str = "/usr/bin/dscacheutil";

/// The system version property list
pub const SYSTEM_VERSION_PATH: &str = "/System/Library/CoreServices/SystemVersion.plist";

/// The unmasked system version property list, authoritative when [`SYSTEM_VERSION_PATH`]
/// reports [`COMPAT_MODE_VERSION`]
pub const SYSTEM_VERSION_PLATFORM_PATH: &str =
    "/System/Library/CoreServices/.SystemVersionPlatform.plist";

/// The version macOS reports in place of the real one when `SYSTEM_VERSION_COMPAT` is set
pub const COMPAT_MODE_VERSION: &str = "10.16";

/// Minimum amount of unallocated space (in bytes) before `diskutil apfs resizeContainer` is attempted
pub const MINIMUM_GROW_FREE_SPACE: u64 = 1_000_000;

/// Size argument which asks `diskutil apfs resizeContainer` to grow to the maximum size
pub const GROW_TO_MAXIMUM: &str = "0";

/// Default time budget for the whole `grow` workflow
///
/// Long enough for `diskutil repairDisk` on large volumes, anything beyond is treated as unresponsive.
pub const DEFAULT_GROW_TIMEOUT: Duration = Duration::from_secs(5 * 60);

macro_rules! license_text {
    () => {
        "Licensed under the Apache License, Version 2.0 <https://www.apache.org/licenses/LICENSE-2.0>"
    };
}

pub const LICENSE_TEXT: &str = license_text!();

/// Version information stamped in at build time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: &'static str,
    pub commit_date: &'static str,
}

pub const BUILD_INFO: BuildInfo = BuildInfo {
    version: env!("CARGO_PKG_VERSION"),
    commit_date: env!("MACOS_UTILS_COMMIT_DATE"),
};

/// The `--version` text: version, commit date and license
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " [",
    env!("MACOS_UTILS_COMMIT_DATE"),
    "]\n\n",
    license_text!()
);

impl std::fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.version, self.commit_date)
    }
}
