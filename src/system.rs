/*! Identifying the running macOS release

The release decides which `diskutil` quirks apply. It is read from `SystemVersion.plist`, unless the system
masks its real version as `10.16` (`SYSTEM_VERSION_COMPAT=1`), in which case the unmasked
`.SystemVersionPlatform.plist` is read instead.
*/
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use semver::{Version, VersionReq};

use crate::{
    diskutil::decode::{decode, DecodeError},
    settings::{COMPAT_MODE_VERSION, SYSTEM_VERSION_PATH, SYSTEM_VERSION_PLATFORM_PATH},
};

/// The contents of `SystemVersion.plist`
#[derive(serde::Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct VersionInfo {
    pub product_build_version: String,
    pub product_copyright: String,
    pub product_name: String,
    pub product_user_visible_version: String,
    pub product_version: String,
    #[serde(rename = "iOSSupportVersion")]
    pub ios_support_version: String,
}

impl VersionInfo {
    pub fn product(&self) -> Result<Product, SystemError> {
        let version = parse_version(&self.product_version).map_err(|source| {
            SystemError::Version {
                version: self.product_version.clone(),
                source,
            }
        })?;
        Ok(Product {
            release: Release::from_version(&version),
            version,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Release {
    Mojave,
    Catalina,
    #[strum(serialize = "Big Sur")]
    BigSur,
    Monterey,
    Ventura,
    Sonoma,
    Sequoia,
    /// The masked `10.16` version reported to software expecting a `10.x` release
    #[strum(serialize = "Compatibility Mode")]
    CompatMode,
    #[strum(serialize = "unknown")]
    Unknown,
}

static RELEASES: Lazy<Vec<(VersionReq, Release)>> = Lazy::new(|| {
    [
        ("~10.14", Release::Mojave),
        ("~10.15", Release::Catalina),
        ("~10.16", Release::CompatMode),
        ("~11", Release::BigSur),
        ("~12", Release::Monterey),
        ("~13", Release::Ventura),
        ("~14", Release::Sonoma),
        ("~15", Release::Sequoia),
    ]
    .into_iter()
    .map(|(req, release)| (VersionReq::parse(req).expect("valid version requirement"), release))
    .collect()
});

impl Release {
    pub fn from_version(version: &Version) -> Self {
        RELEASES
            .iter()
            .find(|(req, _)| req.matches(version))
            .map(|(_, release)| *release)
            .unwrap_or(Release::Unknown)
    }
}

/// A macOS release along with its exact version, such as `macOS Sonoma 14.4.1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub release: Release,
    pub version: Version,
}

impl std::fmt::Display for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "macOS {} {}", self.release, self.version)
    }
}

/// Parse a macOS version, which may omit its minor and patch numbers (`14`, `11.4`)
pub fn parse_version(version: &str) -> Result<Version, semver::Error> {
    let version = version.trim();
    let padded = match version.matches('.').count() {
        0 => format!("{version}.0.0"),
        1 => format!("{version}.0"),
        _ => version.to_string(),
    };
    Version::parse(&padded)
}

/// Identify the running macOS release
#[tracing::instrument(level = "debug")]
pub fn scan() -> Result<Product, SystemError> {
    scan_from(
        Path::new(SYSTEM_VERSION_PATH),
        Path::new(SYSTEM_VERSION_PLATFORM_PATH),
    )
}

/// Identify the release described by `version_path`, falling back to `platform_path` in compatibility mode
pub fn scan_from(version_path: &Path, platform_path: &Path) -> Result<Product, SystemError> {
    let mut info = read_version(version_path)?;
    if info.product_version.trim() == COMPAT_MODE_VERSION {
        tracing::debug!(
            path = %platform_path.display(),
            "Version is masked by compatibility mode, reading platform version instead"
        );
        info = read_version(platform_path)?;
    }

    let product = info.product()?;
    tracing::debug!(%product, build = %info.product_build_version, "Identified system");
    Ok(product)
}

pub fn read_version(path: &Path) -> Result<VersionInfo, SystemError> {
    let raw = std::fs::read(path).map_err(|source| SystemError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    decode_version_info(&raw).map_err(|source| SystemError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

pub fn decode_version_info(raw: &[u8]) -> Result<VersionInfo, DecodeError> {
    decode("system version", raw)
}

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum SystemError {
    #[error("Reading `{}`", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Decoding `{}`", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
    #[error("Parsing system version `{version}`")]
    Version {
        version: String,
        #[source]
        source: semver::Error,
    },
}
