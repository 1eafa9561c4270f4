use crate::{
    diskutil::DiskutilError, grow::GrowError, system::SystemError, target::TargetError,
};

/// An error occurring while running a `macos-utils` command
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum MacosUtilsError {
    #[error("root privileges required, re-run command with sudo")]
    NotRoot,
    #[error("`macos-utils` only runs on macOS, this host runs `{0}`")]
    UnsupportedPlatform(String),
    #[error("Identifying the macOS release")]
    System(#[from] SystemError),
    #[error("Configuring `diskutil`")]
    Diskutil(#[from] DiskutilError),
    #[error("Cannot grow container")]
    Target(#[from] TargetError),
    #[error("Growing container")]
    Grow(#[from] GrowError),
    #[error("timeout exceeded")]
    TimeoutExceeded(#[source] Box<MacosUtilsError>),
    #[error("Cancelled by user")]
    Cancelled,
}

impl MacosUtilsError {
    /// If the error came from a process killed at its deadline
    pub fn is_timeout(&self) -> bool {
        match self {
            MacosUtilsError::Diskutil(err) => err.is_timeout(),
            MacosUtilsError::Target(err) => err.is_timeout(),
            MacosUtilsError::Grow(err) => err.is_timeout(),
            MacosUtilsError::TimeoutExceeded(_) => true,
            _ => false,
        }
    }
}
