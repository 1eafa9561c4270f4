//! Resolving the disk a user asked to operate on
use crate::{
    command::Deadline,
    diskutil::{parse_disk_id, DiskInfo, DiskUtil, DiskutilError},
};

/// The target naming the disk mounted at `/`
pub const ROOT_TARGET: &str = "root";

/// Resolve `target` (`root`, a device identifier such as `disk1`, or a device node such as `/dev/disk1`)
/// to the disk it names
#[tracing::instrument(level = "debug", skip(deadline, util))]
pub async fn resolve(
    deadline: Deadline,
    util: &dyn DiskUtil,
    target: &str,
) -> Result<DiskInfo, TargetError> {
    if target.eq_ignore_ascii_case(ROOT_TARGET) {
        return util
            .info(deadline, "/")
            .await
            .map_err(|source| TargetError::Info {
                target: target.to_string(),
                source,
            });
    }

    let partitions = util
        .list(deadline, &[])
        .await
        .map_err(TargetError::List)?;

    if target.trim().is_empty() {
        return Err(TargetError::InvalidTarget(InvalidTarget::Empty));
    }
    let device_id = parse_disk_id(target)
        .ok_or_else(|| TargetError::InvalidTarget(InvalidTarget::Format(target.to_string())))?;
    if !partitions.contains_disk(device_id) {
        return Err(TargetError::InvalidTarget(InvalidTarget::Unknown(
            device_id.to_string(),
        )));
    }

    util.info(deadline, target)
        .await
        .map_err(|source| TargetError::Info {
            target: target.to_string(),
            source,
        })
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidTarget {
    #[error("Empty device identifier")]
    Empty,
    #[error("`{0}` does not match the expected device identifier format")]
    Format(String),
    #[error("`{0}` is not a known device identifier")]
    Unknown(String),
}

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum TargetError {
    #[error("Listing partitions")]
    List(#[source] DiskutilError),
    #[error("Invalid target")]
    InvalidTarget(#[source] InvalidTarget),
    #[error("Fetching disk information for `{target}`")]
    Info {
        target: String,
        #[source]
        source: DiskutilError,
    },
}

impl TargetError {
    pub fn is_timeout(&self) -> bool {
        match self {
            TargetError::List(source) | TargetError::Info { source, .. } => source.is_timeout(),
            TargetError::InvalidTarget(_) => false,
        }
    }
}
