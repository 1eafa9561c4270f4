/*! Growing an APFS container into the free space of its disk

Free space added to a disk from outside (for example by enlarging a cloud volume) is invisible to APFS until
the partition map of the disk is repaired. [`grow_container`] repairs the disk backing the container, checks
that there is enough unallocated space to bother, and then asks `diskutil` to grow the container as far as
it can go.
*/
use crate::{
    command::Deadline,
    diskutil::{DiskInfo, DiskLayoutError, DiskUtil, DiskutilError},
    settings::{GROW_TO_MAXIMUM, MINIMUM_GROW_FREE_SPACE},
};

/// Grow `container` to the maximum size its physical disk allows
///
/// Repair and resize failures caused by a [`DryRun`](crate::diskutil::DryRun) are logged and skipped, so a dry
/// run walks through every decision without modifying anything.
pub async fn grow_container(
    deadline: Deadline,
    util: &dyn DiskUtil,
    container: Option<&DiskInfo>,
) -> Result<(), GrowError> {
    let container = container.ok_or(GrowError::InvalidArgument)?;

    tracing::info!(
        device_id = %container.device_identifier,
        "Checking if device can be APFS resized"
    );
    if !container.can_apfs_resize() {
        return Err(GrowError::NotResizable {
            device_id: container.device_identifier.clone(),
        });
    }

    let resolved;
    let phy = if container.is_physical() {
        container
    } else {
        resolved = util
            .info(deadline, &container.parent_whole_disk)
            .await
            .map_err(|source| GrowError::PhysicalResolution {
                device_id: container.parent_whole_disk.clone(),
                source,
            })?;
        &resolved
    };

    let parent_id = phy
        .parent_device_id()
        .map_err(|source| GrowError::ParentDisk {
            device_id: phy.device_identifier.clone(),
            source,
        })?;

    repair_parent_disk(deadline, util, &parent_id).await?;

    let free_space = disk_free_space(deadline, util, &parent_id).await?;
    if free_space < MINIMUM_GROW_FREE_SPACE {
        tracing::warn!(
            free_space,
            required_minimum = MINIMUM_GROW_FREE_SPACE,
            "Available free space does not meet required minimum to grow"
        );
        return Err(GrowError::FreeSpace {
            free_space_bytes: free_space,
        });
    }

    tracing::info!(
        device_id = %phy.device_identifier,
        free_space,
        "Resizing container to maximum size"
    );
    match util
        .resize_container(deadline, &phy.device_identifier, GROW_TO_MAXIMUM)
        .await
    {
        Ok(output) => {
            tracing::debug!(%output, "Resized container");
            Ok(())
        },
        Err(err) if err.is_read_only() => {
            tracing::info!(
                device_id = %phy.device_identifier,
                "Would have resized container to maximum size"
            );
            Ok(())
        },
        Err(source) => Err(GrowError::Resize {
            device_id: phy.device_identifier.clone(),
            source,
        }),
    }
}

/// Make the kernel re-read the partition map of `parent_id`, picking up space added to the device
#[tracing::instrument(level = "debug", skip(deadline, util))]
async fn repair_parent_disk(
    deadline: Deadline,
    util: &dyn DiskUtil,
    parent_id: &str,
) -> Result<(), GrowError> {
    tracing::info!(parent_id, "Repairing the parent disk");
    match util.repair_disk(deadline, parent_id).await {
        Ok(output) => {
            tracing::debug!(%output, "Repaired the parent disk");
            Ok(())
        },
        Err(err) if err.is_read_only() => {
            tracing::info!(parent_id, "Would have repaired the parent disk");
            Ok(())
        },
        Err(source) => Err(GrowError::Repair {
            parent_id: parent_id.to_string(),
            source,
        }),
    }
}

#[tracing::instrument(level = "debug", skip(deadline, util))]
async fn disk_free_space(
    deadline: Deadline,
    util: &dyn DiskUtil,
    parent_id: &str,
) -> Result<u64, GrowError> {
    let partitions = util
        .list(deadline, &[])
        .await
        .map_err(|source| GrowError::FreeSpaceQuery {
            parent_id: parent_id.to_string(),
            source,
        })?;

    let free_space = partitions
        .available_disk_space(parent_id)
        .map_err(|_| GrowError::DiskNotFound(parent_id.to_string()))?;
    tracing::trace!(free_space, "Computed free space on disk");
    Ok(free_space)
}

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum GrowError {
    #[error("No container given to grow")]
    InvalidArgument,
    #[error("`{device_id}` is not an APFS container which can be resized")]
    NotResizable { device_id: String },
    #[error("Determining the physical disk `{device_id}`")]
    PhysicalResolution {
        device_id: String,
        #[source]
        source: DiskutilError,
    },
    #[error("Determining the parent disk of `{device_id}`")]
    ParentDisk {
        device_id: String,
        #[source]
        source: DiskLayoutError,
    },
    #[error("Repairing parent disk `{parent_id}`")]
    Repair {
        parent_id: String,
        #[source]
        source: DiskutilError,
    },
    #[error("Determining free space on `{parent_id}`")]
    FreeSpaceQuery {
        parent_id: String,
        #[source]
        source: DiskutilError,
    },
    #[error("No partition information found for `{0}`")]
    DiskNotFound(String),
    #[error("Not enough space to resize container, {free_space_bytes} bytes available")]
    FreeSpace { free_space_bytes: u64 },
    #[error("Resizing container `{device_id}`")]
    Resize {
        device_id: String,
        #[source]
        source: DiskutilError,
    },
}

impl GrowError {
    /// There was simply nothing to grow into
    pub fn is_benign(&self) -> bool {
        matches!(self, GrowError::FreeSpace { .. })
    }

    /// A `diskutil` invocation ran out of time
    pub fn is_timeout(&self) -> bool {
        match self {
            GrowError::PhysicalResolution { source, .. }
            | GrowError::Repair { source, .. }
            | GrowError::FreeSpaceQuery { source, .. }
            | GrowError::Resize { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diskutil::{
        fake::{Failure, FakeDiskUtil},
        types::{ApfsPhysicalStore, ContainerInfo, DiskPart, Partition, SystemPartitions},
        DryRun, Operation,
    };

    fn container(id: &str, stores: &[&str]) -> DiskInfo {
        DiskInfo {
            device_identifier: id.into(),
            parent_whole_disk: id.into(),
            apfs_container_reference: id.into(),
            apfs_physical_stores: stores.iter().map(|s| ApfsPhysicalStore::new(*s)).collect(),
            virtual_or_physical: "Virtual".into(),
            container_info: ContainerInfo {
                filesystem_type: "apfs".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn disk0(size: u64, partitions: &[u64]) -> SystemPartitions {
        SystemPartitions {
            all_disks: vec!["disk0".into(), "disk1".into()],
            all_disks_and_partitions: vec![DiskPart {
                device_identifier: "disk0".into(),
                size,
                partitions: partitions
                    .iter()
                    .map(|size| Partition {
                        size: *size,
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// Container `disk1` backed by `disk0s2`, on a `disk0` of `size` bytes
    fn setup(size: u64, partitions: &[u64]) -> (DiskInfo, FakeDiskUtil) {
        let disk1 = container("disk1", &["disk0s2"]);
        let mut util = FakeDiskUtil::with_disks([disk1.clone()]);
        util.partitions = disk0(size, partitions);
        (disk1, util)
    }

    #[tokio::test]
    async fn grows_container_into_free_space() {
        let (disk1, util) = setup(3_000_000, &[500_000, 500_000]);

        grow_container(Deadline::none(), &util, Some(&disk1))
            .await
            .unwrap();

        assert_eq!(
            util.calls(),
            [
                "info disk1",
                "repairDisk disk0",
                "list",
                "resizeContainer disk1 0"
            ]
        );
    }

    #[tokio::test]
    async fn too_little_free_space_is_benign() {
        let (disk1, util) = setup(1_000_000, &[500_000]);

        let err = grow_container(Deadline::none(), &util, Some(&disk1))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GrowError::FreeSpace {
                free_space_bytes: 500_000
            }
        ));
        assert!(err.is_benign());
        assert!(!err.is_timeout());
        assert_eq!(util.calls(), ["info disk1", "repairDisk disk0", "list"]);
    }

    #[tokio::test]
    async fn free_space_at_threshold_grows() {
        let (disk1, util) = setup(1_500_000, &[500_000]);

        grow_container(Deadline::none(), &util, Some(&disk1))
            .await
            .unwrap();

        let resizes = util
            .calls()
            .into_iter()
            .filter(|call| call.starts_with("resizeContainer"))
            .count();
        assert_eq!(resizes, 1);
    }

    #[tokio::test]
    async fn physical_disks_are_used_directly() {
        let (mut disk1, util) = setup(3_000_000, &[]);
        disk1.virtual_or_physical = "Physical".into();

        grow_container(Deadline::none(), &util, Some(&disk1))
            .await
            .unwrap();

        assert_eq!(
            util.calls(),
            ["repairDisk disk0", "list", "resizeContainer disk1 0"]
        );
    }

    #[tokio::test]
    async fn missing_container() {
        let util = FakeDiskUtil::default();
        let err = grow_container(Deadline::none(), &util, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GrowError::InvalidArgument));
        assert!(util.calls().is_empty());
    }

    #[tokio::test]
    async fn refuses_non_apfs_disks() {
        let util = FakeDiskUtil::default();
        let hfs = DiskInfo {
            device_identifier: "disk3s1".into(),
            container_info: ContainerInfo {
                filesystem_type: "hfs".into(),
                ..Default::default()
            },
            ..Default::default()
        };

        let err = grow_container(Deadline::none(), &util, Some(&hfs))
            .await
            .unwrap_err();
        assert!(matches!(err, GrowError::NotResizable { device_id } if device_id == "disk3s1"));
        assert!(util.calls().is_empty());
    }

    #[tokio::test]
    async fn dry_run_skips_modifications() {
        let (disk1, util) = setup(3_000_000, &[500_000, 500_000]);
        let dry_run = DryRun::new(util);

        grow_container(Deadline::none(), &dry_run, Some(&disk1))
            .await
            .unwrap();

        assert_eq!(dry_run.into_inner().calls(), ["info disk1", "list"]);
    }

    #[tokio::test]
    async fn dry_run_still_requires_one_physical_store() {
        let disk1 = container("disk1", &["disk0s2", "disk2s2"]);
        let dry_run = DryRun::new(FakeDiskUtil::with_disks([disk1.clone()]));

        let err = grow_container(Deadline::none(), &dry_run, Some(&disk1))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GrowError::ParentDisk {
                source: DiskLayoutError::AmbiguousPhysicalStore { count: 2, .. },
                ..
            }
        ));
        assert_eq!(dry_run.into_inner().calls(), ["info disk1"]);
    }

    #[tokio::test]
    async fn physical_resolution_failure() {
        let (disk1, util) = setup(3_000_000, &[]);
        let util = util.fail(Operation::Info, Failure::Exit);

        let err = grow_container(Deadline::none(), &util, Some(&disk1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GrowError::PhysicalResolution { device_id, .. } if device_id == "disk1"
        ));
    }

    #[tokio::test]
    async fn repair_failure_stops_before_listing() {
        let (disk1, util) = setup(3_000_000, &[]);
        let util = util.fail(Operation::RepairDisk, Failure::Exit);

        let err = grow_container(Deadline::none(), &util, Some(&disk1))
            .await
            .unwrap_err();
        assert!(matches!(err, GrowError::Repair { parent_id, .. } if parent_id == "disk0"));
        assert_eq!(util.calls(), ["info disk1", "repairDisk disk0"]);
    }

    #[tokio::test]
    async fn list_failure() {
        let (disk1, util) = setup(3_000_000, &[]);
        let util = util.fail(Operation::List, Failure::Exit);

        let err = grow_container(Deadline::none(), &util, Some(&disk1))
            .await
            .unwrap_err();
        assert!(matches!(err, GrowError::FreeSpaceQuery { .. }));
    }

    #[tokio::test]
    async fn parent_disk_missing_from_list() {
        let (disk1, mut util) = setup(3_000_000, &[]);
        util.partitions.all_disks_and_partitions.clear();

        let err = grow_container(Deadline::none(), &util, Some(&disk1))
            .await
            .unwrap_err();
        assert!(matches!(err, GrowError::DiskNotFound(id) if id == "disk0"));
    }

    #[tokio::test]
    async fn resize_failure() {
        let (disk1, util) = setup(3_000_000, &[]);
        let util = util.fail(Operation::ResizeContainer, Failure::Exit);

        let err = grow_container(Deadline::none(), &util, Some(&disk1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GrowError::Resize { ref device_id, .. } if device_id == "disk1"
        ));
        assert!(!err.is_benign());
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn resize_timeout() {
        let (disk1, util) = setup(3_000_000, &[]);
        let util = util.fail(Operation::ResizeContainer, Failure::Timeout);

        let err = grow_container(Deadline::none(), &util, Some(&disk1))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
