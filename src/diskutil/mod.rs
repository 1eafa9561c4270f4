/*! Querying and modifying disks through `diskutil`

[`DiskUtil`] is the seam the rest of the crate works against. [`Diskutil`] implements it on top of the raw
[`DiskutilCommand`] verbs, decoding their output and smoothing over the [`Quirks`] of the running release.
[`DryRun`] wraps any [`DiskUtil`] and refuses to modify anything.
*/
pub mod command;
pub mod decode;
pub mod dry_run;
pub mod identifier;
pub(crate) mod physical_store;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;

pub use command::{DiskutilCommand, SystemDiskutil};
pub use decode::DecodeError;
pub use dry_run::DryRun;
pub use identifier::parse_disk_id;
pub use types::{DiskInfo, DiskLayoutError, SystemPartitions};

use crate::{
    command::{CommandError, Deadline},
    system::{Product, Release},
};

/// Disk inspection and modification, as offered by `diskutil`
#[async_trait]
pub trait DiskUtil: Send + Sync {
    /// Partition information for all disks, optionally narrowed by `diskutil list` arguments
    async fn list(
        &self,
        deadline: Deadline,
        filter_args: &[String],
    ) -> Result<SystemPartitions, DiskutilError>;

    /// Information about a single disk, partition or volume
    async fn info(&self, deadline: Deadline, id: &str) -> Result<DiskInfo, DiskutilError>;

    /// Repair the partition map of the whole disk `id`
    async fn repair_disk(&self, deadline: Deadline, id: &str) -> Result<String, DiskutilError>;

    /// Resize the APFS container `id` to `size`, where `"0"` grows it to the maximum available
    async fn resize_container(
        &self,
        deadline: Deadline,
        id: &str,
        size: &str,
    ) -> Result<String, DiskutilError>;
}

/// Release specific `diskutil` behavior
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Quirks {
    /// `diskutil` omits APFS physical stores from its property lists
    pub physical_store_backfill: bool,
}

impl Quirks {
    pub fn for_release(release: Release) -> Option<Self> {
        let quirks = match release {
            Release::Mojave => Quirks {
                physical_store_backfill: true,
            },
            Release::Catalina
            | Release::BigSur
            | Release::Monterey
            | Release::Ventura
            | Release::Sonoma
            | Release::Sequoia => Quirks::default(),
            Release::CompatMode | Release::Unknown => return None,
        };
        Some(quirks)
    }
}

/// [`DiskUtil`] backed by a [`DiskutilCommand`]
#[derive(Debug, Clone)]
pub struct Diskutil<C = SystemDiskutil> {
    command: C,
    quirks: Quirks,
}

impl Diskutil<SystemDiskutil> {
    /// The host's `diskutil`, configured for `product`
    pub fn for_product(product: &Product) -> Result<Self, DiskutilError> {
        let quirks = Quirks::for_release(product.release)
            .ok_or_else(|| DiskutilError::UnsupportedRelease(product.clone()))?;
        tracing::debug!(%product, ?quirks, "Selected diskutil quirks");
        Ok(Self::new(SystemDiskutil::default(), quirks))
    }
}

impl<C> Diskutil<C>
where
    C: DiskutilCommand,
{
    pub fn new(command: C, quirks: Quirks) -> Self {
        Self { command, quirks }
    }
}

#[async_trait]
impl<C> DiskUtil for Diskutil<C>
where
    C: DiskutilCommand,
{
    #[tracing::instrument(level = "debug", skip_all, fields(filter_args = ?filter_args))]
    async fn list(
        &self,
        deadline: Deadline,
        filter_args: &[String],
    ) -> Result<SystemPartitions, DiskutilError> {
        let raw = self
            .command
            .list(deadline, filter_args)
            .await
            .map_err(|source| DiskutilError::Command {
                operation: Operation::List,
                source,
            })?;
        let mut partitions =
            decode::decode_system_partitions(raw.as_bytes()).map_err(|source| {
                DiskutilError::Decode {
                    operation: Operation::List,
                    source,
                }
            })?;

        if self.quirks.physical_store_backfill {
            if let Err(err) =
                physical_store::backfill_system_partitions(&self.command, deadline, &mut partitions)
                    .await
            {
                return Err(DiskutilError::IncompleteList {
                    partitions: Box::new(partitions),
                    source: Box::new(err),
                });
            }
        }

        Ok(partitions)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(id = %id))]
    async fn info(&self, deadline: Deadline, id: &str) -> Result<DiskInfo, DiskutilError> {
        let raw = self
            .command
            .info(deadline, id)
            .await
            .map_err(|source| DiskutilError::Command {
                operation: Operation::Info,
                source,
            })?;
        let mut disk =
            decode::decode_disk_info(raw.as_bytes()).map_err(|source| DiskutilError::Decode {
                operation: Operation::Info,
                source,
            })?;

        if self.quirks.physical_store_backfill {
            if let Err(err) =
                physical_store::backfill_disk_info(&self.command, deadline, &mut disk).await
            {
                return Err(DiskutilError::IncompleteInfo {
                    info: Box::new(disk),
                    source: Box::new(err),
                });
            }
        }

        Ok(disk)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(id = %id))]
    async fn repair_disk(&self, deadline: Deadline, id: &str) -> Result<String, DiskutilError> {
        self.command
            .repair_disk(deadline, id)
            .await
            .map_err(|source| DiskutilError::Command {
                operation: Operation::RepairDisk,
                source,
            })
    }

    #[tracing::instrument(level = "debug", skip_all, fields(id = %id, size = %size))]
    async fn resize_container(
        &self,
        deadline: Deadline,
        id: &str,
        size: &str,
    ) -> Result<String, DiskutilError> {
        self.command
            .resize_container(deadline, id, size)
            .await
            .map_err(|source| DiskutilError::Command {
                operation: Operation::ResizeContainer,
                source,
            })
    }
}

/// The `diskutil` verb an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Operation {
    #[strum(serialize = "list")]
    List,
    #[strum(serialize = "info")]
    Info,
    #[strum(serialize = "repairDisk")]
    RepairDisk,
    #[strum(serialize = "resizeContainer")]
    ResizeContainer,
    /// The human readable `diskutil list <id>` used to find physical stores
    #[strum(serialize = "list (physical store)")]
    PhysicalStore,
}

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum DiskutilError {
    #[error("Running `diskutil {operation}`")]
    Command {
        operation: Operation,
        #[source]
        source: CommandError,
    },
    #[error("Decoding `diskutil {operation}` output")]
    Decode {
        operation: Operation,
        #[source]
        source: DecodeError,
    },
    #[error("Physical store not found for `{0}`")]
    PhysicalStoreNotFound(String),
    #[error("Backfilling the physical store of `{}`", .info.device_identifier)]
    IncompleteInfo {
        /// The disk information decoded before backfilling failed
        info: Box<DiskInfo>,
        #[source]
        source: Box<DiskutilError>,
    },
    #[error("Backfilling physical stores of listed disks")]
    IncompleteList {
        /// The partitions decoded before backfilling failed
        partitions: Box<SystemPartitions>,
        #[source]
        source: Box<DiskutilError>,
    },
    #[error("Skipped `diskutil {operation}` in read-only mode")]
    ReadOnly { operation: Operation },
    #[error("`diskutil` is not supported on {0}")]
    UnsupportedRelease(Product),
}

impl DiskutilError {
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadOnly { .. })
    }

    /// If a `diskutil` invocation ran out of time
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Command { source, .. } => source.is_timeout(),
            Self::IncompleteInfo { source, .. } | Self::IncompleteList { source, .. } => {
                source.is_timeout()
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        decode::tests::{CONTAINER_INFO, DISK_LIST},
        fake::FakeDiskutilCommand,
        physical_store::tests::MOJAVE_CONTAINER_LIST,
        types::ApfsPhysicalStore,
        *,
    };

    const MOJAVE_CONTAINER_INFO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
	<key>DeviceIdentifier</key>
	<string>disk1</string>
	<key>FilesystemType</key>
	<string>apfs</string>
	<key>ParentWholeDisk</key>
	<string>disk1</string>
	<key>VirtualOrPhysical</key>
	<string>Virtual</string>
</dict>
</plist>
"#;

    const MOJAVE_DISK_LIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
	<key>AllDisks</key>
	<array>
		<string>disk0</string>
		<string>disk0s1</string>
		<string>disk0s2</string>
		<string>disk1</string>
		<string>disk1s1</string>
	</array>
	<key>AllDisksAndPartitions</key>
	<array>
		<dict>
			<key>DeviceIdentifier</key>
			<string>disk0</string>
			<key>Partitions</key>
			<array>
				<dict>
					<key>DeviceIdentifier</key>
					<string>disk0s1</string>
				</dict>
				<dict>
					<key>DeviceIdentifier</key>
					<string>disk0s2</string>
				</dict>
			</array>
		</dict>
		<dict>
			<key>APFSVolumes</key>
			<array>
				<dict>
					<key>DeviceIdentifier</key>
					<string>disk1s1</string>
				</dict>
			</array>
			<key>DeviceIdentifier</key>
			<string>disk1</string>
		</dict>
	</array>
</dict>
</plist>
"#;

    const BACKFILL: Quirks = Quirks {
        physical_store_backfill: true,
    };

    #[test]
    fn quirks_per_release() {
        assert_eq!(Quirks::for_release(Release::Mojave), Some(BACKFILL));
        for release in [
            Release::Catalina,
            Release::BigSur,
            Release::Monterey,
            Release::Ventura,
            Release::Sonoma,
            Release::Sequoia,
        ] {
            assert_eq!(Quirks::for_release(release), Some(Quirks::default()));
        }
        assert_eq!(Quirks::for_release(Release::CompatMode), None);
        assert_eq!(Quirks::for_release(Release::Unknown), None);
    }

    #[test]
    fn unsupported_product() {
        let product = Product {
            release: Release::Unknown,
            version: semver::Version::new(9, 0, 0),
        };
        assert!(matches!(
            Diskutil::for_product(&product),
            Err(DiskutilError::UnsupportedRelease(_))
        ));
    }

    #[tokio::test]
    async fn info_decodes_output() {
        let command = FakeDiskutilCommand {
            info: CONTAINER_INFO.into(),
            ..Default::default()
        };
        let diskutil = Diskutil::new(command, Quirks::default());

        let disk = diskutil.info(Deadline::none(), "disk2").await.unwrap();
        assert_eq!(disk.device_identifier, "disk2");
        assert_eq!(diskutil.command.calls(), ["info disk2"]);
    }

    #[tokio::test]
    async fn info_backfills_physical_store() {
        let command = FakeDiskutilCommand {
            info: MOJAVE_CONTAINER_INFO.into(),
            list_text: Some(MOJAVE_CONTAINER_LIST.into()),
            ..Default::default()
        };
        let diskutil = Diskutil::new(command, BACKFILL);

        let disk = diskutil.info(Deadline::none(), "disk1").await.unwrap();
        assert_eq!(
            disk.apfs_physical_stores,
            vec![ApfsPhysicalStore::new("disk0s2")]
        );
        assert_eq!(disk.parent_device_id(), Ok("disk0".to_string()));
        assert_eq!(diskutil.command.calls(), ["info disk1", "list_text disk1"]);
    }

    #[tokio::test]
    async fn info_backfill_failure_keeps_partial_info() {
        let command = FakeDiskutilCommand {
            info: MOJAVE_CONTAINER_INFO.into(),
            list_text: Some("/dev/disk1 (synthesized):\n".into()),
            ..Default::default()
        };
        let diskutil = Diskutil::new(command, BACKFILL);

        match diskutil.info(Deadline::none(), "disk1").await {
            Err(DiskutilError::IncompleteInfo { info, source }) => {
                assert_eq!(info.device_identifier, "disk1");
                assert!(info.apfs_physical_stores.is_empty());
                assert!(matches!(
                    *source,
                    DiskutilError::PhysicalStoreNotFound(id) if id == "disk1"
                ));
            },
            other => panic!("Expected IncompleteInfo, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn info_without_quirks_skips_backfill() {
        let command = FakeDiskutilCommand {
            info: MOJAVE_CONTAINER_INFO.into(),
            ..Default::default()
        };
        let diskutil = Diskutil::new(command, Quirks::default());

        let disk = diskutil.info(Deadline::none(), "disk1").await.unwrap();
        assert!(disk.apfs_physical_stores.is_empty());
        assert_eq!(diskutil.command.calls(), ["info disk1"]);
    }

    #[tokio::test]
    async fn list_decodes_output() {
        let command = FakeDiskutilCommand {
            list: DISK_LIST.into(),
            ..Default::default()
        };
        let diskutil = Diskutil::new(command, Quirks::default());

        let partitions = diskutil.list(Deadline::none(), &[]).await.unwrap();
        assert!(partitions.contains_disk("disk0"));
        assert_eq!(diskutil.command.calls(), ["list"]);
    }

    #[tokio::test]
    async fn list_backfills_disks_with_volumes() {
        let command = FakeDiskutilCommand {
            list: MOJAVE_DISK_LIST.into(),
            list_text: Some(MOJAVE_CONTAINER_LIST.into()),
            ..Default::default()
        };
        let diskutil = Diskutil::new(command, BACKFILL);

        let partitions = diskutil.list(Deadline::none(), &[]).await.unwrap();
        let disk0 = partitions.disk_part("disk0").unwrap();
        assert!(disk0.apfs_physical_stores.is_empty());
        let disk1 = partitions.disk_part("disk1").unwrap();
        assert_eq!(
            disk1.apfs_physical_stores,
            vec![ApfsPhysicalStore::new("disk0s2")]
        );
        assert_eq!(diskutil.command.calls(), ["list", "list_text disk1"]);
    }

    #[tokio::test]
    async fn command_failures_name_the_operation() {
        let diskutil = Diskutil::new(FakeDiskutilCommand::default(), Quirks::default());

        let err = diskutil
            .resize_container(Deadline::none(), "disk1", "0")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DiskutilError::Command {
                operation: Operation::ResizeContainer,
                ..
            }
        ));
        assert_eq!(err.to_string(), "Running `diskutil resizeContainer`");
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn timeouts_are_visible_through_backfill() {
        let command = FakeDiskutilCommand {
            info: MOJAVE_CONTAINER_INFO.into(),
            list_text: None,
            time_out: true,
            ..Default::default()
        };
        let diskutil = Diskutil::new(command, BACKFILL);

        let err = diskutil.info(Deadline::none(), "disk1").await.unwrap_err();
        assert!(matches!(err, DiskutilError::IncompleteInfo { .. }));
        assert!(err.is_timeout());
    }
}
