/*! Typed views of `diskutil`'s property list output

Only the keys `macos-utils` cares about are mapped, everything else `diskutil` emits is ignored. Absent keys
are left at their default value.
*/
use super::identifier::parse_disk_id;

/// The output of `diskutil info -plist <id>`
#[derive(serde::Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct DiskInfo {
    pub device_identifier: String,
    pub device_node: String,
    pub parent_whole_disk: String,
    #[serde(rename = "APFSContainerReference")]
    pub apfs_container_reference: String,
    #[serde(rename = "APFSPhysicalStores")]
    pub apfs_physical_stores: Vec<ApfsPhysicalStore>,
    pub content: String,
    #[serde(rename = "IORegistryEntryName")]
    pub io_registry_entry_name: String,
    /// Either `Virtual` or `Physical`
    pub virtual_or_physical: String,
    pub whole_disk: bool,
    pub internal: bool,
    pub writable: bool,
    pub solid_state: bool,
    pub bus_protocol: String,
    pub media_name: String,
    pub mount_point: String,
    pub volume_name: String,
    pub size: u64,
    pub total_size: u64,
    pub free_space: u64,
    pub volume_size: u64,
    #[serde(rename = "IOKitSize")]
    pub io_kit_size: u64,
    pub device_block_size: u64,
    #[serde(rename = "SMARTStatus")]
    pub smart_status: String,
    /// APFS specific keys, emitted alongside the keys above
    #[serde(flatten)]
    pub container_info: ContainerInfo,
}

/// The APFS container and volume keys of `diskutil info -plist <id>`
#[derive(serde::Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerInfo {
    #[serde(rename = "APFSContainerFree")]
    pub apfs_container_free: u64,
    #[serde(rename = "APFSContainerSize")]
    pub apfs_container_size: u64,
    #[serde(rename = "APFSVolumeGroupID")]
    pub apfs_volume_group_id: String,
    pub filesystem_type: String,
    pub filesystem_name: String,
    pub filesystem_user_visible_name: String,
    pub encryption: bool,
    pub encryption_this_volume_proper: bool,
    pub file_vault: bool,
    pub fusion: bool,
    pub locked: bool,
    #[serde(rename = "DiskUUID")]
    pub disk_uuid: String,
    #[serde(rename = "VolumeUUID")]
    pub volume_uuid: String,
}

/// The physical device backing a synthesized (virtual) APFS container or volume
///
/// `diskutil info` names the key `APFSPhysicalStore`, `diskutil list` names it `DeviceIdentifier`.
#[derive(serde::Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ApfsPhysicalStore {
    #[serde(rename = "APFSPhysicalStore", alias = "DeviceIdentifier", default)]
    pub device_identifier: String,
}

impl ApfsPhysicalStore {
    pub fn new(device_identifier: impl Into<String>) -> Self {
        Self {
            device_identifier: device_identifier.into(),
        }
    }
}

impl DiskInfo {
    pub fn is_physical(&self) -> bool {
        self.virtual_or_physical == "Physical"
    }

    /// An APFS container or volume, as far as `diskutil` is concerned
    pub fn is_apfs_media(&self) -> bool {
        self.container_info.filesystem_type == "apfs"
            || self.io_registry_entry_name == "AppleAPFSMedia"
    }

    /// If `diskutil apfs resizeContainer` has a chance of working on this disk
    pub fn can_apfs_resize(&self) -> bool {
        if self.container_info.filesystem_type == "apfs" {
            return true;
        }

        !self.apfs_container_reference.is_empty() && !self.apfs_physical_stores.is_empty()
    }

    /// The whole-disk identifier of the single physical store backing this disk
    ///
    /// More than one physical store usually means a Fusion drive, which is not something we can grow.
    pub fn parent_device_id(&self) -> Result<String, DiskLayoutError> {
        let store = match self.apfs_physical_stores.as_slice() {
            [store] => store,
            stores => {
                return Err(DiskLayoutError::AmbiguousPhysicalStore {
                    device_id: self.device_identifier.clone(),
                    count: stores.len(),
                })
            },
        };

        parse_disk_id(&store.device_identifier)
            .map(str::to_string)
            .ok_or_else(|| DiskLayoutError::MalformedPhysicalStore(store.device_identifier.clone()))
    }
}

/// The output of `diskutil list -plist`
#[derive(serde::Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct SystemPartitions {
    pub all_disks: Vec<String>,
    pub all_disks_and_partitions: Vec<DiskPart>,
    pub volumes_from_disks: Vec<String>,
    pub whole_disks: Vec<String>,
}

impl SystemPartitions {
    pub fn disk_part(&self, id: &str) -> Option<&DiskPart> {
        self.all_disks_and_partitions
            .iter()
            .find(|part| part.device_identifier.eq_ignore_ascii_case(id))
    }

    /// Space on disk `id` which is not allocated to any partition
    pub fn available_disk_space(&self, id: &str) -> Result<u64, DiskLayoutError> {
        let part = self
            .disk_part(id)
            .ok_or_else(|| DiskLayoutError::DiskNotFound(id.to_string()))?;

        let allocated: u64 = part.partitions.iter().map(|p| p.size).sum();
        Ok(part.size.saturating_sub(allocated))
    }

    pub fn contains_disk(&self, id: &str) -> bool {
        self.all_disks.iter().any(|disk| disk.eq_ignore_ascii_case(id))
    }
}

/// A disk along with its partitions and APFS volumes
#[derive(serde::Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct DiskPart {
    #[serde(rename = "APFSPhysicalStores")]
    pub apfs_physical_stores: Vec<ApfsPhysicalStore>,
    #[serde(rename = "APFSVolumes")]
    pub apfs_volumes: Vec<ApfsVolume>,
    pub content: String,
    pub device_identifier: String,
    #[serde(rename = "OSInternal")]
    pub os_internal: bool,
    pub partitions: Vec<Partition>,
    pub size: u64,
}

#[derive(serde::Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Partition {
    pub content: String,
    pub device_identifier: String,
    #[serde(rename = "DiskUUID")]
    pub disk_uuid: String,
    pub size: u64,
    pub volume_name: String,
    #[serde(rename = "VolumeUUID")]
    pub volume_uuid: String,
}

#[derive(serde::Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ApfsVolume {
    pub device_identifier: String,
    #[serde(rename = "DiskUUID")]
    pub disk_uuid: String,
    pub mount_point: String,
    pub mounted_snapshots: Vec<Snapshot>,
    #[serde(rename = "OSInternal")]
    pub os_internal: bool,
    pub size: u64,
    pub volume_name: String,
    #[serde(rename = "VolumeUUID")]
    pub volume_uuid: String,
}

#[derive(serde::Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Snapshot {
    pub sealed: String,
    #[serde(rename = "SnapshotBSD")]
    pub snapshot_bsd: String,
    pub snapshot_mount_point: String,
    pub snapshot_name: String,
    #[serde(rename = "SnapshotUUID")]
    pub snapshot_uuid: String,
}

/// A disk layout which does not support the operation asked of it
#[non_exhaustive]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DiskLayoutError {
    #[error("Expected exactly one APFS physical store for `{device_id}` but found {count}")]
    AmbiguousPhysicalStore { device_id: String, count: usize },
    #[error("Physical store `{0}` does not contain a device identifier matching `disk[0-9]+`")]
    MalformedPhysicalStore(String),
    #[error("No partition information found for `{0}`")]
    DiskNotFound(String),
}
