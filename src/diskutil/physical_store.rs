/*! Physical store backfill for releases whose `diskutil` omits it

Mojave's `diskutil` leaves `APFSPhysicalStores` out of its property list output for APFS media, but still
prints the store in the human readable `diskutil list <id>` form:

```text
/dev/disk1 (synthesized):
   #:                       TYPE NAME                    SIZE       IDENTIFIER
   0:      APFS Container Scheme -                      +121.1 GB   disk1
                                 Physical Store disk0s2
```
*/
use once_cell::sync::Lazy;
use regex::Regex;

use super::{
    command::DiskutilCommand,
    types::{ApfsPhysicalStore, DiskInfo, SystemPartitions},
    DiskutilError, Operation,
};
use crate::command::Deadline;

static PHYSICAL_STORE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*Physical Store disk[0-9]+(s[0-9]+)*").expect("valid regex")
});
static PHYSICAL_STORE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"disk[0-9]+(s[0-9]+)*").expect("valid regex"));

/// Find the physical store identifier in human readable `diskutil list` output
pub(crate) fn parse_physical_store_id(raw: &str) -> Option<&str> {
    let line = PHYSICAL_STORE_LINE.find(raw)?;
    PHYSICAL_STORE_ID
        .find(line.as_str())
        .map(|found| found.as_str())
}

#[tracing::instrument(level = "debug", skip(command, deadline))]
pub(crate) async fn fetch_physical_store<C>(
    command: &C,
    deadline: Deadline,
    id: &str,
) -> Result<String, DiskutilError>
where
    C: DiskutilCommand + ?Sized,
{
    let raw = command
        .list_text(deadline, id)
        .await
        .map_err(|source| DiskutilError::Command {
            operation: Operation::PhysicalStore,
            source,
        })?;

    let store = parse_physical_store_id(&raw)
        .ok_or_else(|| DiskutilError::PhysicalStoreNotFound(id.to_string()))?;
    tracing::debug!(store, "Found physical store");
    Ok(store.to_string())
}

/// Append the physical store of APFS media to `disk`
pub(crate) async fn backfill_disk_info<C>(
    command: &C,
    deadline: Deadline,
    disk: &mut DiskInfo,
) -> Result<(), DiskutilError>
where
    C: DiskutilCommand + ?Sized,
{
    if !disk.is_apfs_media() {
        return Ok(());
    }

    let store = fetch_physical_store(command, deadline, &disk.device_identifier).await?;
    disk.apfs_physical_stores.push(ApfsPhysicalStore::new(store));
    Ok(())
}

/// Append the physical store of every listed disk carrying APFS volumes
pub(crate) async fn backfill_system_partitions<C>(
    command: &C,
    deadline: Deadline,
    partitions: &mut SystemPartitions,
) -> Result<(), DiskutilError>
where
    C: DiskutilCommand + ?Sized,
{
    for part in partitions
        .all_disks_and_partitions
        .iter_mut()
        .filter(|part| !part.apfs_volumes.is_empty())
    {
        let store = fetch_physical_store(command, deadline, &part.device_identifier).await?;
        part.apfs_physical_stores.push(ApfsPhysicalStore::new(store));
    }
    Ok(())
}
