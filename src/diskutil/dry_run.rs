use async_trait::async_trait;

use super::{
    types::{DiskInfo, SystemPartitions},
    DiskUtil, DiskutilError, Operation,
};
use crate::command::Deadline;

/// A [`DiskUtil`] which inspects disks but never modifies them
///
/// Queries are forwarded to the wrapped [`DiskUtil`], modifications fail with [`DiskutilError::ReadOnly`].
#[derive(Debug, Clone)]
pub struct DryRun<D> {
    inner: D,
}

impl<D> DryRun<D>
where
    D: DiskUtil,
{
    pub fn new(inner: D) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> D {
        self.inner
    }
}

#[async_trait]
impl<D> DiskUtil for DryRun<D>
where
    D: DiskUtil,
{
    async fn list(
        &self,
        deadline: Deadline,
        filter_args: &[String],
    ) -> Result<SystemPartitions, DiskutilError> {
        self.inner.list(deadline, filter_args).await
    }

    async fn info(&self, deadline: Deadline, id: &str) -> Result<DiskInfo, DiskutilError> {
        self.inner.info(deadline, id).await
    }

    async fn repair_disk(&self, _deadline: Deadline, id: &str) -> Result<String, DiskutilError> {
        tracing::debug!(id, "Dry run, not repairing disk");
        Err(DiskutilError::ReadOnly {
            operation: Operation::RepairDisk,
        })
    }

    async fn resize_container(
        &self,
        _deadline: Deadline,
        id: &str,
        size: &str,
    ) -> Result<String, DiskutilError> {
        tracing::debug!(id, size, "Dry run, not resizing container");
        Err(DiskutilError::ReadOnly {
            operation: Operation::ResizeContainer,
        })
    }
}
