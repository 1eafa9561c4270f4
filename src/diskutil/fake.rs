//! Recording stand-ins for `diskutil`, for tests
use std::{
    collections::HashMap,
    os::unix::process::ExitStatusExt,
    process::ExitStatus,
    sync::Mutex,
};

use async_trait::async_trait;

use super::{
    command::DiskutilCommand,
    types::{DiskInfo, SystemPartitions},
    DiskUtil, DiskutilError, Operation,
};
use crate::command::{CommandError, CommandOutput, Deadline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    /// The command exited unsuccessfully
    Exit,
    /// The command ran past its deadline
    Timeout,
}

impl Failure {
    fn command_error(self, stderr: &str) -> CommandError {
        let output = CommandOutput {
            stdout: String::new(),
            stderr: stderr.into(),
        };
        match self {
            Failure::Exit => CommandError::Failed {
                program: "diskutil".into(),
                status: ExitStatus::from_raw(1 << 8),
                output,
            },
            Failure::Timeout => CommandError::Timeout {
                program: "diskutil".into(),
                output,
            },
        }
    }
}

/// Canned raw `diskutil` output
#[derive(Debug, Default)]
pub(crate) struct FakeDiskutilCommand {
    pub info: String,
    pub list: String,
    /// `None` fails the command
    pub list_text: Option<String>,
    /// `None` fails the command
    pub resize: Option<String>,
    /// Failures are timeouts instead of unsuccessful exits
    pub time_out: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeDiskutilCommand {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn respond(&self, canned: &Option<String>) -> Result<String, CommandError> {
        let failure = if self.time_out {
            Failure::Timeout
        } else {
            Failure::Exit
        };
        canned
            .clone()
            .ok_or_else(|| failure.command_error("canned failure"))
    }
}

#[async_trait]
impl DiskutilCommand for FakeDiskutilCommand {
    async fn list(&self, _deadline: Deadline, args: &[String]) -> Result<String, CommandError> {
        self.record(
            std::iter::once("list".to_string())
                .chain(args.iter().cloned())
                .collect::<Vec<_>>()
                .join(" "),
        );
        Ok(self.list.clone())
    }

    async fn info(&self, _deadline: Deadline, id: &str) -> Result<String, CommandError> {
        self.record(format!("info {id}"));
        Ok(self.info.clone())
    }

    async fn repair_disk(&self, _deadline: Deadline, id: &str) -> Result<String, CommandError> {
        self.record(format!("repairDisk {id}"));
        Ok(format!("Repair of {id} complete"))
    }

    async fn resize_container(
        &self,
        _deadline: Deadline,
        id: &str,
        size: &str,
    ) -> Result<String, CommandError> {
        self.record(format!("resizeContainer {id} {size}"));
        self.respond(&self.resize)
    }

    async fn list_text(&self, _deadline: Deadline, id: &str) -> Result<String, CommandError> {
        self.record(format!("list_text {id}"));
        self.respond(&self.list_text)
    }
}

/// Decoded `diskutil` records keyed by device identifier, with scripted failures
#[derive(Debug, Default)]
pub(crate) struct FakeDiskUtil {
    pub infos: HashMap<String, DiskInfo>,
    pub partitions: SystemPartitions,
    pub failures: HashMap<Operation, Failure>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeDiskUtil {
    pub fn with_disks(disks: impl IntoIterator<Item = DiskInfo>) -> Self {
        Self {
            infos: disks
                .into_iter()
                .map(|disk| (disk.device_identifier.clone(), disk))
                .collect(),
            ..Default::default()
        }
    }

    pub fn fail(mut self, operation: Operation, failure: Failure) -> Self {
        self.failures.insert(operation, failure);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn call(&self, operation: Operation, args: &[&str]) -> Result<(), DiskutilError> {
        let mut call = operation.to_string();
        for arg in args {
            call.push(' ');
            call.push_str(arg);
        }
        self.calls.lock().unwrap().push(call);

        match self.failures.get(&operation) {
            Some(failure) => Err(DiskutilError::Command {
                operation,
                source: failure.command_error("scripted failure"),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DiskUtil for FakeDiskUtil {
    async fn list(
        &self,
        _deadline: Deadline,
        filter_args: &[String],
    ) -> Result<SystemPartitions, DiskutilError> {
        let args: Vec<&str> = filter_args.iter().map(String::as_str).collect();
        self.call(Operation::List, &args)?;
        Ok(self.partitions.clone())
    }

    async fn info(&self, _deadline: Deadline, id: &str) -> Result<DiskInfo, DiskutilError> {
        self.call(Operation::Info, &[id])?;
        self.infos
            .get(id)
            .cloned()
            .ok_or_else(|| DiskutilError::Command {
                operation: Operation::Info,
                source: Failure::Exit.command_error("Could not find disk"),
            })
    }

    async fn repair_disk(&self, _deadline: Deadline, id: &str) -> Result<String, DiskutilError> {
        self.call(Operation::RepairDisk, &[id])?;
        Ok(format!("Repair of {id} complete"))
    }

    async fn resize_container(
        &self,
        _deadline: Deadline,
        id: &str,
        size: &str,
    ) -> Result<String, DiskutilError> {
        self.call(Operation::ResizeContainer, &[id, size])?;
        Ok(format!("Resized {id} to {size}"))
    }
}
