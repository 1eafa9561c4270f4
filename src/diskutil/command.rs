use async_trait::async_trait;

use crate::{
    command::{execute, execute_interactive, CommandError, CommandInvocation, Deadline},
    settings::DISKUTIL_PATH,
};

/// The raw `diskutil` verbs, returning stdout undecoded
#[async_trait]
pub trait DiskutilCommand: Send + Sync {
    /// `diskutil list -plist [args...]`
    async fn list(&self, deadline: Deadline, args: &[String]) -> Result<String, CommandError>;
    /// `diskutil info -plist <id>`
    async fn info(&self, deadline: Deadline, id: &str) -> Result<String, CommandError>;
    /// `diskutil repairDisk <id>`, answering its confirmation prompt
    async fn repair_disk(&self, deadline: Deadline, id: &str) -> Result<String, CommandError>;
    /// `diskutil apfs resizeContainer <id> <size>`
    async fn resize_container(
        &self,
        deadline: Deadline,
        id: &str,
        size: &str,
    ) -> Result<String, CommandError>;
    /// `diskutil list <id>`, in its human readable form
    async fn list_text(&self, deadline: Deadline, id: &str) -> Result<String, CommandError>;
}

/// The host's `diskutil`
#[derive(Debug, Clone)]
pub struct SystemDiskutil {
    program: String,
}

impl Default for SystemDiskutil {
    fn default() -> Self {
        Self {
            program: DISKUTIL_PATH.into(),
        }
    }
}

impl SystemDiskutil {
    fn invocation<'a>(
        &'a self,
        deadline: Deadline,
        args: impl IntoIterator<Item = &'a str>,
    ) -> CommandInvocation {
        CommandInvocation::new(std::iter::once(self.program.as_str()).chain(args))
            .deadline(deadline)
    }
}

#[async_trait]
impl DiskutilCommand for SystemDiskutil {
    async fn list(&self, deadline: Deadline, args: &[String]) -> Result<String, CommandError> {
        let args = ["list", "-plist"]
            .into_iter()
            .chain(args.iter().map(String::as_str));
        Ok(execute(self.invocation(deadline, args)).await?.stdout)
    }

    async fn info(&self, deadline: Deadline, id: &str) -> Result<String, CommandError> {
        Ok(execute(self.invocation(deadline, ["info", "-plist", id]))
            .await?
            .stdout)
    }

    async fn repair_disk(&self, deadline: Deadline, id: &str) -> Result<String, CommandError> {
        Ok(
            execute_interactive(self.invocation(deadline, ["repairDisk", id]))
                .await?
                .stdout,
        )
    }

    async fn resize_container(
        &self,
        deadline: Deadline,
        id: &str,
        size: &str,
    ) -> Result<String, CommandError> {
        Ok(
            execute(self.invocation(deadline, ["apfs", "resizeContainer", id, size]))
                .await?
                .stdout,
        )
    }

    async fn list_text(&self, deadline: Deadline, id: &str) -> Result<String, CommandError> {
        Ok(execute(self.invocation(deadline, ["list", id])).await?.stdout)
    }
}
