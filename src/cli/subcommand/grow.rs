use std::{process::ExitCode, time::Duration};

use async_trait::async_trait;
use clap::{ArgAction, Parser};
use eyre::WrapErr;

use crate::{
    cli::{arg::parse_duration, ensure_macos, ensure_root, CommandExecute},
    command::Deadline,
    diskutil::{DiskUtil, Diskutil, DryRun},
    grow::grow_container,
    settings::DEFAULT_GROW_TIMEOUT,
    system, target, MacosUtilsError,
};

/**
Resize a container to its maximum size

The container to operate on can be given by its identifier (`disk1`) or device node (`/dev/disk1`), or as
`root` for the container of the volume mounted at `/`.
*/
#[derive(Debug, Parser)]
pub struct Grow {
    /// Container identifier to be resized, or `root`
    #[clap(long, env = "MACOS_UTILS_ID")]
    pub id: String,

    /// Run without modifying any disk
    #[clap(
        long,
        env = "MACOS_UTILS_DRY_RUN",
        action(ArgAction::SetTrue),
        default_value = "false"
    )]
    pub dry_run: bool,

    /// Time limit for the command (e.g. `30s`, `1m`, `1.5h`), `0` disables the limit [default: 5m]
    #[clap(long, env = "MACOS_UTILS_TIMEOUT", value_parser = parse_duration)]
    pub timeout: Option<Duration>,
}

impl Grow {
    /// The time limit for the whole command
    pub fn budget(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_GROW_TIMEOUT)
    }
}

#[async_trait]
impl CommandExecute for Grow {
    #[tracing::instrument(level = "debug", skip_all, fields(id = %self.id, dry_run = self.dry_run))]
    async fn execute(self) -> eyre::Result<ExitCode> {
        let timeout = self.budget();
        let Self { id, dry_run, .. } = self;

        ensure_macos()?;
        ensure_root()?;

        let product = system::scan().map_err(MacosUtilsError::from)?;
        tracing::info!(%product, "Configuring diskutil for product");
        let diskutil = Diskutil::for_product(&product).map_err(MacosUtilsError::from)?;
        let util: Box<dyn DiskUtil> = if dry_run {
            Box::new(DryRun::new(diskutil))
        } else {
            Box::new(diskutil)
        };

        let deadline = Deadline::from_timeout(timeout);
        tracing::debug!(?timeout, "Running grow command");

        let ret = tokio::select! {
            ret = run(deadline, util.as_ref(), &id) => ret,
            _ = tokio::signal::ctrl_c() => Err(MacosUtilsError::Cancelled),
        };

        ret.wrap_err_with(|| format!("Growing `{id}`"))?;
        Ok(ExitCode::SUCCESS)
    }
}

/// Grow the container `id` names, then report the new size of its disk
///
/// Running out of free space to grow into is not an error.
pub(crate) async fn run(
    deadline: Deadline,
    util: &dyn DiskUtil,
    id: &str,
) -> Result<(), MacosUtilsError> {
    grow(deadline, util, id).await.map_err(|err| {
        if err.is_timeout() {
            MacosUtilsError::TimeoutExceeded(Box::new(err))
        } else {
            err
        }
    })
}

async fn grow(deadline: Deadline, util: &dyn DiskUtil, id: &str) -> Result<(), MacosUtilsError> {
    let disk = target::resolve(deadline, util, id).await?;

    tracing::info!(device_id = %disk.device_identifier, "Attempting to grow container");
    match grow_container(deadline, util, Some(&disk)).await {
        Ok(()) => (),
        Err(err) if err.is_benign() => {
            tracing::info!(id, "Nothing to do without free space, stopping command");
            return Ok(());
        },
        Err(err) => return Err(err.into()),
    }

    tracing::info!(
        device_id = %disk.parent_whole_disk,
        "Fetching updated information for device"
    );
    let updated = target::resolve(deadline, util, &disk.parent_whole_disk).await?;
    tracing::info!(
        device_id = %disk.device_identifier,
        total_size = updated.total_size,
        "Successfully grew device to maximum size"
    );

    Ok(())
}
