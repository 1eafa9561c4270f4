/*! CLI argument structures and utilities

*/

pub(crate) mod arg;
pub(crate) mod subcommand;

use std::process::ExitCode;

use async_trait::async_trait;
use clap::Parser;
use owo_colors::OwoColorize;

use self::subcommand::MacosUtilsSubcommand;
use crate::{
    settings::{BUILD_INFO, LONG_VERSION},
    MacosUtilsError,
};

#[async_trait]
pub trait CommandExecute {
    async fn execute(self) -> eyre::Result<ExitCode>;
}

/**
Utilities for managing macOS hosts

Grows APFS containers into space added to their disks from outside, such as an enlarged cloud volume.
*/
#[derive(Debug, Parser)]
#[clap(version, long_version = LONG_VERSION)]
pub struct MacosUtilsCli {
    #[clap(flatten)]
    pub instrumentation: arg::Instrumentation,

    #[clap(subcommand)]
    pub subcommand: MacosUtilsSubcommand,
}

#[async_trait]
impl CommandExecute for MacosUtilsCli {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn execute(self) -> eyre::Result<ExitCode> {
        tracing::debug!(build = %BUILD_INFO, "Starting macos-utils");

        let ret = match self.subcommand {
            MacosUtilsSubcommand::Grow(grow) => grow.execute().await,
        };

        let maybe_cancelled = ret.as_ref().err().and_then(|err| {
            err.root_cause()
                .downcast_ref::<MacosUtilsError>()
                .filter(|err| matches!(err, MacosUtilsError::Cancelled))
        });

        if let Some(cancelled) = maybe_cancelled {
            eprintln!("{}", cancelled.red());
            return Ok(ExitCode::FAILURE);
        }

        ret
    }
}

pub fn is_root() -> bool {
    let euid = nix::unistd::Uid::effective();
    tracing::trace!("Running as EUID {euid}");
    euid.is_root()
}

/// `diskutil repairDisk` refuses to run without root, so check before touching any disk
pub fn ensure_root() -> Result<(), MacosUtilsError> {
    if !is_root() {
        return Err(MacosUtilsError::NotRoot);
    }
    Ok(())
}

pub fn ensure_macos() -> Result<(), MacosUtilsError> {
    let host = target_lexicon::OperatingSystem::host();
    let is_macos = matches!(
        host,
        target_lexicon::OperatingSystem::MacOSX(_) | target_lexicon::OperatingSystem::Darwin(_)
    );
    if !is_macos {
        return Err(MacosUtilsError::UnsupportedPlatform(host.to_string()));
    }
    Ok(())
}
