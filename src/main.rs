use std::{io::IsTerminal, process::ExitCode};

use clap::Parser;
use macos_utils::cli::CommandExecute;

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::config::HookBuilder::default()
        .theme(if !std::io::stderr().is_terminal() {
            color_eyre::config::Theme::new()
        } else {
            color_eyre::config::Theme::dark()
        })
        .install()?;

    let cli = macos_utils::cli::MacosUtilsCli::parse();

    cli.instrumentation.setup()?;

    cli.execute().await
}
