mod grow;
pub use grow::Grow;

#[derive(Debug, clap::Subcommand)]
pub enum MacosUtilsSubcommand {
    Grow(Grow),
}
