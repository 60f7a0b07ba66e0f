//! Command-line arguments, grounded on the mint daemon's own `CLIArgs`:
//! a thin `clap` derive that only overrides where to find configuration,
//! everything else is settled by [`crate::config::Settings`].

use std::path::PathBuf;

use clap::Parser;

/// A paid reverse proxy in front of an OpenAI-compatible API, metered in
/// cashu ecash.
#[derive(Parser)]
#[command(author = env!("CARGO_PKG_AUTHORS"), version = env!("CARGO_PKG_VERSION"))]
pub struct CliArgs {
    /// Use the <directory> as the location of the working directory
    #[arg(short, long, required = false)]
    pub work_dir: Option<PathBuf>,
    /// Use the <file name> as the location of the config file
    #[arg(short, long, required = false)]
    pub config: Option<PathBuf>,
}
