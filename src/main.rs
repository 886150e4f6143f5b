//! `sheetstep` binary: parse arguments, set up logging, run one command.

#![warn(clippy::all, rust_2018_idioms)]

use anyhow::Result;
use clap::Parser as _;
use sheetstep::cli::{self, Cli};
use sheetstep::logging;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli::load_settings(cli.settings.as_deref())?;
    logging::init(&settings)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    cli::run_command(cli.command, settings, &mut out)
}
