//! # spikemap CLI
//!
//! Builds the memory image of every core of a placed spiking network and
//! inspects the images it produced.

use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spikemap_cli::SpikemapCli;

fn main() {
    let cli = SpikemapCli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(err) = cli.execute() {
        error!("Command failed: {}", err);
        std::process::exit(1);
    }
}
