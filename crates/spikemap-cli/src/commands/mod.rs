//! CLI command implementations for spikemap

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::CliConfig;
use crate::error::CliResult;

pub mod build;
pub mod init;
pub mod inspect;

/// spikemap - per-core memory images for spiking networks
#[derive(Parser, Debug)]
#[command(
    name = "spikemap",
    version,
    about = "Build and inspect per-core memory images of placed spiking networks",
    long_about = "spikemap turns a placed spiking network into the binary image every \
                  processing core is loaded with: neuron parameters, synaptic matrices, \
                  routing tables, delay-extension relays and recording buffers."
)]
pub struct SpikemapCli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SPIKEMAP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build every core image of a network model
    Build(build::BuildCommand),

    /// Show the regions of an image file
    Inspect(inspect::InspectCommand),

    /// Write the default configuration file
    InitConfig(init::InitConfigCommand),
}

impl SpikemapCli {
    /// Execute the CLI command
    pub fn execute(self) -> CliResult<()> {
        match self.command {
            Commands::Build(cmd) => {
                let config = CliConfig::resolve(self.config.as_deref())?;
                cmd.execute(&config)
            }
            Commands::Inspect(cmd) => cmd.execute(),
            Commands::InitConfig(cmd) => cmd.execute(self.config),
        }
    }
}
