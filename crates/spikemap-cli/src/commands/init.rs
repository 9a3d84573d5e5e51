//! Configuration file initialization

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::config::CliConfig;
use crate::error::{CliError, CliResult};

/// Write the default configuration file
#[derive(Args, Debug)]
pub struct InitConfigCommand {
    /// Where to write the file; the global --config path or the user
    /// configuration directory when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

impl InitConfigCommand {
    /// Write defaults to the chosen path
    pub fn execute(self, config: Option<PathBuf>) -> CliResult<()> {
        let path = match self.output.or(config) {
            Some(path) => path,
            None => CliConfig::default_config_path()?,
        };
        if path.exists() && !self.force {
            return Err(CliError::invalid_args(format!(
                "{} already exists, pass --force to overwrite",
                path.display()
            )));
        }
        CliConfig::default().save_to_file(&path)?;
        info!("Wrote default configuration to {}", path.display());
        Ok(())
    }
}
