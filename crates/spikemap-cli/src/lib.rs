//! spikemap CLI crate
//!
//! Commands (see [commands]):
//! - build: read a TOML network model, build every core image and write
//!   one `<x>_<y>_<p>.bin` file per core plus a JSON manifest
//! - inspect: decode an image file and list its regions
//! - init-config: write the default configuration file
//!
//! The binary (src/main.rs) wires up logging and argument parsing and calls
//! [`SpikemapCli::execute`]. Command modules are public so they can be
//! driven from tests without spawning a process.

#![warn(clippy::all)]

pub mod commands;
pub mod config;
pub mod error;
pub mod model_file;

pub use commands::SpikemapCli;
pub use config::CliConfig;
pub use error::{CliError, CliResult};
pub use model_file::ModelFile;
