//! Image build command

use std::path::PathBuf;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use spikemap_build::{build_images, CoreReport};
use spikemap_image::{CoreLocation, IMAGE_CRATE_VERSION};
use tracing::info;

use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::model_file::ModelFile;

/// Build every core image of a network model
#[derive(Args, Debug)]
pub struct BuildCommand {
    /// Network model (TOML)
    pub model: PathBuf,

    /// Directory the images and manifest are written to
    #[arg(short, long, default_value = "images")]
    pub output: PathBuf,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Summary written next to the images
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    /// Image format version
    pub image_version: u32,
    /// Simulation time step the images were built for
    pub machine_time_step_us: u32,
    /// Pointer-table slots per image
    pub max_regions: usize,
    /// One entry per image
    pub images: Vec<ManifestEntry>,
}

/// One written image
#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    /// File name within the output directory
    pub file: String,
    /// What was built
    #[serde(flatten)]
    pub report: CoreReport,
}

/// Name of the image file of `core`
pub fn image_file_name(core: CoreLocation) -> String {
    format!("{}_{}_{}.bin", core.x, core.y, core.p)
}

/// Core of an image file named by [`image_file_name`]
pub fn parse_image_file_name(name: &str) -> Option<CoreLocation> {
    let mut parts = name.strip_suffix(".bin")?.split('_');
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    let p = parts.next()?.parse().ok()?;
    match parts.next() {
        None => Some(CoreLocation::new(x, y, p)),
        Some(_) => None,
    }
}

impl BuildCommand {
    /// Build, then write images and the manifest
    pub fn execute(self, config: &CliConfig) -> CliResult<()> {
        info!("Building images for {}", self.model.display());
        let request = ModelFile::load(&self.model)?.into_request(config.build.clone())?;

        // nothing is written unless every core builds
        let output = build_images(&request)?;
        let reports = output.reports(&request);

        std::fs::create_dir_all(&self.output)?;
        let progress = if self.no_progress || !config.preferences.show_progress {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(reports.len() as u64);
            bar.set_style(
                ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
                    .map_err(|e| CliError::Generic(anyhow::anyhow!(e)))?,
            );
            bar
        };

        let images = output.images.iter().chain(&output.delay_images);
        let mut entries = Vec::with_capacity(reports.len());
        for ((_, image), report) in images.zip(reports) {
            let file = image_file_name(image.core());
            progress.set_message(file.clone());
            std::fs::write(self.output.join(&file), image.as_bytes())?;
            entries.push(ManifestEntry { file, report });
            progress.inc(1);
        }
        progress.finish_and_clear();

        let manifest = Manifest {
            image_version: IMAGE_CRATE_VERSION,
            machine_time_step_us: request.config.machine_time_step_us,
            max_regions: request.config.max_regions,
            images: entries,
        };
        let manifest_path = self.output.join(&config.preferences.manifest_name);
        std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;

        info!(
            "Wrote {} neuron and {} delay images to {}",
            output.images.len(),
            output.delay_images.len(),
            self.output.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_file_names() {
        let core = CoreLocation::new(3, 12, 17);
        assert_eq!(image_file_name(core), "3_12_17.bin");
        assert_eq!(parse_image_file_name("3_12_17.bin"), Some(core));
        assert_eq!(parse_image_file_name("3_12.bin"), None);
        assert_eq!(parse_image_file_name("3_12_17_1.bin"), None);
        assert_eq!(parse_image_file_name("manifest.json"), None);
    }
}
