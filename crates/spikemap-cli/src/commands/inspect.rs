//! Image inspection command

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;
use spikemap_build::{read_shifts, CoreKind};
use spikemap_image::image::calculate_checksum;
use spikemap_image::regions::DEFAULT_MAX_REGIONS;
use spikemap_image::{
    magic, CoreImage, CoreLocation, DelayRegion, MasterPopulationTable, PopulationRegion, Region,
};
use tracing::{debug, info};

use crate::commands::build::parse_image_file_name;
use crate::error::{CliError, CliResult};

/// Show the regions of an image file
#[derive(Args, Debug)]
pub struct InspectCommand {
    /// Image file written by `build`
    pub image: PathBuf,

    /// Pointer-table slots the image was built with
    #[arg(long, default_value_t = DEFAULT_MAX_REGIONS)]
    pub max_regions: usize,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// Decoded view of an image
#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    /// Core, when the file name gives it
    pub core: Option<CoreLocation>,
    /// Kind of core, when recognized
    pub kind: Option<CoreKind>,
    /// Image size in bytes
    pub size: usize,
    /// CRC32 of the image
    pub checksum: u32,
    /// Reserved regions in index order
    pub regions: Vec<RegionSummary>,
    /// Master population table of a neuron image
    pub routes: Vec<RouteSummary>,
    /// Ring-buffer left shifts of a neuron image, per synapse type
    pub ring_buffer_shifts: Option<Vec<i32>>,
}

/// One reserved region
#[derive(Debug, Clone, Serialize)]
pub struct RegionSummary {
    /// Pointer-table slot
    pub index: u32,
    /// Region name
    pub label: &'static str,
    /// Byte offset in the image
    pub offset: u32,
    /// Size in bytes
    pub size: u32,
    /// CRC32 of the region bytes
    pub checksum: u32,
}

/// One master population table entry
#[derive(Debug, Clone, Serialize)]
pub struct RouteSummary {
    /// Source key
    pub key: u32,
    /// Source mask
    pub mask: u32,
    /// Byte offset of the block in the synaptic matrix
    pub block_offset: u32,
    /// Row length class
    pub row_class: u8,
}

const DELAY_REGIONS: [DelayRegion; 3] = [
    DelayRegion::Timings,
    DelayRegion::Components,
    DelayRegion::DelayParams,
];

fn first_word(words: Option<Vec<u32>>) -> Option<u32> {
    words.and_then(|w| w.first().copied())
}

/// Recognize an image by the application identifier it carries
pub fn detect_kind(image: &CoreImage) -> Option<CoreKind> {
    if first_word(image.region_words(PopulationRegion::System)) == Some(magic::NEURON_APP) {
        Some(CoreKind::Population)
    } else if first_word(image.region_words(DelayRegion::Components)) == Some(magic::DELAY_APP) {
        Some(CoreKind::DelayExtension)
    } else {
        None
    }
}

fn region_label(kind: Option<CoreKind>, index: u32) -> &'static str {
    let found = match kind {
        Some(CoreKind::Population) => PopulationRegion::ALL
            .iter()
            .find(|r| r.index() == index)
            .map(|r| r.label()),
        Some(CoreKind::DelayExtension) => DELAY_REGIONS
            .iter()
            .find(|r| r.index() == index)
            .map(|r| r.label()),
        None => None,
    };
    found.unwrap_or("unknown")
}

/// Decode regions, routes and shifts of an image
pub fn summarize(image: &CoreImage, core: Option<CoreLocation>) -> CliResult<ImageSummary> {
    let kind = detect_kind(image);
    let regions = image
        .layout()
        .spans()
        .iter()
        .map(|span| RegionSummary {
            index: span.index,
            label: region_label(kind, span.index),
            offset: span.offset,
            size: span.size,
            checksum: calculate_checksum(&image.as_bytes()[span.range()]),
        })
        .collect();

    let (routes, ring_buffer_shifts) = match kind {
        Some(CoreKind::Population) => {
            let routes = match image.region_words(PopulationRegion::MasterPopTable) {
                Some(words) => MasterPopulationTable::from_words(&words)?
                    .entries()
                    .iter()
                    .map(|e| RouteSummary {
                        key: e.key_and_mask.key,
                        mask: e.key_and_mask.mask,
                        block_offset: e.block_offset,
                        row_class: e.row_class,
                    })
                    .collect(),
                None => Vec::new(),
            };
            let shifts = read_shifts(image)?.shifts().to_vec();
            (routes, Some(shifts))
        }
        _ => (Vec::new(), None),
    };

    Ok(ImageSummary {
        core,
        kind,
        size: image.len(),
        checksum: image.checksum(),
        regions,
        routes,
        ring_buffer_shifts,
    })
}

impl InspectCommand {
    /// Decode and print the image
    pub fn execute(self) -> CliResult<()> {
        if !self.image.exists() {
            return Err(CliError::missing_resource(format!("image {}", self.image.display())));
        }
        info!("Inspecting {}", self.image.display());

        let core = self
            .image
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(parse_image_file_name);
        let bytes = std::fs::read(&self.image)?;
        let image = CoreImage::from_bytes(
            core.unwrap_or(CoreLocation::new(0, 0, 0)),
            bytes,
            self.max_regions,
        )?;
        let summary = summarize(&image, core)?;
        debug!("{} regions decoded", summary.regions.len());

        if self.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print_summary(&summary);
        }
        Ok(())
    }
}

fn print_summary(summary: &ImageSummary) {
    let core = summary
        .core
        .map_or_else(|| "unknown core".to_string(), |c| c.to_string());
    let kind = match summary.kind {
        Some(CoreKind::Population) => "neuron",
        Some(CoreKind::DelayExtension) => "delay extension",
        None => "unrecognized",
    };
    println!("Image for {} ({} application)", core, kind);
    println!("  size:     {} bytes", summary.size);
    println!("  checksum: {:#010x}", summary.checksum);
    println!();
    println!("  {:>5}  {:<20} {:>10} {:>10} {:>10}", "slot", "region", "offset", "size", "crc32");
    for r in &summary.regions {
        println!(
            "  {:>5}  {:<20} {:>10} {:>10} {:#010x}",
            r.index, r.label, r.offset, r.size, r.checksum
        );
    }
    if let Some(shifts) = &summary.ring_buffer_shifts {
        println!();
        println!("  ring-buffer shifts: {:?}", shifts);
    }
    if !summary.routes.is_empty() {
        println!();
        println!("  {:<10} {:<10} {:>10} {:>5}", "key", "mask", "block", "class");
        for route in &summary.routes {
            println!(
                "  {:#010x} {:#010x} {:>10} {:>5}",
                route.key, route.mask, route.block_offset, route.row_class
            );
        }
    }
}
