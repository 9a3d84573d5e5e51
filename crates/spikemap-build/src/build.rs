//! Building every core image of a placed network
//!
//! Cores are independent: each image is derived from read-only inputs, so
//! with the `parallel` feature they are built concurrently. The first
//! failure aborts the whole build and is reported with its core, and no
//! image is returned unless every core succeeded.

use std::collections::BTreeMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::Serialize;
use spikemap_image::{
    CoreImage, CoreLocation, KeyAndMask, MasterPopulationTable, PlacedSlice, RowFormat,
    SynapticList,
};

use crate::config::BuildConfig;
use crate::delay::{build_delay_image, split_projection, DelayBlocks};
use crate::error::{BuildError, Result};
use crate::matrix::{IncomingEdge, SynapticMatrix};
use crate::model::{neuron_parameters, NeuronModel, RecordingFlags};
use crate::recording::RecordingSizes;
use crate::ring_buffer::RingBufferShifts;
use crate::stdp::StdpMechanism;
use crate::writer::{ImageWriter, RegionSizes, SystemSetup, SETUP_WORDS};

/// A population of identical neurons
#[derive(Debug, Clone, PartialEq)]
pub struct Population {
    /// Label used in errors and reports
    pub label: String,
    /// Number of neurons
    pub n_neurons: u32,
    /// Neuron model and parameters
    pub model: NeuronModel,
    /// What to record
    pub recording: RecordingFlags,
}

/// Synapses between two populations
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Label used in errors and reports
    pub label: String,
    /// Index of the source population
    pub pre: usize,
    /// Index of the target population
    pub post: usize,
    /// One row per source neuron, global target indices
    pub list: SynapticList,
    /// Plasticity, `None` for static synapses
    pub stdp: Option<StdpMechanism>,
}

impl Projection {
    /// Row encoding of the projection
    pub fn row_format(&self) -> RowFormat {
        if self.stdp.is_some() {
            RowFormat::Plastic
        } else {
            RowFormat::Static
        }
    }
}

/// A population slice on a neuron core
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Index of the population
    pub population: usize,
    /// Atoms and core
    pub slice: PlacedSlice,
    /// Routing key, derived from the core when `None`
    pub key: Option<KeyAndMask>,
}

impl Placement {
    /// Routing key of the slice
    pub fn key_and_mask(&self) -> KeyAndMask {
        self.key.unwrap_or_else(|| KeyAndMask::from_core(self.slice.core))
    }
}

/// Everything needed to build the images of a placed network
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    /// Machine settings
    pub config: BuildConfig,
    /// Populations
    pub populations: Vec<Population>,
    /// Projections
    pub projections: Vec<Projection>,
    /// Neuron core placements
    pub placements: Vec<Placement>,
    /// Delay-extension core placements; the slice names the relay core and
    /// the source atoms it relays
    pub delay_placements: Vec<Placement>,
}

/// What kind of core an image is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreKind {
    /// Neuron population slice
    Population,
    /// Delay extension relay
    DelayExtension,
}

/// Summary of one built image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoreReport {
    /// Core the image is for
    pub core: CoreLocation,
    /// Kind of core
    pub kind: CoreKind,
    /// Population label
    pub population: String,
    /// First atom
    pub lo_atom: u32,
    /// Last atom
    pub hi_atom: u32,
    /// Image size in bytes
    pub size: usize,
    /// CRC32 of the image
    pub checksum: u32,
}

/// Images of every core, in placement order
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    /// Neuron core images with their placements
    pub images: Vec<(Placement, CoreImage)>,
    /// Delay-extension core images with their placements
    pub delay_images: Vec<(Placement, CoreImage)>,
}

impl BuildOutput {
    /// Image built for `core`
    pub fn image_for(&self, core: CoreLocation) -> Option<&CoreImage> {
        self.images
            .iter()
            .chain(&self.delay_images)
            .map(|(_, image)| image)
            .find(|image| image.core() == core)
    }

    /// Per-core summaries
    pub fn reports(&self, request: &BuildRequest) -> Vec<CoreReport> {
        let report = |kind: CoreKind, (placement, image): &(Placement, CoreImage)| CoreReport {
            core: image.core(),
            kind,
            population: request
                .populations
                .get(placement.population)
                .map(|p| p.label.clone())
                .unwrap_or_default(),
            lo_atom: placement.slice.lo_atom,
            hi_atom: placement.slice.hi_atom,
            size: image.len(),
            checksum: image.checksum(),
        };
        self.images
            .iter()
            .map(|entry| report(CoreKind::Population, entry))
            .chain(self.delay_images.iter().map(|entry| report(CoreKind::DelayExtension, entry)))
            .collect()
    }
}

impl BuildRequest {
    /// Check indices, slice bounds and list shapes
    pub fn validate(&self) -> Result<()> {
        self.config.validate()?;

        let mut cores = BTreeMap::new();
        for placement in self.placements.iter().chain(&self.delay_placements) {
            let population = self.population(placement.population)?;
            if placement.slice.hi_atom >= population.n_neurons {
                return Err(BuildError::configuration(
                    format!("{}.placement", population.label),
                    format!(
                        "slice {} exceeds {} neurons",
                        placement.slice, population.n_neurons
                    ),
                ));
            }
            if let Some(other) = cores.insert(placement.slice.core, placement.slice) {
                return Err(BuildError::configuration(
                    "placement",
                    format!("core {} holds both {} and {}", placement.slice.core, other, placement.slice),
                ));
            }
        }

        for projection in &self.projections {
            let pre = self.population(projection.pre)?;
            self.population(projection.post)?;
            if projection.list.n_rows() != pre.n_neurons as usize {
                return Err(BuildError::configuration(
                    format!("{}.rows", projection.label),
                    format!(
                        "{} rows for {} source neurons",
                        projection.list.n_rows(),
                        pre.n_neurons
                    ),
                ));
            }
            if let Some(stdp) = &projection.stdp {
                stdp.validate()?;
            }
        }
        Ok(())
    }

    fn population(&self, index: usize) -> Result<&Population> {
        self.populations.get(index).ok_or_else(|| {
            BuildError::configuration("population", format!("no population {}", index))
        })
    }

    fn relay_for(&self, population: usize, source: &PlacedSlice) -> Option<&Placement> {
        self.delay_placements.iter().find(|d| {
            d.population == population
                && d.slice.lo_atom == source.lo_atom
                && d.slice.hi_atom == source.hi_atom
        })
    }

    /// Incoming edges of a slice, one per source key, with the plasticity
    /// mechanism shared by its plastic projections
    fn incoming_edges(
        &self,
        target: &Placement,
    ) -> Result<(Vec<IncomingEdge>, Option<&StdpMechanism>)> {
        let config = &self.config;
        let post = target.slice;
        let mut edges: BTreeMap<u32, IncomingEdge> = BTreeMap::new();
        let mut stdp: Option<&StdpMechanism> = None;

        let mut add = |label: String, key: KeyAndMask, list: SynapticList, format: RowFormat| {
            match edges.get_mut(&key.key) {
                Some(edge) if edge.format != format => Err(BuildError::configuration(
                    label,
                    format!("mixes static and plastic synapses with {}", edge.label),
                )),
                Some(edge) => {
                    edge.list.merge(&list);
                    Ok(())
                }
                None => {
                    edges.insert(
                        key.key,
                        IncomingEdge {
                            label,
                            key_and_mask: key,
                            list,
                            format,
                        },
                    );
                    Ok(())
                }
            }
        };

        for projection in self.projections.iter().filter(|p| p.post == target.population) {
            if let Some(mechanism) = &projection.stdp {
                match stdp {
                    Some(existing) if existing != mechanism => {
                        return Err(BuildError::configuration(
                            format!("{}.stdp", projection.label),
                            "differs from another plastic projection into the same slice",
                        ))
                    }
                    _ => stdp = Some(mechanism),
                }
            }

            for source in self.placements.iter().filter(|p| p.population == projection.pre) {
                let sub = projection
                    .list
                    .atom_sublist(source.slice.atoms(), post.atoms());
                if sub.n_synapses() == 0 {
                    continue;
                }
                let split = split_projection(
                    &sub,
                    config.max_delay_per_neuron,
                    config.max_delay_stages,
                    &projection.label,
                )?;
                let label = format!("{}[{}]", projection.label, source.slice);
                let needs_extension = split.needs_extension();
                if split.native.n_synapses() > 0 {
                    add(
                        label.clone(),
                        source.key_and_mask(),
                        split.native,
                        projection.row_format(),
                    )?;
                }
                if needs_extension {
                    let relay = self.relay_for(projection.pre, &source.slice).ok_or_else(|| {
                        BuildError::configuration(
                            format!("{}.delay", projection.label),
                            format!("no delay-extension core relays {}", source.slice),
                        )
                    })?;
                    add(
                        format!("{} (delayed)", label),
                        relay.key_and_mask(),
                        split.delayed,
                        projection.row_format(),
                    )?;
                }
            }
        }
        Ok((edges.into_values().collect(), stdp))
    }
}

/// Build the image of one neuron core
pub fn build_population_core(request: &BuildRequest, placement: &Placement) -> Result<CoreImage> {
    let config = &request.config;
    let population = request.population(placement.population)?;
    let slice = placement.slice;
    population.model.check_covers(slice.hi_atom, &population.label)?;

    let (edges, stdp) = request.incoming_edges(placement)?;
    let shifts = RingBufferShifts::compute(
        edges.iter().map(|e| &e.list),
        slice.lo_atom,
        slice.n_atoms(),
        config,
    )?;
    let matrix = SynapticMatrix::build(&edges, &slice, &shifts)?;

    let timestep_ms = config.timestep_ms();
    let params = neuron_parameters(&population.model, timestep_ms);
    let recording_sizes = RecordingSizes::compute(
        slice.n_atoms(),
        config.run_ticks(),
        population.recording,
        config.recording_buffer_bytes,
    );
    let sizes = RegionSizes {
        system: SETUP_WORDS * 4,
        neuron_params: RegionSizes::neuron_params_size(slice.n_atoms(), &params),
        synapse_params: RegionSizes::synapse_params_size(slice.n_atoms()),
        row_len_translation: RegionSizes::row_table_size(),
        master_pop_table: MasterPopulationTable::size_for(matrix.blocks().len()),
        synaptic_matrix: matrix.size(),
        recording: recording_sizes,
        stdp_params: stdp.map_or(0, StdpMechanism::region_bytes),
        profiling: RegionSizes::profiling_size(config.profiler_samples),
    };
    log::debug!(
        "Slice {} of {}: {} edges, shifts {:?}, {} bytes of regions",
        slice,
        population.label,
        edges.len(),
        shifts.shifts(),
        sizes.total()
    );

    let mut writer = ImageWriter::new(
        slice,
        population.label.clone(),
        config.core_memory_bytes,
        config.max_regions,
    );
    writer.reserve(&sizes)?;
    writer.write_setup(&SystemSetup {
        machine_time_step_us: config.machine_time_step_us,
        timescale_factor: config.timescale_factor,
        run_ticks: config.run_ticks(),
        recording: population.recording,
        recording_sizes,
        profiler_samples: config.profiler_samples,
    })?;
    writer.write_neuron_params(
        placement.key_and_mask(),
        config.machine_time_step_us,
        &shifts,
        &params,
    )?;
    writer.write_synapse_params(&population.model.synapse_shape, timestep_ms)?;
    writer.write_row_table()?;
    writer.write_matrix(&matrix)?;
    writer.write_stdp(stdp, &shifts, timestep_ms)?;
    writer.finalize()
}

/// Build the image of one delay-extension core
pub fn build_delay_core(request: &BuildRequest, relay: &Placement) -> Result<CoreImage> {
    let config = &request.config;
    let mut blocks = DelayBlocks::new(relay.slice.n_atoms());
    for projection in request.projections.iter().filter(|p| p.pre == relay.population) {
        let sub = projection.list.atom_sublist(relay.slice.atoms(), 0..=u32::MAX);
        let split = split_projection(
            &sub,
            config.max_delay_per_neuron,
            config.max_delay_stages,
            &projection.label,
        )?;
        blocks.merge(&split.blocks);
    }
    if blocks.is_empty() {
        log::info!("Delay core {} relays no synapses", relay.slice.core);
    }
    build_delay_image(&relay.slice, relay.key_and_mask(), &blocks, config)
}

fn build_all(
    request: &BuildRequest,
    placements: &[Placement],
    build: fn(&BuildRequest, &Placement) -> Result<CoreImage>,
) -> Result<Vec<(Placement, CoreImage)>> {
    let one = |placement: &Placement| {
        build(request, placement)
            .map(|image| (*placement, image))
            .map_err(|e| e.at_core(placement.slice.core))
    };
    #[cfg(feature = "parallel")]
    {
        placements.par_iter().map(one).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        placements.iter().map(one).collect()
    }
}

/// Build every neuron and delay-extension image of `request`
pub fn build_images(request: &BuildRequest) -> Result<BuildOutput> {
    request.validate()?;
    log::info!(
        "Building {} neuron and {} delay-extension images",
        request.placements.len(),
        request.delay_placements.len()
    );
    let images = build_all(request, &request.placements, build_population_core)?;
    let delay_images = build_all(request, &request.delay_placements, build_delay_core)?;
    Ok(BuildOutput {
        images,
        delay_images,
    })
}
