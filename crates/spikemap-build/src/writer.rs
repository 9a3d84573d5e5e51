//! Neuron/synapse image writer
//!
//! Writes the regions of one population slice in a fixed order. Each step
//! fills exactly one region (the matrix step also fills the master
//! population table, whose entries point into the matrix) and any failure
//! closes the writer so a partial image can never be finalized.

use spikemap_image::row_table::ROW_TABLE_BYTES;
use spikemap_image::{
    magic, CoreImage, ImageBuffer, KeyAndMask, PlacedSlice, PopulationRegion, RegionPlanner,
    SynapseType, ROW_LENGTHS,
};

use crate::error::{BuildError, Result};
use crate::matrix::SynapticMatrix;
use crate::model::{ExponentialShape, NeuronParameter, RecordingFlags};
use crate::recording::RecordingSizes;
use crate::ring_buffer::RingBufferShifts;
use crate::stdp::StdpMechanism;

/// Words in the system setup region
pub const SETUP_WORDS: usize = 9;

/// Words in the neuron parameter header
pub const NEURON_HEADER_WORDS: usize = 4 + 2 * SynapseType::COUNT;

/// Steps of the writer, in the order they must run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WriterState {
    /// Regions not yet reserved
    Reserve,
    /// Next: system setup
    WriteSetup,
    /// Next: neuron parameters
    WriteNeuronParams,
    /// Next: synapse shaping parameters
    WriteSynapseParams,
    /// Next: row-length table
    WriteRowTable,
    /// Next: synaptic matrix and master population table
    WriteMatrix,
    /// Next: plasticity parameters
    WriteStdp,
    /// Next: produce the image
    Finalize,
    /// Finished or aborted
    Closed,
}

/// Contents of the system setup region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemSetup {
    /// Time step in microseconds
    pub machine_time_step_us: u32,
    /// Slow-down factor
    pub timescale_factor: u32,
    /// Timesteps to run
    pub run_ticks: u32,
    /// What is recorded
    pub recording: RecordingFlags,
    /// Recording region sizes
    pub recording_sizes: RecordingSizes,
    /// Profiler samples
    pub profiler_samples: u32,
}

impl SystemSetup {
    fn words(&self) -> [u32; SETUP_WORDS] {
        [
            magic::NEURON_APP,
            self.machine_time_step_us,
            self.timescale_factor,
            self.run_ticks,
            self.recording.bits() | magic::RECORDING_FLAGS,
            self.recording_sizes.spikes as u32,
            self.recording_sizes.potential as u32,
            self.recording_sizes.gsyn as u32,
            self.profiler_samples,
        ]
    }
}

/// Byte size of every population region, computed before reservation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionSizes {
    /// System setup
    pub system: usize,
    /// Neuron parameters
    pub neuron_params: usize,
    /// Synapse parameters
    pub synapse_params: usize,
    /// Row-length table
    pub row_len_translation: usize,
    /// Master population table
    pub master_pop_table: usize,
    /// Synaptic matrix
    pub synaptic_matrix: usize,
    /// Recording regions
    pub recording: RecordingSizes,
    /// STDP parameters
    pub stdp_params: usize,
    /// Profiler samples
    pub profiling: usize,
}

impl RegionSizes {
    /// Neuron parameter region size for `n_atoms` atoms
    pub fn neuron_params_size(n_atoms: u32, params: &[NeuronParameter]) -> usize {
        let per_atom: usize = params.iter().map(|p| p.format.bytes()).sum();
        NEURON_HEADER_WORDS * 4 + spikemap_image::round_up_to_word(per_atom * n_atoms as usize)
    }

    /// Synapse parameter region size for `n_atoms` atoms
    pub fn synapse_params_size(n_atoms: u32) -> usize {
        SynapseType::COUNT * n_atoms as usize * 2 * 4
    }

    /// Profiling region size for `samples`
    pub fn profiling_size(samples: u32) -> usize {
        if samples == 0 {
            0
        } else {
            4 + samples as usize * 8
        }
    }

    /// Row-length table size
    pub const fn row_table_size() -> usize {
        ROW_TABLE_BYTES
    }

    /// Sizes paired with their regions, in index order
    pub fn entries(&self) -> [(PopulationRegion, usize); 11] {
        [
            (PopulationRegion::System, self.system),
            (PopulationRegion::NeuronParams, self.neuron_params),
            (PopulationRegion::SynapseParams, self.synapse_params),
            (PopulationRegion::RowLenTranslation, self.row_len_translation),
            (PopulationRegion::MasterPopTable, self.master_pop_table),
            (PopulationRegion::SynapticMatrix, self.synaptic_matrix),
            (PopulationRegion::SpikeHistory, self.recording.spikes),
            (PopulationRegion::PotentialHistory, self.recording.potential),
            (PopulationRegion::GsynHistory, self.recording.gsyn),
            (PopulationRegion::StdpParams, self.stdp_params),
            (PopulationRegion::Profiling, self.profiling),
        ]
    }

    /// Total of all region sizes
    pub fn total(&self) -> usize {
        self.entries().iter().map(|(_, s)| s).sum()
    }
}

/// State machine writing one population slice image
#[derive(Debug)]
pub struct ImageWriter {
    slice: PlacedSlice,
    population: String,
    capacity: usize,
    max_regions: usize,
    state: WriterState,
    buffer: Option<ImageBuffer>,
}

impl ImageWriter {
    /// Create a writer for `slice` of `population`
    pub fn new(
        slice: PlacedSlice,
        population: impl Into<String>,
        capacity: usize,
        max_regions: usize,
    ) -> Self {
        Self {
            slice,
            population: population.into(),
            capacity,
            max_regions,
            state: WriterState::Reserve,
            buffer: None,
        }
    }

    /// Current state
    pub fn state(&self) -> WriterState {
        self.state
    }

    fn begin(&self, step: WriterState) -> Result<()> {
        if self.state != step {
            return Err(BuildError::configuration(
                "writer",
                format!("{:?} out of order, writer is at {:?}", step, self.state),
            ));
        }
        Ok(())
    }

    fn complete<T>(&mut self, result: Result<T>, next: WriterState) -> Result<T> {
        match result {
            Ok(value) => {
                self.state = next;
                Ok(value)
            }
            Err(e) => {
                log::debug!("Aborting image of {}: {}", self.slice, e);
                self.state = WriterState::Closed;
                self.buffer = None;
                Err(e)
            }
        }
    }

    fn buffer(&mut self) -> Result<&mut ImageBuffer> {
        self.buffer
            .as_mut()
            .ok_or_else(|| BuildError::configuration("writer", "no regions reserved"))
    }

    /// Reserve every region
    pub fn reserve(&mut self, sizes: &RegionSizes) -> Result<()> {
        self.begin(WriterState::Reserve)?;
        let mut planner = RegionPlanner::new(self.capacity, self.max_regions);
        let result = sizes
            .entries()
            .iter()
            .try_for_each(|&(region, size)| planner.reserve(region, size))
            .map_err(BuildError::from);
        if result.is_ok() {
            self.buffer = Some(ImageBuffer::new(planner.finish()));
        }
        self.complete(result, WriterState::WriteSetup)
    }

    /// Write the system setup region
    pub fn write_setup(&mut self, setup: &SystemSetup) -> Result<()> {
        self.begin(WriterState::WriteSetup)?;
        let result = self.buffer().and_then(|buffer| {
            let mut cursor = buffer.region(PopulationRegion::System)?;
            cursor.write_words(&setup.words())?;
            cursor.finish()?;
            Ok(())
        });
        self.complete(result, WriterState::WriteNeuronParams)
    }

    /// Write the neuron parameter header and per-atom parameters
    pub fn write_neuron_params(
        &mut self,
        key: KeyAndMask,
        machine_time_step_us: u32,
        shifts: &RingBufferShifts,
        params: &[NeuronParameter],
    ) -> Result<()> {
        self.begin(WriterState::WriteNeuronParams)?;
        let slice = self.slice;
        let population = self.population.clone();
        let result = self.buffer().and_then(|buffer| {
            let mut cursor = buffer.region(PopulationRegion::NeuronParams)?;
            let (directions, magnitudes) = shifts.header_words();
            cursor.write_words(&[key.key, slice.n_atoms(), params.len() as u32, machine_time_step_us])?;
            cursor.write_words(&directions)?;
            cursor.write_words(&magnitudes)?;
            for atom in slice.atoms() {
                for param in params {
                    let value = param.value.at(atom).ok_or_else(|| {
                        BuildError::configuration(
                            format!("{}.{}", population, param.name),
                            format!("no value for atom {}", atom),
                        )
                    })?;
                    cursor.write_value(value, param.format).map_err(|e| {
                        log::debug!("{}.{} atom {}: {}", population, param.name, atom, e);
                        e
                    })?;
                }
            }
            // pad a trailing partial word
            cursor.skip(cursor.remaining())?;
            cursor.finish()?;
            Ok(())
        });
        self.complete(result, WriterState::WriteSynapseParams)
    }

    /// Write per-type decay and initial-input multipliers
    pub fn write_synapse_params(&mut self, shape: &ExponentialShape, timestep_ms: f64) -> Result<()> {
        self.begin(WriterState::WriteSynapseParams)?;
        let slice = self.slice;
        let population = self.population.clone();
        let result = self.buffer().and_then(|buffer| {
            let mut cursor = buffer.region(PopulationRegion::SynapseParams)?;
            for ty in SynapseType::ALL {
                let (decay, init) = shape.decay_parameters(ty, timestep_ms);
                for param in [&decay, &init] {
                    for atom in slice.atoms() {
                        let value = param.value.at(atom).ok_or_else(|| {
                            BuildError::configuration(
                                format!("{}.tau_syn_{}", population, ty),
                                format!("no value for atom {}", atom),
                            )
                        })?;
                        cursor.write_value(value, param.format)?;
                    }
                }
            }
            cursor.finish()?;
            Ok(())
        });
        self.complete(result, WriterState::WriteRowTable)
    }

    /// Write the row-length translation table
    pub fn write_row_table(&mut self) -> Result<()> {
        self.begin(WriterState::WriteRowTable)?;
        let result = self.buffer().and_then(|buffer| {
            let mut cursor = buffer.region(PopulationRegion::RowLenTranslation)?;
            cursor.write_words(&ROW_LENGTHS)?;
            cursor.finish()?;
            Ok(())
        });
        self.complete(result, WriterState::WriteMatrix)
    }

    /// Write the synaptic matrix blocks and the master population table
    pub fn write_matrix(&mut self, matrix: &SynapticMatrix) -> Result<()> {
        self.begin(WriterState::WriteMatrix)?;
        let result = self.buffer().and_then(|buffer| {
            let table = matrix.master_population_table()?;
            let mut cursor = buffer.region(PopulationRegion::MasterPopTable)?;
            cursor.write_words(&table.to_words())?;
            cursor.finish()?;

            if buffer.has_region(PopulationRegion::SynapticMatrix) {
                let mut cursor = buffer.region(PopulationRegion::SynapticMatrix)?;
                for block in matrix.blocks() {
                    cursor.write_words(&block.words)?;
                }
                cursor.finish()?;
            } else if matrix.size() != 0 {
                return Err(BuildError::configuration(
                    "synaptic_matrix",
                    format!("{} bytes of blocks but no region reserved", matrix.size()),
                ));
            }
            Ok(())
        });
        self.complete(result, WriterState::WriteStdp)
    }

    /// Write the STDP region, `None` when no incoming projection is plastic
    pub fn write_stdp(
        &mut self,
        stdp: Option<&StdpMechanism>,
        shifts: &RingBufferShifts,
        timestep_ms: f64,
    ) -> Result<()> {
        self.begin(WriterState::WriteStdp)?;
        let result = self.buffer().and_then(|buffer| {
            let reserved = buffer.has_region(PopulationRegion::StdpParams);
            match stdp {
                Some(stdp) => {
                    let mut cursor = buffer.region(PopulationRegion::StdpParams)?;
                    stdp.write(&mut cursor, shifts, timestep_ms)?;
                    cursor.finish()?;
                    Ok(())
                }
                None if reserved => Err(BuildError::configuration(
                    "stdp_params",
                    "region reserved but no mechanism given",
                )),
                None => Ok(()),
            }
        });
        self.complete(result, WriterState::Finalize)
    }

    /// Produce the image and close the writer
    pub fn finalize(&mut self) -> Result<CoreImage> {
        self.begin(WriterState::Finalize)?;
        let result = self
            .buffer
            .take()
            .map(|buffer| buffer.into_image(self.slice.core))
            .ok_or_else(|| BuildError::configuration("writer", "no regions reserved"));
        self.complete(result, WriterState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{neuron_parameters, NeuronModel, ParamValue};
    use spikemap_image::{CoreLocation, FixedPointFormat};

    fn slice() -> PlacedSlice {
        PlacedSlice::new(CoreLocation::new(0, 0, 2), 0, 9).unwrap()
    }

    fn sizes(params: &[NeuronParameter]) -> RegionSizes {
        RegionSizes {
            system: SETUP_WORDS * 4,
            neuron_params: RegionSizes::neuron_params_size(10, params),
            synapse_params: RegionSizes::synapse_params_size(10),
            row_len_translation: RegionSizes::row_table_size(),
            master_pop_table: 4,
            ..Default::default()
        }
    }

    fn setup() -> SystemSetup {
        SystemSetup {
            machine_time_step_us: 1000,
            timescale_factor: 1,
            run_ticks: 100,
            recording: RecordingFlags::SPIKES,
            recording_sizes: RecordingSizes::default(),
            profiler_samples: 0,
        }
    }

    #[test]
    fn test_full_sequence() {
        let model = NeuronModel::if_curr_exp();
        let params = neuron_parameters(&model, 1.0);
        let shifts = RingBufferShifts::default();
        let mut writer = ImageWriter::new(slice(), "pop", 1 << 20, 16);

        writer.reserve(&sizes(&params)).unwrap();
        writer.write_setup(&setup()).unwrap();
        writer
            .write_neuron_params(KeyAndMask::new(0x800, 0xFFFF_F800), 1000, &shifts, &params)
            .unwrap();
        writer.write_synapse_params(&model.synapse_shape, 1.0).unwrap();
        writer.write_row_table().unwrap();
        writer.write_matrix(&SynapticMatrix::default()).unwrap();
        writer.write_stdp(None, &shifts, 1.0).unwrap();
        let image = writer.finalize().unwrap();
        assert_eq!(writer.state(), WriterState::Closed);

        let setup_words = image.region_words(PopulationRegion::System).unwrap();
        assert_eq!(setup_words[0], magic::NEURON_APP);
        assert_eq!(setup_words[4], 0xBEEF_0001);

        let neuron = image.region_words(PopulationRegion::NeuronParams).unwrap();
        assert_eq!(&neuron[..4], &[0x800, 10, 10, 1000]);
        // first parameter of first atom is v_thresh = -50 mV
        assert_eq!(neuron[NEURON_HEADER_WORDS], (-50i32 << 15) as u32);

        let table = image.region_words(PopulationRegion::RowLenTranslation).unwrap();
        assert_eq!(table, ROW_LENGTHS.to_vec());
        assert!(image.region_bytes(PopulationRegion::SynapticMatrix).is_none());
    }

    #[test]
    fn test_out_of_order_rejected() {
        let params = neuron_parameters(&NeuronModel::if_curr_exp(), 1.0);
        let mut writer = ImageWriter::new(slice(), "pop", 1 << 20, 16);
        assert!(writer.write_setup(&setup()).is_err());
        writer.reserve(&sizes(&params)).unwrap();
        assert!(writer.write_row_table().is_err());
        // a rejected out-of-order call leaves the writer where it was
        assert_eq!(writer.state(), WriterState::WriteSetup);
    }

    #[test]
    fn test_failure_closes_writer() {
        let params = neuron_parameters(&NeuronModel::if_curr_exp(), 1.0);
        let mut too_small = sizes(&params);
        too_small.system = 8;
        let mut writer = ImageWriter::new(slice(), "pop", 1 << 20, 16);
        writer.reserve(&too_small).unwrap();
        let err = writer.write_setup(&setup()).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Image {
                source: spikemap_image::ImageError::RegionTooSmall { .. }
            }
        ));
        assert_eq!(writer.state(), WriterState::Closed);
        assert!(writer.finalize().is_err());
    }

    #[test]
    fn test_short_parameter_sequence_names_field() {
        let mut model = NeuronModel::if_curr_exp();
        model.dynamics.v_thresh = vec![-50.0, -51.0].into();
        let params = neuron_parameters(&model, 1.0);
        let mut writer = ImageWriter::new(slice(), "exc", 1 << 20, 16);
        writer.reserve(&sizes(&params)).unwrap();
        writer.write_setup(&setup()).unwrap();
        let err = writer
            .write_neuron_params(KeyAndMask::new(0, 0), 1000, &RingBufferShifts::default(), &params)
            .unwrap_err();
        assert!(err.to_string().contains("exc.v_thresh"), "{}", err);
    }

    #[test]
    fn test_byte_parameters_pad_to_word() {
        let params = vec![NeuronParameter {
            name: "refract_ticks",
            value: ParamValue::Scalar(3.0),
            format: FixedPointFormat::UINT8,
        }];
        let shifts = RingBufferShifts::default();
        let mut writer = ImageWriter::new(slice(), "pop", 1 << 20, 16);
        writer.reserve(&sizes(&params)).unwrap();
        writer.write_setup(&setup()).unwrap();
        writer
            .write_neuron_params(KeyAndMask::new(0, 0), 1000, &shifts, &params)
            .unwrap();
        assert_eq!(writer.state(), WriterState::WriteSynapseParams);
    }
}
