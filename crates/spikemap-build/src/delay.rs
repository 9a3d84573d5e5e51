//! Delay extension
//!
//! Delays longer than a neuron core handles natively are relayed through a
//! delay-extension core. The relay holds each spike for whole stages of
//! `max_delay_per_neuron` timesteps and re-emits it with a key identifying
//! the stage, and the postsynaptic core applies the residual delay.
//!
//! A relay stage `s` of source atom `i` is emitted with key offset
//! `s * n_atoms + i`, so the delayed synaptic list has one row per
//! (stage, source) pair in stage-major order.

use spikemap_image::{
    magic, CoreImage, DelayRegion, ImageBuffer, KeyAndMask, PlacedSlice, RegionPlanner,
    SynapticList, SynapticRow,
};

use crate::config::BuildConfig;
use crate::error::{BuildError, Result};

/// Stage of a delay, `None` if the delay is handled natively
pub fn delay_stage(delay: u32, max_delay_per_neuron: u32) -> Option<u32> {
    if delay <= max_delay_per_neuron {
        None
    } else {
        Some((delay - 1) / max_delay_per_neuron - 1)
    }
}

/// Delay left for the postsynaptic core after relaying through `stage`
pub fn residual_delay(delay: u32, stage: u32, max_delay_per_neuron: u32) -> u32 {
    delay - (stage + 1) * max_delay_per_neuron
}

/// One bitmask per delay stage over the source atoms of a slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayBlocks {
    n_atoms: u32,
    stages: Vec<Vec<u32>>,
}

impl DelayBlocks {
    /// Empty blocks for a slice of `n_atoms`
    pub fn new(n_atoms: u32) -> Self {
        Self {
            n_atoms,
            stages: Vec::new(),
        }
    }

    /// Words per stage bitmask
    pub fn words_per_block(&self) -> usize {
        ((self.n_atoms + 31) / 32) as usize
    }

    /// Mark `source` (relative to the slice) as having a synapse in `stage`
    pub fn set(&mut self, stage: u32, source: u32) {
        let words = self.words_per_block();
        while self.stages.len() <= stage as usize {
            self.stages.push(vec![0; words]);
        }
        self.stages[stage as usize][(source / 32) as usize] |= 1 << (source % 32);
    }

    /// True if `source` is marked in `stage`
    pub fn is_set(&self, stage: u32, source: u32) -> bool {
        self.stages
            .get(stage as usize)
            .and_then(|block| block.get((source / 32) as usize))
            .map_or(false, |word| word & (1 << (source % 32)) != 0)
    }

    /// Number of stages in use
    pub fn n_stages(&self) -> u32 {
        self.stages.len() as u32
    }

    /// True if no stage is in use
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Source atoms in the slice
    pub fn n_atoms(&self) -> u32 {
        self.n_atoms
    }

    /// Bitmask words of every stage, stage by stage
    pub fn words(&self) -> impl Iterator<Item = u32> + '_ {
        self.stages.iter().flatten().copied()
    }

    /// OR another set of blocks into this one
    pub fn merge(&mut self, other: &DelayBlocks) {
        for (stage, block) in other.stages.iter().enumerate() {
            for (w, &word) in block.iter().enumerate() {
                for bit in 0..32 {
                    if word & (1 << bit) != 0 {
                        self.set(stage as u32, w as u32 * 32 + bit);
                    }
                }
            }
        }
    }

    /// Fail if more stages are used than the relay core supports
    pub fn check_stages(&self, max_stages: u32, label: &str) -> Result<()> {
        if self.n_stages() > max_stages {
            return Err(BuildError::delay_extension(label, self.n_stages(), max_stages));
        }
        Ok(())
    }
}

/// A projection divided between native rows and relayed rows
#[derive(Debug, Clone, PartialEq)]
pub struct DelaySplit {
    /// Synapses with delays the postsynaptic core handles itself
    pub native: SynapticList,
    /// Relayed synapses with residual delays, rows indexed `stage * n_rows + source`
    pub delayed: SynapticList,
    /// Stage bitmasks for the relay core
    pub blocks: DelayBlocks,
}

impl DelaySplit {
    /// True if any synapse needs the relay
    pub fn needs_extension(&self) -> bool {
        !self.blocks.is_empty()
    }
}

/// Split `list` into native and relayed parts.
///
/// Rows of `list` are taken to be the source atoms of one slice, in order.
pub fn split_projection(
    list: &SynapticList,
    max_delay_per_neuron: u32,
    max_stages: u32,
    label: &str,
) -> Result<DelaySplit> {
    let n_rows = list.n_rows() as u32;
    let mut native = SynapticList::with_empty_rows(list.n_rows());
    let mut delayed_rows: Vec<SynapticRow> = Vec::new();
    let mut blocks = DelayBlocks::new(n_rows);

    for (source, row) in list.rows().iter().enumerate() {
        for (target, weight, delay, ty) in row.iter() {
            match delay_stage(delay, max_delay_per_neuron) {
                None => native.rows_mut()[source].push(target, weight, delay, ty),
                Some(stage) => {
                    if stage >= max_stages {
                        return Err(BuildError::delay_extension(label, stage + 1, max_stages));
                    }
                    blocks.set(stage, source as u32);
                    let index = (stage * n_rows) as usize + source;
                    if delayed_rows.len() <= index {
                        delayed_rows.resize(index + 1, SynapticRow::new());
                    }
                    let residual = residual_delay(delay, stage, max_delay_per_neuron);
                    delayed_rows[index].push(target, weight, residual, ty);
                }
            }
        }
    }

    if !blocks.is_empty() {
        delayed_rows.resize((blocks.n_stages() * n_rows) as usize, SynapticRow::new());
        log::debug!(
            "Projection {} relays {} synapses over {} stages",
            label,
            delayed_rows.iter().map(SynapticRow::len).sum::<usize>(),
            blocks.n_stages()
        );
    }

    Ok(DelaySplit {
        native,
        delayed: SynapticList::new(delayed_rows),
        blocks,
    })
}

/// Region sizes of a delay-extension image
fn delay_region_sizes(blocks: &DelayBlocks) -> [(DelayRegion, usize); 3] {
    [
        (DelayRegion::Timings, 3 * 4),
        (DelayRegion::Components, 4),
        (
            DelayRegion::DelayParams,
            (3 + blocks.n_stages() as usize * blocks.words_per_block()) * 4,
        ),
    ]
}

/// Build the image of a delay-extension core relaying `slice`
pub fn build_delay_image(
    slice: &PlacedSlice,
    key: KeyAndMask,
    blocks: &DelayBlocks,
    config: &BuildConfig,
) -> Result<CoreImage> {
    let label = format!("delay {}", slice);
    blocks.check_stages(config.max_delay_stages, &label)?;
    if blocks.n_atoms() != slice.n_atoms() {
        return Err(BuildError::configuration(
            "delay_blocks",
            format!("{} atoms in blocks, {} in slice", blocks.n_atoms(), slice.n_atoms()),
        ));
    }

    let mut planner = RegionPlanner::new(config.core_memory_bytes, config.max_regions);
    for (region, size) in delay_region_sizes(blocks) {
        planner.reserve(region, size)?;
    }
    let mut buffer = ImageBuffer::new(planner.finish());

    let mut timings = buffer.region(DelayRegion::Timings)?;
    timings.write_words(&[
        config.machine_time_step_us,
        config.timescale_factor,
        config.run_ticks(),
    ])?;
    timings.finish()?;

    let mut components = buffer.region(DelayRegion::Components)?;
    components.write_u32(magic::DELAY_APP)?;
    components.finish()?;

    let mut params = buffer.region(DelayRegion::DelayParams)?;
    params.write_words(&[key.key, slice.n_atoms(), blocks.n_stages()])?;
    for word in blocks.words() {
        params.write_u32(word)?;
    }
    params.finish()?;

    log::debug!(
        "Built delay image for {} with {} stages",
        slice,
        blocks.n_stages()
    );
    Ok(buffer.into_image(slice.core))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spikemap_image::{CoreLocation, SynapseType};

    #[test]
    fn test_stage_formula() {
        let m = 16;
        assert_eq!(delay_stage(16, m), None);
        assert_eq!(delay_stage(17, m), Some(0));
        assert_eq!(delay_stage(32, m), Some(0));
        assert_eq!(delay_stage(33, m), Some(1));
        assert_eq!(delay_stage(3 * m + 2, m), Some(2));
        assert_eq!(residual_delay(3 * m + 2, 2, m), 2);
        assert_eq!(residual_delay(32, 0, m), 16);
    }

    #[test]
    fn test_bitmask_idempotent() {
        let mut blocks = DelayBlocks::new(40);
        blocks.set(1, 33);
        blocks.set(1, 33);
        assert_eq!(blocks.n_stages(), 2);
        assert!(blocks.is_set(1, 33));
        assert!(!blocks.is_set(0, 33));
        assert_eq!(blocks.words().collect::<Vec<_>>(), vec![0, 0, 0, 2]);
    }

    #[test]
    fn test_split_projection() {
        let mut row = SynapticRow::new();
        row.push(0, 0.1, 3, SynapseType::Excitatory);
        row.push(1, 0.2, 20, SynapseType::Excitatory);
        let list = SynapticList::new(vec![SynapticRow::new(), row]);

        let split = split_projection(&list, 16, 8, "p").unwrap();
        assert!(split.needs_extension());
        assert_eq!(split.native.n_synapses(), 1);
        assert_eq!(split.delayed.n_rows(), 2);
        let relayed = split.delayed.row(1).unwrap();
        assert_eq!(relayed.delays, vec![4]);
        assert!(split.blocks.is_set(0, 1));
    }

    #[test]
    fn test_too_many_stages() {
        let mut row = SynapticRow::new();
        row.push(0, 0.1, 16 * 10, SynapseType::Excitatory);
        let list = SynapticList::new(vec![row]);
        let err = split_projection(&list, 16, 8, "long").unwrap_err();
        assert!(matches!(err, BuildError::DelayExtension { max_stages: 8, .. }));
    }

    #[test]
    fn test_delay_image_layout() {
        let slice = PlacedSlice::new(CoreLocation::new(0, 1, 5), 0, 39).unwrap();
        let mut blocks = DelayBlocks::new(40);
        blocks.set(0, 0);
        blocks.set(2, 39);
        let key = KeyAndMask::from_core(slice.core);
        let image = build_delay_image(&slice, key, &blocks, &BuildConfig::default()).unwrap();

        let params = image.region_words(DelayRegion::DelayParams).unwrap();
        assert_eq!(&params[..3], &[key.key, 40, 3]);
        assert_eq!(params.len(), 3 + 3 * 2);
        assert_eq!(params[3], 1);
        assert_eq!(params[8], 1 << 7);
        let components = image.region_words(DelayRegion::Components).unwrap();
        assert_eq!(components, vec![magic::DELAY_APP]);
    }
}
