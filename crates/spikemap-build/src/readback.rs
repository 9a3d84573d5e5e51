//! Decoding synaptic matrices back into the logical model

use spikemap_image::row_table::row_length;
use spikemap_image::{
    CoreImage, KeyAndMask, MasterPopulationTable, PopulationRegion, RowFormat, SynapseType,
    SynapticList,
};

use crate::error::{BuildError, Result};
use crate::ring_buffer::RingBufferShifts;
use crate::writer::NEURON_HEADER_WORDS;

/// Recover the ring-buffer shifts written into a neuron parameter region
pub fn read_shifts(image: &CoreImage) -> Result<RingBufferShifts> {
    let words = image
        .region_words(PopulationRegion::NeuronParams)
        .ok_or_else(|| BuildError::configuration("neuron_params", "region missing from image"))?;
    if words.len() < NEURON_HEADER_WORDS {
        return Err(BuildError::configuration("neuron_params", "header truncated"));
    }
    let n = SynapseType::COUNT;
    RingBufferShifts::from_header_words(&words[4..4 + n], &words[4 + n..4 + 2 * n])
}

/// Decode the block of `source` from a population image.
///
/// `n_rows` is the number of source atoms, `post_lo` the first atom of the
/// slice the image was built for. Returns `None` if no block is routed for
/// the source key.
pub fn read_back_projection(
    image: &CoreImage,
    source: KeyAndMask,
    n_rows: usize,
    post_lo: u32,
    format: RowFormat,
) -> Result<Option<SynapticList>> {
    let table_words = image
        .region_words(PopulationRegion::MasterPopTable)
        .ok_or_else(|| BuildError::configuration("master_pop_table", "region missing from image"))?;
    let table = MasterPopulationTable::from_words(&table_words)?;
    let entry = match table.lookup(source.key) {
        Some(entry) => *entry,
        None => return Ok(None),
    };

    let matrix = image
        .region_words(PopulationRegion::SynapticMatrix)
        .ok_or_else(|| BuildError::configuration("synaptic_matrix", "region missing from image"))?;
    let scales = read_shifts(image)?.weight_scales();
    let io = format.io();
    let row_words = io.row_words(row_length(entry.row_class)?);
    let start = entry.block_offset as usize / 4;
    let end = start + row_words * n_rows;
    let block = matrix.get(start..end).ok_or_else(|| {
        BuildError::configuration(
            "synaptic_matrix",
            format!("block at {:#x} of {} rows overruns region", entry.block_offset, n_rows),
        )
    })?;

    let rows = block
        .chunks_exact(row_words.max(1))
        .take(n_rows)
        .map(|words| io.decode_row(words, post_lo, &scales).map_err(BuildError::from))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(SynapticList::new(rows)))
}
