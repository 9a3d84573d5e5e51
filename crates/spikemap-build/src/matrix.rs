//! Synaptic matrix assembly
//!
//! Every incoming edge of a slice becomes one block of the matrix region.
//! A block holds one row per source atom, each padded to the row-length
//! class of the longest row in the edge, and the block is padded to a
//! 16-byte boundary. Blocks are placed in ascending key order and indexed
//! by the master population table.

use spikemap_image::master_pop::BLOCK_ALIGNMENT;
use spikemap_image::row_table::row_length;
use spikemap_image::{
    row_length_class, KeyAndMask, MasterPopulationTable, PlacedSlice, RowFormat, SynapticList,
};

use crate::error::Result;
use crate::ring_buffer::RingBufferShifts;

/// Synapses from one source slice into the slice being built
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingEdge {
    /// Label used in logs and errors
    pub label: String,
    /// Key and mask of the source
    pub key_and_mask: KeyAndMask,
    /// One row per source atom, targets are global postsynaptic indices
    pub list: SynapticList,
    /// Row encoding
    pub format: RowFormat,
}

/// One packed block of the matrix
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixBlock {
    /// Key and mask of the source
    pub key_and_mask: KeyAndMask,
    /// Byte offset within the matrix region
    pub offset: u32,
    /// Row length class
    pub row_class: u8,
    /// Row encoding
    pub format: RowFormat,
    /// Number of rows
    pub n_rows: usize,
    /// Packed rows followed by alignment padding
    pub words: Vec<u32>,
}

impl MatrixBlock {
    /// Block size in bytes, including alignment padding
    pub fn size(&self) -> usize {
        self.words.len() * 4
    }
}

/// Words of one block before alignment
pub fn block_words(format: RowFormat, row_class: u8, n_rows: usize) -> Result<usize> {
    Ok(format.io().row_words(row_length(row_class)?) * n_rows)
}

fn align_block(bytes: usize) -> usize {
    (bytes + BLOCK_ALIGNMENT - 1) / BLOCK_ALIGNMENT * BLOCK_ALIGNMENT
}

/// Packed synaptic matrix of one slice
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynapticMatrix {
    blocks: Vec<MatrixBlock>,
}

impl SynapticMatrix {
    /// Pack `edges` for `post`, using the weight scales of `shifts`
    pub fn build(
        edges: &[IncomingEdge],
        post: &PlacedSlice,
        shifts: &RingBufferShifts,
    ) -> Result<Self> {
        let mut ordered: Vec<&IncomingEdge> = edges.iter().collect();
        ordered.sort_by_key(|e| e.key_and_mask.key);

        let scales = shifts.weight_scales();
        let mut blocks = Vec::with_capacity(ordered.len());
        let mut offset = 0usize;
        for edge in ordered {
            let longest = edge.list.rows().iter().map(|r| r.len()).max().unwrap_or(0);
            if longest == 0 {
                log::trace!("Skipping edge {} with no synapses into {}", edge.label, post);
                continue;
            }
            let row_class = row_length_class(longest)?;
            let padded = row_length(row_class)?;
            let io = edge.format.io();

            let mut words = Vec::with_capacity(block_words(edge.format, row_class, edge.list.n_rows())?);
            for row in edge.list.rows() {
                words.extend(io.encode_row(row, post.lo_atom, &scales, padded)?);
            }
            words.resize(align_block(words.len() * 4) / 4, 0);

            log::trace!(
                "Edge {} -> block at {:#x}: {} rows of class {}",
                edge.label,
                offset,
                edge.list.n_rows(),
                row_class
            );
            let block = MatrixBlock {
                key_and_mask: edge.key_and_mask,
                offset: offset as u32,
                row_class,
                format: edge.format,
                n_rows: edge.list.n_rows(),
                words,
            };
            offset += block.size();
            blocks.push(block);
        }
        Ok(Self { blocks })
    }

    /// Blocks in key order
    pub fn blocks(&self) -> &[MatrixBlock] {
        &self.blocks
    }

    /// Region size: the sum of block sizes
    pub fn size(&self) -> usize {
        self.blocks.iter().map(MatrixBlock::size).sum()
    }

    /// Master population table indexing the blocks
    pub fn master_population_table(&self) -> Result<MasterPopulationTable> {
        let mut table = MasterPopulationTable::new();
        for block in &self.blocks {
            table.add_entry(block.key_and_mask, block.offset, block.row_class)?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spikemap_image::{CoreLocation, SynapseType, SynapticRow};

    fn edge(key: u32, rows: usize, per_row: usize) -> IncomingEdge {
        let mut list = SynapticList::with_empty_rows(rows);
        for row in list.rows_mut() {
            for t in 0..per_row as u32 {
                row.push(t, 0.5, 1, SynapseType::Excitatory);
            }
        }
        IncomingEdge {
            label: format!("e{:x}", key),
            key_and_mask: KeyAndMask::new(key, 0xFFFF_F800),
            list,
            format: RowFormat::Static,
        }
    }

    #[test]
    fn test_blocks_ordered_and_aligned() {
        let post = PlacedSlice::new(CoreLocation::new(0, 0, 1), 0, 9).unwrap();
        let edges = vec![edge(0x1000, 3, 2), edge(0x0800, 2, 9)];
        let matrix = SynapticMatrix::build(&edges, &post, &RingBufferShifts::default()).unwrap();

        let blocks = matrix.blocks();
        assert_eq!(blocks[0].key_and_mask.key, 0x0800);
        // 2 rows of class 16: (3 + 16) words each = 152 bytes, aligned to 160
        assert_eq!(blocks[0].size(), 160);
        assert_eq!(blocks[1].offset, 160);
        // 3 rows of class 8: 11 words each = 132 bytes, aligned to 144
        assert_eq!(blocks[1].size(), 144);
        assert_eq!(matrix.size(), 304);

        let table = matrix.master_population_table().unwrap();
        assert_eq!(table.lookup(0x1003).unwrap().block_offset, 160);
    }

    #[test]
    fn test_empty_edges_are_skipped() {
        let post = PlacedSlice::new(CoreLocation::new(0, 0, 1), 0, 9).unwrap();
        let empty = IncomingEdge {
            label: "empty".into(),
            key_and_mask: KeyAndMask::new(0, 0xFFFF_F800),
            list: SynapticList::new(vec![SynapticRow::new()]),
            format: RowFormat::Plastic,
        };
        let matrix = SynapticMatrix::build(&[empty], &post, &RingBufferShifts::default()).unwrap();
        assert_eq!(matrix.size(), 0);
        assert!(matrix.master_population_table().unwrap().is_empty());
    }
}
