//! Per-core memory image primitives for spikemap
//!
//! This crate provides the binary building blocks every core image is made
//! of: fixed-point parameter encoding, region planning with a self-describing
//! pointer table, bounded region writers, synaptic row packing, the
//! row-length translation table and the master population table.

#![deny(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod error;
pub mod fixed_point;
pub mod ids;
pub mod image;
pub mod regions;

// Synaptic data
pub mod master_pop;
pub mod row_io;
pub mod row_table;
pub mod synapse_row;

// Re-export essential types
pub use error::{ImageError, Result};
pub use fixed_point::{decode, encode, FixedPointFormat};
pub use ids::{CoreLocation, KeyAndMask, PlacedSlice, SynapseType};
pub use image::{CoreImage, ImageBuffer, RegionCursor};
pub use master_pop::{MasterPopulationTable, MasterPopulationTableEntry};
pub use regions::{
    DelayRegion, PopulationRegion, Region, RegionLayout, RegionPlanner, RegionSpan,
};
pub use row_io::{PlasticRowIo, RowFormat, StaticRowIo, SynapseRowIo};
pub use row_table::{row_length_class, ROW_LENGTHS};
pub use synapse_row::{SynapticList, SynapticRow};

/// Image crate version for compatibility checking
pub const IMAGE_CRATE_VERSION: u32 = 1;

/// Bytes per device word
pub const WORD_BYTES: usize = 4;

/// Magic numbers written at the start of images and components
pub mod magic {
    /// Image header magic, first word of every core image
    pub const IMAGE: u32 = 0xAD13_0AD6;
    /// Image header version word
    pub const IMAGE_VERSION: u32 = 0x0001_0000;
    /// Executable identifier of the neuron application
    pub const NEURON_APP: u32 = 0xAC6;
    /// Executable identifier of the delay-extension application
    pub const DELAY_APP: u32 = 0xAC7;
    /// Marker OR-ed into the recording flags word
    pub const RECORDING_FLAGS: u32 = 0xBEEF_0000;
}

/// Round a byte count up to the next whole device word
pub const fn round_up_to_word(size: usize) -> usize {
    (size + WORD_BYTES - 1) / WORD_BYTES * WORD_BYTES
}
