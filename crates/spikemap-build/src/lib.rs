//! Neuron, synapse and delay-extension image builder for spikemap
//!
//! Turns a placed network description (populations, projections and the
//! slices each core simulates) into the memory image every core is loaded
//! with. Per-core work is independent and runs on a rayon pool when the
//! `parallel` feature is enabled.
//!
//! # Example
//!
//! ```rust
//! use spikemap_build::{build_images, BuildRequest, NeuronModel, Placement, Population};
//! use spikemap_build::model::RecordingFlags;
//! use spikemap_image::{CoreLocation, PlacedSlice};
//!
//! let request = BuildRequest {
//!     populations: vec![Population {
//!         label: "exc".into(),
//!         n_neurons: 10,
//!         model: NeuronModel::if_curr_exp(),
//!         recording: RecordingFlags::SPIKES,
//!     }],
//!     placements: vec![Placement {
//!         population: 0,
//!         slice: PlacedSlice::new(CoreLocation::new(0, 0, 1), 0, 9).unwrap(),
//!         key: None,
//!     }],
//!     ..Default::default()
//! };
//! let output = build_images(&request).unwrap();
//! assert_eq!(output.images.len(), 1);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod config;

// Network description
pub mod connectors;
pub mod model;

// Per-core encoding
pub mod delay;
pub mod matrix;
pub mod recording;
pub mod ring_buffer;
pub mod stdp;
pub mod writer;

pub mod build;
pub mod readback;

pub use build::{
    build_delay_core, build_images, build_population_core, BuildOutput, BuildRequest, CoreKind,
    CoreReport, Placement, Population, Projection,
};
pub use config::BuildConfig;
pub use connectors::{Connector, ConnectorSpec, ValueSpec};
pub use error::{BuildError, Result};
pub use model::{Capabilities, InputKind, NeuronModel, ParamValue, RecordingFlags};
pub use readback::{read_back_projection, read_shifts};
pub use ring_buffer::RingBufferShifts;
pub use stdp::StdpMechanism;
pub use writer::{ImageWriter, WriterState};
