//! Host side of the spikemap streaming-buffer protocol
//!
//! While a simulation runs, cores stream input spikes from the host and
//! stream recorded data back. Each core tells the host how much space it
//! has or which bytes are ready, and the host answers with sequenced data
//! or acknowledgements. This crate provides:
//!
//! - the command codec ([`messages`])
//! - per-region state with wrapping sequence numbers ([`region`])
//! - the [`BufferManager`] answering requests
//! - a per-type locked [`DispatchTable`], listener threads and a FIFO
//!   send thread
//! - an in-process [`loopback`] machine for tests
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use spikemap_buffers::{BufferConfig, BufferManager, LoopbackMachine, Message};
//! use spikemap_image::CoreLocation;
//!
//! let machine = Arc::new(LoopbackMachine::new());
//! let mut builder = BufferManager::builder(BufferConfig::default());
//! builder.add_receive_region(CoreLocation::new(0, 0, 1), 6).unwrap();
//! let manager = builder.build(machine.clone()).unwrap();
//!
//! // requests for unregistered cores are rejected without stopping the run
//! let stray = Message::FlushDataCompleted { core: CoreLocation::new(1, 1, 1), region: 6 };
//! assert!(manager.handle_message(&stray).is_err());
//! manager.stop_run();
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod messages;
pub mod transport;

pub mod region;
pub mod dispatch;
pub mod sender;
pub mod listener;
pub mod manager;

pub mod loopback;

pub use dispatch::{DispatchTable, DispatchTableBuilder, Handler};
pub use error::{BufferError, Result};
pub use listener::Listener;
pub use loopback::{LoopbackEndpoint, LoopbackMachine, LOOPBACK_IMAGE_BASE};
pub use manager::{BufferConfig, BufferManager, BufferManagerBuilder};
pub use messages::{CommandId, EventPacket, Message};
pub use region::{ReadOutcome, RegionState, SendBuffer, SequenceCounter};
pub use sender::SenderThread;
pub use transport::{resolve_region_address, Endpoint, Transceiver};
