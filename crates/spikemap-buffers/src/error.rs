//! Error types for the buffer protocol

use spikemap_image::{CoreLocation, ImageError};
use thiserror::Error;

use crate::region::RegionState;

/// Result type for buffer operations
pub type Result<T> = std::result::Result<T, BufferError>;

/// Errors raised while streaming data to and from running cores
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BufferError {
    /// Malformed message, or a message type nothing handles
    #[error("Protocol error: {reason}")]
    Protocol {
        /// What was wrong with the message
        reason: String,
    },

    /// A message names a core or region with no buffered state
    #[error("No buffered region {region} on core {core}")]
    UnknownCore {
        /// Core named by the message
        core: CoreLocation,
        /// Region named by the message
        region: u8,
    },

    /// The underlying transport failed
    #[error("Transport error: {reason}")]
    Transport {
        /// Transport failure description
        reason: String,
    },

    /// A streaming region cannot hold even one packet
    #[error("Buffered region {region} on core {core} is too small: {size} bytes, first packet needs {needed}")]
    RegionTooSmall {
        /// Core of the region
        core: CoreLocation,
        /// Region id
        region: u8,
        /// Region size in bytes
        size: usize,
        /// Bytes needed by the smallest packet
        needed: usize,
    },

    /// Operation not allowed in the region's current state
    #[error("Region {region} on core {core} is {state:?}, cannot {operation}")]
    InvalidState {
        /// Core of the region
        core: CoreLocation,
        /// Region id
        region: u8,
        /// Current state
        state: RegionState,
        /// Attempted operation
        operation: &'static str,
    },

    /// Image layer error, e.g. while decoding a pointer table
    #[error("Image error: {source}")]
    Image {
        #[from]
        /// Source image error
        source: ImageError,
    },
}

impl BufferError {
    /// Create a protocol error
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Create an unknown-core error
    pub fn unknown_core(core: CoreLocation, region: u8) -> Self {
        Self::UnknownCore { core, region }
    }

    /// True for errors that only affect the message that caused them
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. } | Self::UnknownCore { .. } | Self::InvalidState { .. }
        )
    }
}
