//! Seams between the buffer manager and the machine

use std::time::Duration;

use spikemap_image::regions::POINTER_TABLE_OFFSET;
use spikemap_image::{CoreLocation, WORD_BYTES};

use crate::error::{BufferError, Result};

/// Memory and message access to running cores
pub trait Transceiver: Send + Sync {
    /// Address the image of `core` was loaded at
    fn image_address(&self, core: CoreLocation) -> Result<u32>;

    /// Read `length` bytes of device memory visible to `core`
    fn read_memory(&self, core: CoreLocation, address: u32, length: usize) -> Result<Vec<u8>>;

    /// Write device memory visible to `core`
    fn write_memory(&self, core: CoreLocation, address: u32, data: &[u8]) -> Result<()>;

    /// Deliver an encoded command to `core`
    fn send_message(&self, core: CoreLocation, message: &[u8]) -> Result<()>;
}

/// A source of inbound device messages
pub trait Endpoint: Send {
    /// Name used in logs and thread names
    fn name(&self) -> &str;

    /// Wait up to `timeout` for one message. `Ok(None)` on timeout.
    fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

/// Resolve the device address of `region` from the pointer table of `core`
pub fn resolve_region_address(
    transceiver: &dyn Transceiver,
    core: CoreLocation,
    region: u8,
) -> Result<u32> {
    let base = transceiver.image_address(core)?;
    let entry = base + (POINTER_TABLE_OFFSET + usize::from(region) * WORD_BYTES) as u32;
    let bytes = transceiver.read_memory(core, entry, WORD_BYTES)?;
    let offset = match bytes.as_slice() {
        [a, b, c, d] => u32::from_le_bytes([*a, *b, *c, *d]),
        _ => {
            return Err(BufferError::transport(format!(
                "read of pointer table entry {} on {} returned {} bytes",
                region,
                core,
                bytes.len()
            )))
        }
    };
    if offset == 0 {
        return Err(BufferError::protocol(format!(
            "region {} is not present in the image of {}",
            region, core
        )));
    }
    log::debug!("Region {} of {} at {:#010x}", region, core, base + offset);
    Ok(base + offset)
}
