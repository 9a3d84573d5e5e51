//! In-process machine for tests and dry runs
//!
//! Each core owns a flat memory holding its loaded image at
//! [`LOOPBACK_IMAGE_BASE`]. Sent commands are recorded, and device
//! messages can be injected into any endpoint created from the machine.

use std::collections::HashMap;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use spikemap_image::{CoreImage, CoreLocation};

use crate::error::{BufferError, Result};
use crate::messages::Message;
use crate::transport::{Endpoint, Transceiver};

/// Address every loopback image is loaded at
pub const LOOPBACK_IMAGE_BASE: u32 = 0x6000_0000;

/// Simulated machine
pub struct LoopbackMachine {
    memory: Mutex<HashMap<CoreLocation, Vec<u8>>>,
    sent: Mutex<Vec<(CoreLocation, Vec<u8>)>>,
    inbound: (Sender<Vec<u8>>, Receiver<Vec<u8>>),
}

impl Default for LoopbackMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackMachine {
    /// Machine with no cores loaded
    pub fn new() -> Self {
        Self {
            memory: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            inbound: channel::unbounded(),
        }
    }

    /// Load an image onto its core
    pub fn load_image(&self, image: &CoreImage) {
        self.memory
            .lock()
            .insert(image.core(), image.as_bytes().to_vec());
    }

    /// Copy of the memory of `core`
    pub fn memory_of(&self, core: CoreLocation) -> Option<Vec<u8>> {
        self.memory.lock().get(&core).cloned()
    }

    /// Messages sent so far, decoded
    pub fn sent_messages(&self) -> Vec<(CoreLocation, Message)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(core, bytes)| Message::decode(bytes).ok().map(|m| (*core, m)))
            .collect()
    }

    /// Forget recorded messages
    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    /// Deliver a device message to the endpoints
    pub fn inject(&self, message: &Message) -> Result<()> {
        self.inject_bytes(message.encode())
    }

    /// Deliver raw bytes to the endpoints
    pub fn inject_bytes(&self, bytes: Vec<u8>) -> Result<()> {
        self.inbound
            .0
            .send(bytes)
            .map_err(|_| BufferError::transport("loopback inbound channel closed"))
    }

    /// An endpoint receiving injected messages
    pub fn endpoint(&self, name: impl Into<String>) -> LoopbackEndpoint {
        LoopbackEndpoint {
            name: name.into(),
            rx: self.inbound.1.clone(),
        }
    }

    fn span(&self, core: CoreLocation, address: u32, length: usize) -> Result<std::ops::Range<usize>> {
        let start = address
            .checked_sub(LOOPBACK_IMAGE_BASE)
            .ok_or_else(|| BufferError::transport(format!("address {:#010x} below image base", address)))?
            as usize;
        let memory = self.memory.lock();
        let size = memory
            .get(&core)
            .map(Vec::len)
            .ok_or_else(|| BufferError::transport(format!("no image loaded on {}", core)))?;
        if start + length > size {
            return Err(BufferError::transport(format!(
                "{} bytes at {:#010x} outside the {} byte image of {}",
                length, address, size, core
            )));
        }
        Ok(start..start + length)
    }
}

impl Transceiver for LoopbackMachine {
    fn image_address(&self, core: CoreLocation) -> Result<u32> {
        if self.memory.lock().contains_key(&core) {
            Ok(LOOPBACK_IMAGE_BASE)
        } else {
            Err(BufferError::transport(format!("no image loaded on {}", core)))
        }
    }

    fn read_memory(&self, core: CoreLocation, address: u32, length: usize) -> Result<Vec<u8>> {
        let range = self.span(core, address, length)?;
        let memory = self.memory.lock();
        Ok(memory.get(&core).map(|m| m[range].to_vec()).unwrap_or_default())
    }

    fn write_memory(&self, core: CoreLocation, address: u32, data: &[u8]) -> Result<()> {
        let range = self.span(core, address, data.len())?;
        if let Some(memory) = self.memory.lock().get_mut(&core) {
            memory[range].copy_from_slice(data);
        }
        Ok(())
    }

    fn send_message(&self, core: CoreLocation, message: &[u8]) -> Result<()> {
        self.sent.lock().push((core, message.to_vec()));
        Ok(())
    }
}

/// Receiving side of [`LoopbackMachine::inject`]
pub struct LoopbackEndpoint {
    name: String,
    rx: Receiver<Vec<u8>>,
}

impl Endpoint for LoopbackEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        match self.rx.recv_timeout(timeout) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(BufferError::transport(format!("{} disconnected", self.name)))
            }
        }
    }
}
