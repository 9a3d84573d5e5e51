//! Buffer manager
//!
//! Owns the state of every streaming region, answers device requests and
//! queues replies on the send thread. Regions are registered before the
//! manager is built, after which the region set is fixed and each region
//! is guarded by its own lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use spikemap_image::CoreLocation;

use crate::dispatch::DispatchTable;
use crate::error::{BufferError, Result};
use crate::messages::{CommandId, EventPacket, Message};
use crate::region::{ReadOutcome, ReceiveRegion, RegionState, SendBuffer, SendRegion};
use crate::sender::SenderThread;
use crate::transport::Transceiver;

/// Protocol settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    /// Size of the sequence-number space
    pub n_sequences: u32,
    /// Largest payload of one sequenced-data message
    pub max_packet_bytes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            n_sequences: 256,
            max_packet_bytes: 256,
        }
    }
}

impl BufferConfig {
    /// Check the settings fit the wire format
    pub fn validate(&self) -> Result<()> {
        if !(1..=256).contains(&self.n_sequences) {
            return Err(BufferError::protocol(format!(
                "n_sequences {} outside 1..=256",
                self.n_sequences
            )));
        }
        if self.max_packet_bytes < EventPacket::size_for(1) {
            return Err(BufferError::protocol(format!(
                "max_packet_bytes {} cannot hold one event",
                self.max_packet_bytes
            )));
        }
        Ok(())
    }
}

type RegionKey = (CoreLocation, u8);

/// Collects regions before the manager starts
pub struct BufferManagerBuilder {
    config: BufferConfig,
    send: HashMap<RegionKey, SendRegion>,
    receive: HashMap<RegionKey, ReceiveRegion>,
}

impl BufferManagerBuilder {
    /// Stream `buffer` into `region` of `core`, which is `size` bytes long
    pub fn add_send_region(
        &mut self,
        core: CoreLocation,
        region: u8,
        size: usize,
        buffer: SendBuffer,
    ) -> Result<&mut Self> {
        if self.send.contains_key(&(core, region)) {
            return Err(BufferError::protocol(format!(
                "send region {} of {} registered twice",
                region, core
            )));
        }
        let state = SendRegion::new(core, region, size, buffer, self.config.n_sequences);
        self.send.insert((core, region), state);
        Ok(self)
    }

    /// Collect data the core writes to `region`
    pub fn add_receive_region(&mut self, core: CoreLocation, region: u8) -> Result<&mut Self> {
        if self.receive.contains_key(&(core, region)) {
            return Err(BufferError::protocol(format!(
                "receive region {} of {} registered twice",
                region, core
            )));
        }
        self.receive.insert((core, region), ReceiveRegion::new(core, region));
        Ok(self)
    }

    /// Start the send thread and freeze the region set
    pub fn build(self, transceiver: Arc<dyn Transceiver>) -> Result<Arc<BufferManager>> {
        self.config.validate()?;
        let sender = SenderThread::spawn("buffer-sender", Arc::clone(&transceiver))?;
        log::info!(
            "Buffer manager with {} send and {} receive regions",
            self.send.len(),
            self.receive.len()
        );
        Ok(Arc::new(BufferManager {
            config: self.config,
            transceiver,
            send_regions: self
                .send
                .into_iter()
                .map(|(k, v)| (k, Mutex::new(v)))
                .collect(),
            receive_regions: self
                .receive
                .into_iter()
                .map(|(k, v)| (k, Mutex::new(v)))
                .collect(),
            sender,
        }))
    }
}

/// Host side of the streaming protocol
pub struct BufferManager {
    config: BufferConfig,
    transceiver: Arc<dyn Transceiver>,
    send_regions: HashMap<RegionKey, Mutex<SendRegion>>,
    receive_regions: HashMap<RegionKey, Mutex<ReceiveRegion>>,
    sender: SenderThread,
}

impl BufferManager {
    /// Start registering regions
    pub fn builder(config: BufferConfig) -> BufferManagerBuilder {
        BufferManagerBuilder {
            config,
            send: HashMap::new(),
            receive: HashMap::new(),
        }
    }

    /// Protocol settings
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Every core with a buffered region
    pub fn cores(&self) -> BTreeSet<CoreLocation> {
        self.send_regions
            .keys()
            .chain(self.receive_regions.keys())
            .map(|(core, _)| *core)
            .collect()
    }

    fn send_region(&self, core: CoreLocation, region: u8) -> Result<&Mutex<SendRegion>> {
        self.send_regions
            .get(&(core, region))
            .ok_or_else(|| BufferError::unknown_core(core, region))
    }

    fn receive_region(&self, core: CoreLocation, region: u8) -> Result<&Mutex<ReceiveRegion>> {
        self.receive_regions
            .get(&(core, region))
            .ok_or_else(|| BufferError::unknown_core(core, region))
    }

    /// Write the initial contents of every send region
    pub fn prime_all(&self) -> Result<()> {
        let mut keys: Vec<&RegionKey> = self.send_regions.keys().collect();
        keys.sort();
        for &(core, region) in keys {
            self.prime(core, region)?;
        }
        Ok(())
    }

    /// Write the initial contents of one send region
    pub fn prime(&self, core: CoreLocation, region: u8) -> Result<()> {
        self.send_region(core, region)?
            .lock()
            .prime(self.transceiver.as_ref())
    }

    /// Let every core start requesting
    pub fn start_run(&self) -> Result<()> {
        for slot in self.send_regions.values() {
            slot.lock().start();
        }
        for slot in self.receive_regions.values() {
            slot.lock().start();
        }
        for core in self.cores() {
            self.sender.send(core, Message::StartRequests)?;
        }
        Ok(())
    }

    /// Handle one device message
    pub fn handle_message(&self, message: &Message) -> Result<()> {
        match *message {
            Message::RequestBuffers {
                core,
                region,
                sequence,
                space_available,
            } => self
                .handle_request_buffers(core, region, sequence, space_available)
                .map(|_| ()),
            Message::RequestReadData {
                core,
                region,
                sequence,
                start_address,
                length,
            } => self
                .handle_request_read_data(core, region, sequence, start_address, length)
                .map(|_| ()),
            Message::FlushDataCompleted { core, region } => self.handle_flush(core, region),
            _ => Err(BufferError::protocol(format!(
                "{} is not a device request",
                message.command()
            ))),
        }
    }

    /// Answer a report of free space; returns the queued replies
    pub fn handle_request_buffers(
        &self,
        core: CoreLocation,
        region: u8,
        sequence: u8,
        space_available: u32,
    ) -> Result<Vec<Message>> {
        let mut state = self.send_region(core, region)?.lock();
        let replies = state.fill(space_available as usize, self.config.max_packet_bytes)?;
        log::debug!(
            "{} region {}: device at sequence {}, {} bytes free, {} replies",
            core,
            region,
            sequence,
            space_available,
            replies.len()
        );
        // queued under the region lock so replies keep request order
        for reply in &replies {
            self.sender.send(core, reply.clone())?;
        }
        Ok(replies)
    }

    /// Read the requested range and acknowledge it
    pub fn handle_request_read_data(
        &self,
        core: CoreLocation,
        region: u8,
        sequence: u8,
        start_address: u32,
        length: u32,
    ) -> Result<ReadOutcome> {
        let mut state = self.receive_region(core, region)?.lock();
        let outcome = state.read(self.transceiver.as_ref(), sequence, start_address, length)?;
        self.sender
            .send(core, Message::HostDataRead { region, sequence })?;
        Ok(outcome)
    }

    /// The core has nothing more to be read
    pub fn handle_flush(&self, core: CoreLocation, region: u8) -> Result<()> {
        self.receive_region(core, region)?.lock().flush_completed();
        Ok(())
    }

    /// Bytes received from a receive region
    pub fn received_data(&self, core: CoreLocation, region: u8) -> Option<Vec<u8>> {
        self.receive_regions
            .get(&(core, region))
            .map(|slot| slot.lock().data().to_vec())
    }

    /// State of a send region
    pub fn send_state(&self, core: CoreLocation, region: u8) -> Option<RegionState> {
        self.send_regions
            .get(&(core, region))
            .map(|slot| slot.lock().state())
    }

    /// State of a receive region
    pub fn receive_state(&self, core: CoreLocation, region: u8) -> Option<RegionState> {
        self.receive_regions
            .get(&(core, region))
            .map(|slot| slot.lock().state())
    }

    /// Dispatch table routing device requests to this manager
    pub fn dispatch_table(self: &Arc<Self>) -> DispatchTable {
        [
            CommandId::RequestBuffers,
            CommandId::RequestReadData,
            CommandId::FlushDataCompleted,
        ]
        .into_iter()
        .fold(DispatchTable::builder(), |builder, command| {
            let manager = Arc::clone(self);
            builder.register(command, move |message| manager.handle_message(message))
        })
        .build()
    }

    /// Tell cores to stop, close every region, then drain and join the
    /// send thread. Returns the number of messages the thread sent.
    pub fn stop_run(&self) -> usize {
        for core in self.cores() {
            if let Err(e) = self.sender.send(core, Message::StopRequests) {
                log::warn!("Cannot stop requests from {}: {}", core, e);
            }
        }
        for slot in self.send_regions.values() {
            slot.lock().close();
        }
        for slot in self.receive_regions.values() {
            slot.lock().close();
        }
        self.sender.stop()
    }

    /// True until [`BufferManager::stop_run`] has joined the send thread
    pub fn is_running(&self) -> bool {
        self.sender.is_running()
    }
}
