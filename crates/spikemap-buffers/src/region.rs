//! Per-region streaming state
//!
//! A send region is filled by the host ahead of the core consuming it; a
//! receive region is filled by the core and drained by the host. Both move
//! through the same states:
//!
//! ```text
//! Uninitialized -> Primed -> Streaming -> Draining -> Closed
//! ```
//!
//! Receive regions skip `Primed`.

use std::collections::{BTreeMap, VecDeque};

use once_cell::sync::OnceCell;
use spikemap_image::CoreLocation;

use crate::error::{BufferError, Result};
use crate::messages::{
    padding_bytes, EventPacket, Message, PADDING_BYTES, SEQUENCED_HEADER_BYTES,
};
use crate::transport::{resolve_region_address, Transceiver};

/// Lifecycle of a buffered region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionState {
    /// Registered, nothing written or read yet
    Uninitialized,
    /// Initial data written and base address known
    Primed,
    /// Answering device requests
    Streaming,
    /// End of data signalled
    Draining,
    /// Run stopped
    Closed,
}

/// Wrapping sequence numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCounter {
    next: u32,
    n_sequences: u32,
}

impl SequenceCounter {
    /// Counter over `0..n_sequences` starting at zero
    pub fn new(n_sequences: u32) -> Self {
        Self {
            next: 0,
            n_sequences: n_sequences.max(1),
        }
    }

    /// Number the next call to [`SequenceCounter::advance`] returns
    pub fn peek(&self) -> u8 {
        self.next as u8
    }

    /// Number before the next one, i.e. the last handed out
    pub fn last(&self) -> u8 {
        ((self.next + self.n_sequences - 1) % self.n_sequences) as u8
    }

    /// Take the next number
    pub fn advance(&mut self) -> u8 {
        let current = self.next;
        self.next = (self.next + 1) % self.n_sequences;
        current as u8
    }

    /// Restart at zero
    pub fn reset(&mut self) {
        self.next = 0;
    }
}

/// Event packets waiting to be sent to a core
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendBuffer {
    packets: VecDeque<EventPacket>,
}

impl SendBuffer {
    /// Buffer the given packets in order
    pub fn new(packets: impl IntoIterator<Item = EventPacket>) -> Self {
        Self {
            packets: packets.into_iter().collect(),
        }
    }

    /// Group `(timestamp, key)` pairs into packets of at most
    /// `max_packet_bytes`, ordered by timestamp
    pub fn from_spike_times(
        spikes: impl IntoIterator<Item = (u32, u32)>,
        max_packet_bytes: usize,
    ) -> Result<Self> {
        let max_keys = EventPacket::max_keys(max_packet_bytes);
        if max_keys == 0 {
            return Err(BufferError::protocol(format!(
                "{} bytes cannot hold an event packet with one key",
                max_packet_bytes
            )));
        }
        let mut by_time: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for (timestamp, key) in spikes {
            by_time.entry(timestamp).or_default().push(key);
        }
        let packets = by_time.into_iter().flat_map(|(timestamp, keys)| {
            keys.chunks(max_keys)
                .map(|chunk| EventPacket {
                    timestamp,
                    keys: chunk.to_vec(),
                })
                .collect::<Vec<_>>()
        });
        Ok(Self::new(packets))
    }

    /// Packets left
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// True if nothing is left to send
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Encoded size of the next packet
    pub fn next_len(&self) -> Option<usize> {
        self.packets.front().map(EventPacket::encoded_len)
    }

    /// Split the next packet into packets of at most `max_bytes` each,
    /// keeping its timestamp and key order
    pub fn split_front(&mut self, max_bytes: usize) -> Result<()> {
        match self.packets.front() {
            Some(front) if front.encoded_len() > max_bytes => {}
            _ => return Ok(()),
        }
        let max_keys = EventPacket::max_keys(max_bytes);
        if max_keys == 0 {
            return Err(BufferError::protocol(format!(
                "{} bytes cannot hold an event packet with one key",
                max_bytes
            )));
        }
        if let Some(packet) = self.packets.pop_front() {
            for chunk in packet.keys.chunks(max_keys).rev() {
                self.packets.push_front(EventPacket {
                    timestamp: packet.timestamp,
                    keys: chunk.to_vec(),
                });
            }
        }
        Ok(())
    }

    /// Remove and encode packets while they fit in `limit` bytes
    pub fn take_encoded(&mut self, limit: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(len) = self.next_len() {
            if out.len() + len > limit {
                break;
            }
            if let Some(packet) = self.packets.pop_front() {
                packet.encode_into(&mut out)?;
            }
        }
        Ok(out)
    }
}

/// Host-to-core streaming region
#[derive(Debug)]
pub struct SendRegion {
    core: CoreLocation,
    region: u8,
    size: usize,
    base: OnceCell<u32>,
    state: RegionState,
    sequence: SequenceCounter,
    buffer: SendBuffer,
    stop_sent: bool,
}

impl SendRegion {
    /// Region `region` of `core`, `size` bytes, streaming `buffer`
    pub fn new(
        core: CoreLocation,
        region: u8,
        size: usize,
        buffer: SendBuffer,
        n_sequences: u32,
    ) -> Self {
        Self {
            core,
            region,
            size,
            base: OnceCell::new(),
            state: RegionState::Uninitialized,
            sequence: SequenceCounter::new(n_sequences),
            buffer,
            stop_sent: false,
        }
    }

    /// Current state
    pub fn state(&self) -> RegionState {
        self.state
    }

    /// Packets still to be sent
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Sequence number of the last message sent
    pub fn last_sequence(&self) -> u8 {
        self.sequence.last()
    }

    fn invalid(&self, operation: &'static str) -> BufferError {
        BufferError::InvalidState {
            core: self.core,
            region: self.region,
            state: self.state,
            operation,
        }
    }

    /// Device address of the region, read once from the pointer table
    pub fn base_address(&self, transceiver: &dyn Transceiver) -> Result<u32> {
        self.base
            .get_or_try_init(|| resolve_region_address(transceiver, self.core, self.region))
            .copied()
    }

    /// Write as many whole packets as fit, then pad the rest of the region
    pub fn prime(&mut self, transceiver: &dyn Transceiver) -> Result<()> {
        if self.state != RegionState::Uninitialized {
            return Err(self.invalid("prime"));
        }
        let base = self.base_address(transceiver)?;

        let mut bytes = match self.buffer.next_len() {
            Some(first) if first > self.size => {
                return Err(BufferError::RegionTooSmall {
                    core: self.core,
                    region: self.region,
                    size: self.size,
                    needed: first,
                })
            }
            Some(_) => self.buffer.take_encoded(self.size)?,
            None => {
                let stop = Message::EventStop.encode();
                if stop.len() > self.size {
                    return Err(BufferError::RegionTooSmall {
                        core: self.core,
                        region: self.region,
                        size: self.size,
                        needed: stop.len(),
                    });
                }
                self.stop_sent = true;
                stop
            }
        };
        let used = bytes.len();
        bytes.extend(padding_bytes(self.size - used));
        transceiver.write_memory(self.core, base, &bytes)?;

        log::debug!(
            "Primed region {} of {} with {} bytes, {} packets pending",
            self.region,
            self.core,
            used,
            self.buffer.len()
        );
        self.sequence.reset();
        self.state = if self.stop_sent {
            RegionState::Draining
        } else {
            RegionState::Primed
        };
        Ok(())
    }

    /// Core was told to start requesting
    pub fn start(&mut self) {
        if self.state == RegionState::Primed {
            self.state = RegionState::Streaming;
        }
    }

    /// Replies to a request for `space_available` bytes.
    ///
    /// Sequenced messages carry at most `max_packet_bytes` of payload and
    /// their encoded sizes together never exceed `space_available`.
    pub fn fill(&mut self, space_available: usize, max_packet_bytes: usize) -> Result<Vec<Message>> {
        match self.state {
            RegionState::Primed => self.state = RegionState::Streaming,
            RegionState::Streaming | RegionState::Draining => {}
            RegionState::Uninitialized | RegionState::Closed => {
                return Err(self.invalid("answer request-buffers"))
            }
        }

        let mut replies = Vec::new();
        let mut space = space_available;
        // packets that could never fit one message are split by keys
        let largest = max_packet_bytes.min(self.size.saturating_sub(SEQUENCED_HEADER_BYTES));
        while !self.buffer.is_empty() && space > SEQUENCED_HEADER_BYTES {
            self.buffer.split_front(largest)?;
            let limit = max_packet_bytes.min(space - SEQUENCED_HEADER_BYTES);
            let payload = self.buffer.take_encoded(limit)?;
            if payload.is_empty() {
                break;
            }
            let message = Message::HostSendSequencedData {
                region: self.region,
                sequence: self.sequence.advance(),
                payload,
            };
            space -= message.encoded_len();
            replies.push(message);
        }

        if self.buffer.is_empty() && !self.stop_sent {
            let stop = Message::EventStop.encode();
            if space >= SEQUENCED_HEADER_BYTES + stop.len() {
                replies.push(Message::HostSendSequencedData {
                    region: self.region,
                    sequence: self.sequence.advance(),
                    payload: stop,
                });
                self.stop_sent = true;
                self.state = RegionState::Draining;
            }
        } else if self.stop_sent && replies.is_empty() && space_available >= PADDING_BYTES {
            replies.push(Message::Padding);
        }
        Ok(replies)
    }

    /// Stop the region
    pub fn close(&mut self) {
        self.state = RegionState::Closed;
    }
}

/// Core-to-host streaming region
#[derive(Debug)]
pub struct ReceiveRegion {
    core: CoreLocation,
    region: u8,
    base: OnceCell<u32>,
    state: RegionState,
    last_ack: u8,
    acked: bool,
    data: Vec<u8>,
}

/// Outcome of a read request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Data read and appended
    Appended(usize),
    /// Same sequence as the last acknowledged request, nothing appended
    Duplicate,
}

impl ReceiveRegion {
    /// Region `region` of `core`
    pub fn new(core: CoreLocation, region: u8) -> Self {
        Self {
            core,
            region,
            base: OnceCell::new(),
            state: RegionState::Uninitialized,
            last_ack: 0,
            acked: false,
            data: Vec::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> RegionState {
        self.state
    }

    /// Bytes received so far
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Sequence number of the last acknowledged read, if any
    pub fn last_ack(&self) -> Option<u8> {
        self.acked.then_some(self.last_ack)
    }

    /// Device address of the region, read once from the pointer table
    pub fn base_address(&self, transceiver: &dyn Transceiver) -> Result<u32> {
        self.base
            .get_or_try_init(|| resolve_region_address(transceiver, self.core, self.region))
            .copied()
    }

    /// Core was told to start requesting
    pub fn start(&mut self) {
        if self.state == RegionState::Uninitialized {
            self.state = RegionState::Streaming;
        }
    }

    /// Read the requested range unless `sequence` repeats the last request
    pub fn read(
        &mut self,
        transceiver: &dyn Transceiver,
        sequence: u8,
        start_address: u32,
        length: u32,
    ) -> Result<ReadOutcome> {
        if self.state == RegionState::Closed {
            return Err(BufferError::InvalidState {
                core: self.core,
                region: self.region,
                state: self.state,
                operation: "read data",
            });
        }
        if self.acked && sequence == self.last_ack {
            log::debug!(
                "Repeated read {} for region {} of {}",
                sequence,
                self.region,
                self.core
            );
            return Ok(ReadOutcome::Duplicate);
        }
        self.base_address(transceiver)?;
        let bytes = transceiver.read_memory(self.core, start_address, length as usize)?;
        self.data.extend_from_slice(&bytes);
        self.last_ack = sequence;
        self.acked = true;
        if self.state == RegionState::Uninitialized {
            self.state = RegionState::Streaming;
        }
        Ok(ReadOutcome::Appended(bytes.len()))
    }

    /// Core has no more data
    pub fn flush_completed(&mut self) {
        if self.state != RegionState::Closed {
            self.state = RegionState::Draining;
        }
    }

    /// Stop the region
    pub fn close(&mut self) {
        self.state = RegionState::Closed;
    }
}
