//! Wire codec for buffer command messages and event packets
//!
//! Every command starts with a little-endian u16 header `0x4000 | id`.
//! Event packets, carried as the payload of sequenced data and written
//! directly into primed regions, start with `0x5000 | count` followed by a
//! u32 timestamp and `count` u32 keys.

use std::fmt;

use spikemap_image::CoreLocation;

use crate::error::{BufferError, Result};

/// Prefix of every command header
pub const COMMAND_FLAG: u16 = 0x4000;

/// Mask selecting the command id from a header
pub const COMMAND_ID_MASK: u16 = 0x3FFF;

/// Prefix of an event packet header: 32-bit keys with a timestamp
pub const EVENT_FLAG: u16 = 0x5000;

/// Bytes of an event packet before its keys
pub const EVENT_HEADER_BYTES: usize = 6;

/// Largest key count an event packet header can carry
pub const MAX_EVENTS_PER_PACKET: usize = 0xFF;

/// Bytes of a sequenced-data message before its payload
pub const SEQUENCED_HEADER_BYTES: usize = 4;

/// Bytes of one padding command
pub const PADDING_BYTES: usize = 2;

/// Command identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum CommandId {
    /// Filler, repeated to occupy unused space
    Padding = 2,
    /// No more data will follow
    EventStop = 3,
    /// Core should stop requesting buffers
    StopRequests = 4,
    /// Core may start requesting buffers
    StartRequests = 5,
    /// Core reports free space in a send region
    RequestBuffers = 6,
    /// Host delivers data into a send region
    HostSendSequencedData = 7,
    /// Core asks the host to read part of a receive region
    RequestReadData = 8,
    /// Host acknowledges a read
    HostDataRead = 9,
    /// Core has no more data to be read
    FlushDataCompleted = 10,
}

impl CommandId {
    /// Every command id
    pub const ALL: [CommandId; 9] = [
        CommandId::Padding,
        CommandId::EventStop,
        CommandId::StopRequests,
        CommandId::StartRequests,
        CommandId::RequestBuffers,
        CommandId::HostSendSequencedData,
        CommandId::RequestReadData,
        CommandId::HostDataRead,
        CommandId::FlushDataCompleted,
    ];

    /// Header word of this command
    pub fn header(self) -> u16 {
        COMMAND_FLAG | self as u16
    }

    /// Parse a header word
    pub fn from_header(header: u16) -> Result<Self> {
        if header & !COMMAND_ID_MASK != COMMAND_FLAG {
            return Err(BufferError::protocol(format!(
                "header {:#06x} is not a command",
                header
            )));
        }
        let id = header & COMMAND_ID_MASK;
        Self::ALL
            .into_iter()
            .find(|c| *c as u16 == id)
            .ok_or_else(|| BufferError::protocol(format!("unknown command id {}", id)))
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandId::Padding => "padding",
            CommandId::EventStop => "event-stop",
            CommandId::StopRequests => "stop-requests",
            CommandId::StartRequests => "start-requests",
            CommandId::RequestBuffers => "request-buffers",
            CommandId::HostSendSequencedData => "host-send-sequenced-data",
            CommandId::RequestReadData => "request-read-data",
            CommandId::HostDataRead => "host-data-read",
            CommandId::FlushDataCompleted => "flush-data-completed",
        };
        f.write_str(name)
    }
}

/// A decoded command message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Filler
    Padding,
    /// End of data
    EventStop,
    /// Stop requesting buffers
    StopRequests,
    /// Start requesting buffers
    StartRequests,
    /// Free space report from a core
    RequestBuffers {
        /// Reporting core
        core: CoreLocation,
        /// Send region id
        region: u8,
        /// Last sequence number the core received
        sequence: u8,
        /// Free bytes in the region
        space_available: u32,
    },
    /// Data for a send region
    HostSendSequencedData {
        /// Send region id
        region: u8,
        /// Sequence number of this message
        sequence: u8,
        /// Event packets or an event-stop command
        payload: Vec<u8>,
    },
    /// Read request from a core
    RequestReadData {
        /// Requesting core
        core: CoreLocation,
        /// Receive region id
        region: u8,
        /// Sequence number of the request
        sequence: u8,
        /// Device address of the data
        start_address: u32,
        /// Bytes to read
        length: u32,
    },
    /// Read acknowledgement
    HostDataRead {
        /// Receive region id
        region: u8,
        /// Sequence number being acknowledged
        sequence: u8,
    },
    /// Core has flushed its receive region
    FlushDataCompleted {
        /// Flushing core
        core: CoreLocation,
        /// Receive region id
        region: u8,
    },
}

fn chip_word(core: CoreLocation) -> u16 {
    (u16::from(core.x) << 8) | u16::from(core.y)
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Little-endian reader over a received message
struct Reader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, at: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.at + n;
        let slice = self.bytes.get(self.at..end).ok_or_else(|| {
            BufferError::protocol(format!(
                "message truncated: need {} bytes at offset {}, have {}",
                n,
                self.at,
                self.bytes.len()
            ))
        })?;
        self.at = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn core(&mut self) -> Result<CoreLocation> {
        let chip = self.u16()?;
        let p = self.u8()?;
        Ok(CoreLocation::new((chip >> 8) as u8, (chip & 0xFF) as u8, p))
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.at.min(self.bytes.len())..];
        self.at = self.bytes.len();
        rest
    }
}

impl Message {
    /// Command id of the message
    pub fn command(&self) -> CommandId {
        match self {
            Message::Padding => CommandId::Padding,
            Message::EventStop => CommandId::EventStop,
            Message::StopRequests => CommandId::StopRequests,
            Message::StartRequests => CommandId::StartRequests,
            Message::RequestBuffers { .. } => CommandId::RequestBuffers,
            Message::HostSendSequencedData { .. } => CommandId::HostSendSequencedData,
            Message::RequestReadData { .. } => CommandId::RequestReadData,
            Message::HostDataRead { .. } => CommandId::HostDataRead,
            Message::FlushDataCompleted { .. } => CommandId::FlushDataCompleted,
        }
    }

    /// Core named in a device-originated message
    pub fn core(&self) -> Option<CoreLocation> {
        match self {
            Message::RequestBuffers { core, .. }
            | Message::RequestReadData { core, .. }
            | Message::FlushDataCompleted { core, .. } => Some(*core),
            _ => None,
        }
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        2 + match self {
            Message::Padding | Message::EventStop | Message::StopRequests | Message::StartRequests => 0,
            Message::RequestBuffers { .. } => 10,
            Message::HostSendSequencedData { payload, .. } => 2 + payload.len(),
            Message::RequestReadData { .. } => 14,
            Message::HostDataRead { .. } => 2,
            Message::FlushDataCompleted { .. } => 4,
        }
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        put_u16(&mut out, self.command().header());
        match self {
            Message::Padding | Message::EventStop | Message::StopRequests | Message::StartRequests => {}
            Message::RequestBuffers {
                core,
                region,
                sequence,
                space_available,
            } => {
                put_u16(&mut out, chip_word(*core));
                out.extend_from_slice(&[core.p, *region, *sequence, 0]);
                put_u32(&mut out, *space_available);
            }
            Message::HostSendSequencedData {
                region,
                sequence,
                payload,
            } => {
                out.extend_from_slice(&[*region, *sequence]);
                out.extend_from_slice(payload);
            }
            Message::RequestReadData {
                core,
                region,
                sequence,
                start_address,
                length,
            } => {
                put_u16(&mut out, chip_word(*core));
                out.extend_from_slice(&[core.p, *region, *sequence, 0]);
                put_u32(&mut out, *start_address);
                put_u32(&mut out, *length);
            }
            Message::HostDataRead { region, sequence } => {
                out.extend_from_slice(&[*region, *sequence]);
            }
            Message::FlushDataCompleted { core, region } => {
                put_u16(&mut out, chip_word(*core));
                out.extend_from_slice(&[core.p, *region]);
            }
        }
        out
    }

    /// Decode one message occupying all of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let command = CommandId::from_header(r.u16()?)?;
        let message = match command {
            CommandId::Padding => Message::Padding,
            CommandId::EventStop => Message::EventStop,
            CommandId::StopRequests => Message::StopRequests,
            CommandId::StartRequests => Message::StartRequests,
            CommandId::RequestBuffers => {
                let core = r.core()?;
                let region = r.u8()?;
                let sequence = r.u8()?;
                r.u8()?;
                Message::RequestBuffers {
                    core,
                    region,
                    sequence,
                    space_available: r.u32()?,
                }
            }
            CommandId::HostSendSequencedData => Message::HostSendSequencedData {
                region: r.u8()?,
                sequence: r.u8()?,
                payload: r.rest().to_vec(),
            },
            CommandId::RequestReadData => {
                let core = r.core()?;
                let region = r.u8()?;
                let sequence = r.u8()?;
                r.u8()?;
                Message::RequestReadData {
                    core,
                    region,
                    sequence,
                    start_address: r.u32()?,
                    length: r.u32()?,
                }
            }
            CommandId::HostDataRead => Message::HostDataRead {
                region: r.u8()?,
                sequence: r.u8()?,
            },
            CommandId::FlushDataCompleted => {
                let core = r.core()?;
                Message::FlushDataCompleted {
                    core,
                    region: r.u8()?,
                }
            }
        };
        if r.at != bytes.len() {
            return Err(BufferError::protocol(format!(
                "{} trailing bytes after {}",
                bytes.len() - r.at,
                command
            )));
        }
        Ok(message)
    }
}

/// Bytes of padding commands filling `len` bytes.
///
/// An odd remainder ends in a single zero byte.
pub fn padding_bytes(len: usize) -> Vec<u8> {
    let header = CommandId::Padding.header().to_le_bytes();
    let mut out = Vec::with_capacity(len);
    for _ in 0..len / PADDING_BYTES {
        out.extend_from_slice(&header);
    }
    out.resize(len, 0);
    out
}

/// Timestamped multicast keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPacket {
    /// Timestep the keys are sent in
    pub timestamp: u32,
    /// Multicast keys
    pub keys: Vec<u32>,
}

impl EventPacket {
    /// Encoded size of a packet with `n_keys` keys
    pub const fn size_for(n_keys: usize) -> usize {
        EVENT_HEADER_BYTES + 4 * n_keys
    }

    /// Most keys a packet may hold within a payload of `max_bytes`
    pub fn max_keys(max_bytes: usize) -> usize {
        (max_bytes.saturating_sub(EVENT_HEADER_BYTES) / 4).min(MAX_EVENTS_PER_PACKET)
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        Self::size_for(self.keys.len())
    }

    /// Append the encoding to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.keys.len() > MAX_EVENTS_PER_PACKET {
            return Err(BufferError::protocol(format!(
                "{} keys exceed the {} a packet can carry",
                self.keys.len(),
                MAX_EVENTS_PER_PACKET
            )));
        }
        put_u16(out, EVENT_FLAG | self.keys.len() as u16);
        put_u32(out, self.timestamp);
        for &key in &self.keys {
            put_u32(out, key);
        }
        Ok(())
    }

    /// Decode every packet in a payload
    pub fn decode_all(bytes: &[u8]) -> Result<Vec<EventPacket>> {
        let mut r = Reader::new(bytes);
        let mut packets = Vec::new();
        while r.at < bytes.len() {
            let header = r.u16()?;
            if header & 0xFF00 != EVENT_FLAG {
                return Err(BufferError::protocol(format!(
                    "header {:#06x} is not an event packet",
                    header
                )));
            }
            let count = (header & 0xFF) as usize;
            let timestamp = r.u32()?;
            let keys = (0..count).map(|_| r.u32()).collect::<Result<Vec<_>>>()?;
            packets.push(EventPacket { timestamp, keys });
        }
        Ok(packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_buffers_layout() {
        let message = Message::RequestBuffers {
            core: CoreLocation::new(1, 2, 3),
            region: 4,
            sequence: 255,
            space_available: 0x0102_0304,
        };
        let bytes = message.encode();
        assert_eq!(
            bytes,
            vec![0x06, 0x40, 0x02, 0x01, 3, 4, 255, 0, 0x04, 0x03, 0x02, 0x01]
        );
        assert_eq!(bytes.len(), message.encoded_len());
        assert_eq!(Message::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_sequenced_data_layout() {
        let message = Message::HostSendSequencedData {
            region: 2,
            sequence: 7,
            payload: vec![0xAA, 0xBB],
        };
        assert_eq!(message.encode(), vec![0x07, 0x40, 2, 7, 0xAA, 0xBB]);
    }

    #[test]
    fn test_rejects_non_command_and_unknown_id() {
        assert!(Message::decode(&[0x02, 0x50]).is_err());
        assert!(Message::decode(&[0x7F, 0x40]).is_err());
        assert!(Message::decode(&[0x06, 0x40, 0x00]).is_err());
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let err = Message::decode(&[0x03, 0x40, 0x00]).unwrap_err();
        assert!(matches!(err, BufferError::Protocol { .. }));
    }

    #[test]
    fn test_padding_fill() {
        assert_eq!(padding_bytes(4), vec![0x02, 0x40, 0x02, 0x40]);
        assert_eq!(padding_bytes(3), vec![0x02, 0x40, 0x00]);
        assert!(padding_bytes(0).is_empty());
    }

    #[test]
    fn test_event_packets() {
        let packets = vec![
            EventPacket {
                timestamp: 10,
                keys: vec![0x0800, 0x0801],
            },
            EventPacket {
                timestamp: 11,
                keys: vec![],
            },
        ];
        let mut bytes = Vec::new();
        for p in &packets {
            p.encode_into(&mut bytes).unwrap();
        }
        assert_eq!(&bytes[..2], &[0x02, 0x50]);
        assert_eq!(bytes.len(), EventPacket::size_for(2) + EventPacket::size_for(0));
        assert_eq!(EventPacket::decode_all(&bytes).unwrap(), packets);
    }

    #[test]
    fn test_max_keys() {
        assert_eq!(EventPacket::max_keys(256), 62);
        assert_eq!(EventPacket::max_keys(4), 0);
        assert_eq!(EventPacket::max_keys(1 << 20), MAX_EVENTS_PER_PACKET);
    }
}
