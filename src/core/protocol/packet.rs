//! Framed request packets
//!
//! Wire layout: `[size:u16 LE][payload][crc16:u16 LE]?`. The size field
//! counts the whole packet including itself and the optional CRC; the CRC
//! covers the payload only.

use super::checksum::crc16_modbus_table;
use super::command::Command;
use thiserror::Error;

/// Bytes reserved in front of the payload for the size field
pub const SIZE_FIELD_LEN: usize = 2;

/// Bytes appended after the payload when a CRC is requested
pub const CRC_LEN: usize = 2;

/// Largest packet the 16-bit size field can describe
pub const MAX_PACKET_LEN: usize = u16::MAX as usize;

const DEFAULT_CAPACITY: usize = 256;

/// Framing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Packet does not fit the 16-bit size field
    #[error("Packet of {0} bytes exceeds the 65535 byte limit")]
    TooLarge(usize),

    /// Fewer bytes than the header/trailer need
    #[error("Packet truncated: {0} bytes")]
    Truncated(usize),

    /// Size field disagrees with the received length
    #[error("Size field says {declared} bytes, got {actual}")]
    SizeMismatch {
        /// Value of the size field
        declared: usize,
        /// Actual byte count
        actual: usize,
    },

    /// CRC trailer does not match the payload
    #[error("CRC mismatch: expected 0x{expected:04x}, got 0x{actual:04x}")]
    CrcMismatch {
        /// CRC computed over the payload
        expected: u16,
        /// CRC found in the trailer
        actual: u16,
    },
}

/// Builds request packets in place, reusing one buffer across requests
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    buffer: Vec<u8>,
    offset: usize,
}

impl Default for PacketBuilder {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl PacketBuilder {
    /// Create a builder with the default 256 byte capacity
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder; capacity never drops below room for size + CRC
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity.max(SIZE_FIELD_LEN + CRC_LEN)],
            offset: SIZE_FIELD_LEN,
        }
    }

    /// Start a packet with its command byte
    pub fn command(command: impl Into<Command>) -> Self {
        let mut builder = Self::new();
        builder.add_command(command);
        builder
    }

    fn ensure_capacity(&mut self, additional: usize) {
        let required = self.offset + additional + CRC_LEN;
        if required > self.buffer.len() {
            let new_capacity = (self.buffer.len() * 2).max(required);
            self.buffer.resize(new_capacity, 0);
        }
    }

    /// Append one byte
    pub fn add_byte(&mut self, value: u8) -> &mut Self {
        self.ensure_capacity(1);
        self.buffer[self.offset] = value;
        self.offset += 1;
        self
    }

    /// Append the low `byte_len` bytes of `value`, least significant first
    pub fn add_little_endian(&mut self, value: u64, byte_len: usize) -> &mut Self {
        self.ensure_capacity(byte_len);
        for (i, slot) in self.buffer[self.offset..self.offset + byte_len]
            .iter_mut()
            .enumerate()
        {
            *slot = value.checked_shr((i * 8) as u32).map_or(0, |v| v as u8);
        }
        self.offset += byte_len;
        self
    }

    /// Append raw bytes
    pub fn add_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.ensure_capacity(data.len());
        self.buffer[self.offset..self.offset + data.len()].copy_from_slice(data);
        self.offset += data.len();
        self
    }

    /// Append a 4-byte bus address
    pub fn add_address(&mut self, address: u32) -> &mut Self {
        self.add_little_endian(u64::from(address), 4)
    }

    /// Append a 2-byte length
    pub fn add_length(&mut self, length: u16) -> &mut Self {
        self.add_little_endian(u64::from(length), 2)
    }

    /// Append the command byte
    pub fn add_command(&mut self, command: impl Into<Command>) -> &mut Self {
        self.add_byte(command.into().code())
    }

    /// Finish the packet: fill in the size field and, if asked, the CRC trailer.
    ///
    /// The write offset is left untouched, so building twice yields the same bytes.
    pub fn build(&mut self, with_crc: bool) -> Result<&[u8], PacketError> {
        let end = if with_crc { self.offset + CRC_LEN } else { self.offset };
        if end > MAX_PACKET_LEN {
            return Err(PacketError::TooLarge(end));
        }

        self.buffer[..SIZE_FIELD_LEN].copy_from_slice(&(end as u16).to_le_bytes());
        if with_crc {
            let crc = crc16_modbus_table(&self.buffer[SIZE_FIELD_LEN..self.offset]);
            self.buffer[self.offset..end].copy_from_slice(&crc.to_le_bytes());
        }

        Ok(&self.buffer[..end])
    }

    /// Rewind to an empty payload, keeping the allocation
    pub fn reset(&mut self) -> &mut Self {
        self.offset = SIZE_FIELD_LEN;
        self
    }

    /// Payload bytes written so far
    pub fn payload_len(&self) -> usize {
        self.offset - SIZE_FIELD_LEN
    }

    /// Current buffer capacity
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

/// Decoding side of the framing, for callers that want to check a frame
pub struct Packet;

impl Packet {
    /// Validate a complete frame and return its payload.
    ///
    /// The CRC is only checked when `with_crc` is set.
    pub fn decode(frame: &[u8], with_crc: bool) -> Result<&[u8], PacketError> {
        let overhead = SIZE_FIELD_LEN + if with_crc { CRC_LEN } else { 0 };
        if frame.len() < overhead {
            return Err(PacketError::Truncated(frame.len()));
        }

        let declared = u16::from_le_bytes([frame[0], frame[1]]) as usize;
        if declared != frame.len() {
            return Err(PacketError::SizeMismatch {
                declared,
                actual: frame.len(),
            });
        }

        let payload_end = frame.len() - (overhead - SIZE_FIELD_LEN);
        let payload = &frame[SIZE_FIELD_LEN..payload_end];
        if with_crc {
            let expected = crc16_modbus_table(payload);
            let actual = u16::from_le_bytes([frame[payload_end], frame[payload_end + 1]]);
            if expected != actual {
                return Err(PacketError::CrcMismatch { expected, actual });
            }
        }

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::checksum::crc16_modbus;
    use crate::core::protocol::command::GbaCommand;

    #[test]
    fn test_read_id_packet() {
        let mut builder = PacketBuilder::command(GbaCommand::ReadId);
        assert_eq!(builder.build(true).unwrap(), &[0x05, 0x00, 0xF0, 0xBF, 0x04]);
    }

    #[test]
    fn test_read_request_layout() {
        let mut builder = PacketBuilder::command(GbaCommand::Read);
        builder.add_address(0x0012_3456).add_length(0x0200);
        let packet = builder.build(true).unwrap().to_vec();

        assert_eq!(packet.len(), 2 + 7 + 2);
        assert_eq!(&packet[..2], &[11, 0]);
        assert_eq!(&packet[2..9], &[0xF6, 0x56, 0x34, 0x12, 0x00, 0x00, 0x02]);
        assert_eq!(&packet[9..], &crc16_modbus(&packet[2..9]).to_le_bytes());
    }

    #[test]
    fn test_size_and_crc_fields() {
        for len in [0usize, 1, 7, 300] {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let mut builder = PacketBuilder::new();
            builder.add_bytes(&payload);
            let packet = builder.build(true).unwrap();

            assert_eq!(&packet[..2], &((len + 4) as u16).to_le_bytes());
            assert_eq!(&packet[packet.len() - 2..], &crc16_modbus(&payload).to_le_bytes());
        }
    }

    #[test]
    fn test_without_crc() {
        let mut builder = PacketBuilder::new();
        builder.add_bytes(&[1, 2, 3]);
        assert_eq!(builder.build(false).unwrap(), &[5, 0, 1, 2, 3]);
    }

    #[test]
    fn test_decode_recovers_payload() {
        for len in [0usize, 1, 255, MAX_PACKET_LEN - 4] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let mut builder = PacketBuilder::new();
            builder.add_bytes(&payload);

            let frame = builder.build(true).unwrap();
            assert_eq!(Packet::decode(frame, true).unwrap(), payload.as_slice());
        }
    }

    #[test]
    fn test_too_large() {
        let mut builder = PacketBuilder::new();
        builder.add_bytes(&vec![0u8; MAX_PACKET_LEN - 3]);
        assert_eq!(builder.build(true), Err(PacketError::TooLarge(MAX_PACKET_LEN + 1)));
        assert!(builder.build(false).is_ok());
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let mut builder = PacketBuilder::new();
        builder.add_bytes(b"hello");
        let mut frame = builder.build(true).unwrap().to_vec();

        frame[3] ^= 0x01;
        assert!(matches!(Packet::decode(&frame, true), Err(PacketError::CrcMismatch { .. })));
        assert!(matches!(
            Packet::decode(&frame[..frame.len() - 1], true),
            Err(PacketError::SizeMismatch { .. })
        ));
        assert_eq!(Packet::decode(&[0x02], false), Err(PacketError::Truncated(1)));
    }

    #[test]
    fn test_growth_preserves_bytes() {
        let mut builder = PacketBuilder::with_capacity(4);
        assert_eq!(builder.capacity(), 4);

        builder.add_byte(0xAB);
        assert_eq!(builder.capacity(), 8);
        builder.add_bytes(&[0xCD; 20]);
        assert_eq!(builder.capacity(), 25);
        builder.add_little_endian(0x0102_0304, 4);

        let packet = builder.build(false).unwrap();
        assert_eq!(packet[2], 0xAB);
        assert!(packet[3..23].iter().all(|&b| b == 0xCD));
        assert_eq!(&packet[23..], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_reset_reuses_buffer() {
        let mut builder = PacketBuilder::new();
        builder.add_bytes(&[0x11; 100]);
        let capacity = builder.capacity();

        builder.reset().add_command(GbaCommand::EraseChip);
        assert_eq!(builder.payload_len(), 1);
        assert_eq!(builder.capacity(), capacity);
        assert_eq!(builder.build(false).unwrap(), &[3, 0, 0xF1]);
    }

    #[test]
    fn test_build_is_repeatable() {
        let mut builder = PacketBuilder::command(GbaCommand::RamRead);
        builder.add_address(0x10);
        let first = builder.build(true).unwrap().to_vec();
        let second = builder.build(true).unwrap().to_vec();
        assert_eq!(first, second);
        assert_eq!(builder.payload_len(), 5);
    }

    #[test]
    fn test_wide_little_endian() {
        let mut builder = PacketBuilder::new();
        builder.add_little_endian(0xAABB, 10);
        let packet = builder.build(false).unwrap();
        assert_eq!(&packet[2..], &[0xBB, 0xAA, 0, 0, 0, 0, 0, 0, 0, 0]);
    }
}
