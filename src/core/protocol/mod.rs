//! Programmer wire protocol
//!
//! Provides:
//! - Command opcodes (GBA and GBC sets)
//! - CRC-16/Modbus checksum
//! - Length-prefixed packet framing
//! - Flash chip id lookup

pub mod checksum;
pub mod command;
pub mod flash_id;
pub mod packet;

pub use checksum::{crc16_modbus, crc16_modbus_table};
pub use command::{Command, GbaCommand, GbcCommand};
pub use packet::{Packet, PacketBuilder, PacketError, CRC_LEN, MAX_PACKET_LEN, SIZE_FIELD_LEN};

/// Single-byte acknowledgement sent by the programmer on success
pub const ACK: u8 = 0xAA;
