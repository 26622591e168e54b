//! Single-packet programmer requests
//!
//! Each request frames one command with [`PacketBuilder`], sends it and reads
//! either a data reply (`[2 byte crc][data]`) or a one-byte ack. Multi-step
//! flash algorithms are built on top of these by callers.

use crate::core::adapter::{ProtocolAdapter, ReadMode};
use crate::core::protocol::{Command, GbaCommand, GbcCommand, PacketBuilder};
use crate::core::transport::{DeviceHandle, LinkError, LinkResult};
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// Length of the prefix in front of every data reply
pub const REPLY_PREFIX_LEN: usize = 2;

/// Length of the flash id returned by `rom_get_id`
pub const ROM_ID_LEN: usize = 8;

/// Request issuer bound to one device
#[derive(Debug, Clone, Copy)]
pub struct Programmer<'a> {
    adapter: &'a ProtocolAdapter,
    handle: &'a DeviceHandle,
    ack_timeout: Option<Duration>,
}

impl<'a> Programmer<'a> {
    /// Issue requests to `handle` through `adapter`
    pub fn new(adapter: &'a ProtocolAdapter, handle: &'a DeviceHandle) -> Self {
        Self {
            adapter,
            handle,
            ack_timeout: None,
        }
    }

    /// Wait this long for acks instead of the adapter's receive timeout
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = Some(timeout);
        self
    }

    async fn send(&self, packet: &mut PacketBuilder) -> LinkResult<()> {
        let frame = packet.build(true)?;
        self.adapter.send_package(self.handle, frame, None).await?;
        Ok(())
    }

    async fn expect_ack(&self, command: Command, address: u32) -> LinkResult<()> {
        self.expect_ack_within(command, address, self.ack_timeout).await
    }

    async fn expect_ack_within(
        &self,
        command: Command,
        address: u32,
        timeout: Option<Duration>,
    ) -> LinkResult<()> {
        if self.adapter.get_result(self.handle, timeout).await? {
            Ok(())
        } else {
            Err(LinkError::CommandRejected {
                command: command.to_string(),
                address,
            })
        }
    }

    async fn read_reply(&self, len: usize) -> LinkResult<Bytes> {
        let expected = REPLY_PREFIX_LEN + len;
        let reply = self
            .adapter
            .get_package(self.handle, expected, None, ReadMode::default())
            .await?;
        if reply.len() < expected {
            return Err(LinkError::ShortResponse {
                expected,
                got: reply.len(),
            });
        }
        Ok(reply.slice(REPLY_PREFIX_LEN..))
    }

    async fn read(&self, command: Command, address: u32, size: u16) -> LinkResult<Bytes> {
        let mut packet = PacketBuilder::command(command);
        packet.add_address(address).add_length(size);
        self.send(&mut packet).await?;
        let data = self.read_reply(usize::from(size)).await?;
        debug!("{} read {} bytes at {:#010x}", command, data.len(), address);
        Ok(data)
    }

    async fn write(&self, command: Command, address: u32, data: &[u8]) -> LinkResult<()> {
        let mut packet = PacketBuilder::command(command);
        packet.add_address(address).add_bytes(data);
        self.send(&mut packet).await?;
        self.expect_ack(command, address).await
    }

    async fn program(
        &self,
        command: Command,
        address: u32,
        buffer_size: u16,
        data: &[u8],
    ) -> LinkResult<()> {
        let mut packet = PacketBuilder::command(command);
        packet
            .add_address(address)
            .add_length(buffer_size)
            .add_bytes(data);
        self.send(&mut packet).await?;
        self.expect_ack(command, address).await
    }

    /// GBA: read the 8-byte flash id
    pub async fn rom_get_id(&self) -> LinkResult<Bytes> {
        let mut packet = PacketBuilder::command(GbaCommand::ReadId);
        self.send(&mut packet).await?;
        self.read_reply(ROM_ID_LEN).await
    }

    /// GBA: read `size` ROM bytes at `address`
    pub async fn rom_read(&self, address: u32, size: u16) -> LinkResult<Bytes> {
        self.read(GbaCommand::Read.into(), address, size).await
    }

    /// GBA: write bytes straight to the ROM bus
    pub async fn rom_write(&self, address: u32, data: &[u8]) -> LinkResult<()> {
        self.write(GbaCommand::DirectWrite.into(), address, data).await
    }

    /// GBA: program `data` through the flash write buffer
    pub async fn rom_program(&self, address: u32, buffer_size: u16, data: &[u8]) -> LinkResult<()> {
        self.program(GbaCommand::Program.into(), address, buffer_size, data)
            .await
    }

    /// GBA: erase the whole flash chip.
    ///
    /// The ack only arrives once the erase finished, so it is awaited for
    /// the adapter's operation timeout unless an ack timeout was set.
    pub async fn rom_erase_chip(&self) -> LinkResult<()> {
        let command = Command::from(GbaCommand::EraseChip);
        let mut packet = PacketBuilder::command(command);
        self.send(&mut packet).await?;

        let timeout = self.ack_timeout.unwrap_or(self.adapter.operation_timeout());
        self.expect_ack_within(command, 0, Some(timeout)).await
    }

    /// GBA: erase the sector containing `address`
    pub async fn rom_erase_sector(&self, address: u32) -> LinkResult<()> {
        let command = Command::from(GbaCommand::SectorErase);
        let mut packet = PacketBuilder::command(command);
        packet.add_address(address);
        self.send(&mut packet).await?;
        self.expect_ack(command, address).await
    }

    /// GBA: read `size` save-RAM bytes at `address`
    pub async fn ram_read(&self, address: u32, size: u16) -> LinkResult<Bytes> {
        self.read(GbaCommand::RamRead.into(), address, size).await
    }

    /// GBA: write save-RAM bytes
    pub async fn ram_write(&self, address: u32, data: &[u8]) -> LinkResult<()> {
        self.write(GbaCommand::RamWrite.into(), address, data).await
    }

    /// GBA: program save flash
    pub async fn ram_program_flash(&self, address: u32, data: &[u8]) -> LinkResult<()> {
        self.write(GbaCommand::RamWriteToFlash.into(), address, data)
            .await
    }

    /// GBC: read `size` bytes at `address`
    pub async fn gbc_read(&self, address: u32, size: u16) -> LinkResult<Bytes> {
        self.read(GbcCommand::Read.into(), address, size).await
    }

    /// GBC: write bytes straight to the bus
    pub async fn gbc_write(&self, address: u32, data: &[u8]) -> LinkResult<()> {
        self.write(GbcCommand::DirectWrite.into(), address, data).await
    }

    /// GBC: program `data` through the flash write buffer
    pub async fn gbc_rom_program(&self, address: u32, buffer_size: u16, data: &[u8]) -> LinkResult<()> {
        self.program(GbcCommand::RomProgram.into(), address, buffer_size, data)
            .await
    }
}
