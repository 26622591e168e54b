//! Programmer opcodes
//!
//! Every request starts with a single command byte. GBA-class and GBC-class
//! commands are two disjoint sets; [`Command`] wraps either one.

use std::fmt;

/// Commands addressing a GBA cartridge (ROM on the 16-bit bus, SRAM/FRAM on the 8-bit bus)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GbaCommand {
    /// Read the flash JEDEC/CFI id
    ReadId = 0xF0,
    /// Full chip erase
    EraseChip = 0xF1,
    /// Block erase
    BlockErase = 0xF2,
    /// Sector erase
    SectorErase = 0xF3,
    /// Buffered program
    Program = 0xF4,
    /// Raw bus write
    DirectWrite = 0xF5,
    /// ROM read
    Read = 0xF6,
    /// SRAM write
    RamWrite = 0xF7,
    /// SRAM read
    RamRead = 0xF8,
    /// Write to a flash-backed save chip
    RamWriteToFlash = 0xF9,
    /// FRAM write
    FramWrite = 0xE7,
    /// FRAM read
    FramRead = 0xE8,
}

/// Commands addressing a GB/GBC cartridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GbcCommand {
    /// Cartridge power switch
    CartPower = 0xA0,
    /// PHI clock divider
    CartPhiDiv = 0xA1,
    /// Raw bus write
    DirectWrite = 0xFA,
    /// Bus read
    Read = 0xFB,
    /// Buffered ROM program
    RomProgram = 0xFC,
    /// FRAM write
    FramWrite = 0xEA,
    /// FRAM read
    FramRead = 0xEB,
}

impl GbaCommand {
    /// All GBA opcodes
    pub fn all() -> &'static [GbaCommand] {
        &[
            GbaCommand::ReadId,
            GbaCommand::EraseChip,
            GbaCommand::BlockErase,
            GbaCommand::SectorErase,
            GbaCommand::Program,
            GbaCommand::DirectWrite,
            GbaCommand::Read,
            GbaCommand::RamWrite,
            GbaCommand::RamRead,
            GbaCommand::RamWriteToFlash,
            GbaCommand::FramWrite,
            GbaCommand::FramRead,
        ]
    }

    /// Opcode byte
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Get name of command
    pub fn name(self) -> &'static str {
        match self {
            GbaCommand::ReadId => "READ_ID",
            GbaCommand::EraseChip => "ERASE_CHIP",
            GbaCommand::BlockErase => "BLOCK_ERASE",
            GbaCommand::SectorErase => "SECTOR_ERASE",
            GbaCommand::Program => "PROGRAM",
            GbaCommand::DirectWrite => "DIRECT_WRITE",
            GbaCommand::Read => "READ",
            GbaCommand::RamWrite => "RAM_WRITE",
            GbaCommand::RamRead => "RAM_READ",
            GbaCommand::RamWriteToFlash => "RAM_WRITE_TO_FLASH",
            GbaCommand::FramWrite => "FRAM_WRITE",
            GbaCommand::FramRead => "FRAM_READ",
        }
    }
}

impl GbcCommand {
    /// All GBC opcodes
    pub fn all() -> &'static [GbcCommand] {
        &[
            GbcCommand::CartPower,
            GbcCommand::CartPhiDiv,
            GbcCommand::DirectWrite,
            GbcCommand::Read,
            GbcCommand::RomProgram,
            GbcCommand::FramWrite,
            GbcCommand::FramRead,
        ]
    }

    /// Opcode byte
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Get name of command
    pub fn name(self) -> &'static str {
        match self {
            GbcCommand::CartPower => "CART_POWER",
            GbcCommand::CartPhiDiv => "CART_PHI_DIV",
            GbcCommand::DirectWrite => "DIRECT_WRITE",
            GbcCommand::Read => "READ",
            GbcCommand::RomProgram => "ROM_PROGRAM",
            GbcCommand::FramWrite => "FRAM_WRITE",
            GbcCommand::FramRead => "FRAM_READ",
        }
    }
}

/// A protocol opcode from either command set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// GBA-class command
    Gba(GbaCommand),
    /// GBC-class command
    Gbc(GbcCommand),
}

impl Command {
    /// Opcode byte
    pub fn code(self) -> u8 {
        match self {
            Command::Gba(cmd) => cmd.code(),
            Command::Gbc(cmd) => cmd.code(),
        }
    }

    /// Look up an opcode byte in both sets
    pub fn from_code(code: u8) -> Option<Self> {
        GbaCommand::all()
            .iter()
            .copied()
            .map(Command::Gba)
            .chain(GbcCommand::all().iter().copied().map(Command::Gbc))
            .find(|cmd| cmd.code() == code)
    }
}

impl From<GbaCommand> for Command {
    fn from(cmd: GbaCommand) -> Self {
        Command::Gba(cmd)
    }
}

impl From<GbcCommand> for Command {
    fn from(cmd: GbcCommand) -> Self {
        Command::Gbc(cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Gba(cmd) => write!(f, "GBA {} (0x{:02x})", cmd.name(), cmd.code()),
            Command::Gbc(cmd) => write!(f, "GBC {} (0x{:02x})", cmd.name(), cmd.code()),
        }
    }
}
