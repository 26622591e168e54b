//! Checksum calculation algorithms
//!
//! The programmer protects every request payload with CRC-16/Modbus.
//! Two implementations are provided and must agree bit for bit: a direct
//! bit-shifting loop and a 256-entry lookup table built at compile time.
//! Framing uses the table.

/// Reflected CRC-16/Modbus polynomial (0x8005 bit-reversed)
pub const CRC16_MODBUS_POLY: u16 = 0xA001;

/// CRC-16/Modbus initial register value
pub const CRC16_MODBUS_INIT: u16 = 0xFFFF;

/// CRC-16/Modbus
/// Polynomial: 0x8005, Init: 0xFFFF, RefIn: true, RefOut: true, XorOut: 0x0000
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = CRC16_MODBUS_INIT;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC16_MODBUS_POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC16_MODBUS_POLY;
            } else {
                crc >>= 1;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC16_TABLE: [u16; 256] = build_crc16_table();

/// CRC-16/Modbus, one table lookup per byte
pub fn crc16_modbus_table(data: &[u8]) -> u16 {
    data.iter().fold(CRC16_MODBUS_INIT, |crc, &byte| {
        let index = ((crc ^ byte as u16) & 0xFF) as usize;
        (crc >> 8) ^ CRC16_TABLE[index]
    })
}
