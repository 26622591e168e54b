//! Core of the programmer link
//!
//! This module provides:
//! - Wire protocol (opcodes, CRC-16/Modbus, packet framing, flash ids)
//! - Native and stream transports behind one device handle
//! - Timeout-bounded packet I/O
//! - Port filtering and connection management
//! - Single-packet programmer requests

pub mod adapter;
pub mod commands;
pub mod connection;
pub mod port_filter;
pub mod protocol;
pub mod transport;
