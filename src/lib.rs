//! # ChisFlash link library
//!
//! Device link and framed protocol layer for a USB-serial flash-cartridge
//! programmer:
//! - Native serial ports (host backend with event delivery)
//! - Stream serial ports (readable/writable byte-stream pair)
//!
//! ## Features
//!
//! - CRC-16/Modbus framed packets
//! - Timeout-bounded send/receive with partial-data handling
//! - USB vendor/product port filters
//! - DTR/RTS reset pulse
//! - CLI with exit codes and JSON output
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chisflash_link::{Backend, ConnectionManager, DeviceRequest, LinkSettings, PortFilter, Programmer, SerialportBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = LinkSettings::load()?;
//!     let manager = ConnectionManager::new(Backend::Native(Arc::new(SerialportBackend::new())), &settings);
//!
//!     let DeviceRequest::Connected(mut handle) = manager.request_device(&PortFilter::beggar_socket()).await? else {
//!         anyhow::bail!("more than one programmer attached");
//!     };
//!     manager.initialize_device(&handle).await?;
//!
//!     let id = Programmer::new(manager.adapter(), &handle).rom_get_id().await?;
//!     println!("Flash id: {:02x?}", id);
//!
//!     manager.disconnect_device(&mut handle).await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{ExitCodes, OutputFormat};
pub use crate::config::{ConfigError, LinkSettings};
pub use crate::core::adapter::{PendingRead, ProtocolAdapter, ReadMode};
pub use crate::core::commands::Programmer;
pub use crate::core::connection::{Backend, ConnectionManager, DeviceRequest};
pub use crate::core::port_filter::{DeviceIdentifier, PortFilter};
pub use crate::core::protocol::{Command, GbaCommand, GbcCommand, Packet, PacketBuilder, PacketError, ACK};
pub use crate::core::transport::{
    DeviceHandle, DeviceInfo, LineSettings, LinkError, LinkResult, NativeBackend, PortDescriptor,
    PortPrompt, SerialSignals, SerialportBackend, UsbPortPrompt,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
