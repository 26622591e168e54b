//! Transport layer for the programmer link
//!
//! Two transports reach the same device:
//! - Native: a serial port owned by a host backend, delivering received
//!   bytes as events
//! - Stream: a readable/writable byte-stream pair granted through a host
//!   permission prompt
//!
//! A [`DeviceHandle`] holds exactly one of them at a time.

mod native;
mod serial;
mod serial_stream;
mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use native::{
    event_channel, DataListener, EventSink, NativeBackend, NativeConnection, NativePort,
    PortEvent, PortEvents,
};
#[cfg(test)]
pub(crate) use native::MockNativeBackend;
pub use serial::SerialportBackend;
pub use serial_stream::{TokioSerialPort, UsbPortPrompt};
pub use stream::{
    BoxedReader, BoxedWriter, LineControl, PortPrompt, StreamConnection, StreamPort,
    StreamPortInfo, UsbFilter,
};

use crate::core::protocol::PacketError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Link error types
#[derive(Error, Debug)]
pub enum LinkError {
    /// Handle holds no live transport
    #[error("Serial port not properly initialized")]
    TransportNotInitialized,

    /// Write did not settle in time
    #[error("Send package timeout in {0}ms")]
    SendTimeout(u64),

    /// Nothing (or, on the native transport, not enough) arrived in time
    #[error("Read package timeout in {0}ms")]
    ReceiveTimeout(u64),

    /// No port matched the filter
    #[error("No serial port matched the device filter")]
    NoPortFound,

    /// The permission prompt was dismissed
    #[error("No serial port selected")]
    NoPortSelected,

    /// Another read is in flight on this handle
    #[error("Readable stream is locked by another reader")]
    ReaderLocked,

    /// Another write is in flight on this handle
    #[error("Writable stream is locked by another writer")]
    WriterLocked,

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port closed underneath us
    #[error("Disconnected")]
    Disconnected,

    /// Error reported by the transport backend
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reply shorter than the command requires
    #[error("Short response: expected {expected} bytes, got {got}")]
    ShortResponse {
        /// Bytes the command needs
        expected: usize,
        /// Bytes received
        got: usize,
    },

    /// Device answered with something other than ACK
    #[error("{command} rejected (address 0x{address:08x})")]
    CommandRejected {
        /// Command that failed
        command: String,
        /// Bus address of the request
        address: u32,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Request could not be framed
    #[error("Invalid packet: {0}")]
    Packet(#[from] PacketError),
}

impl LinkError {
    /// Timeouts may be retried by re-issuing the whole command
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::SendTimeout(_) | Self::ReceiveTimeout(_))
    }
}

/// Result alias for link operations
pub type LinkResult<T> = Result<T, LinkError>;

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Line parameters used when opening a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
}

impl LineSettings {
    /// The programmer's fixed parameters: 9600 baud, 8N1, no flow control
    pub const fn programmer() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
        }
    }
}

impl Default for LineSettings {
    fn default() -> Self {
        Self::programmer()
    }
}

impl fmt::Display for LineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} baud ({}{}{} {})",
            self.baud_rate,
            self.data_bits,
            match self.parity {
                SerialParity::None => "N",
                SerialParity::Odd => "O",
                SerialParity::Even => "E",
            },
            self.stop_bits,
            match self.flow_control {
                SerialFlowControl::None => "No FC",
                SerialFlowControl::Hardware => "HW FC",
                SerialFlowControl::Software => "SW FC",
            }
        )
    }
}

/// DTR/RTS output line request; `None` leaves a line unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SerialSignals {
    /// Data Terminal Ready
    pub data_terminal_ready: Option<bool>,
    /// Request To Send
    pub request_to_send: Option<bool>,
}

impl SerialSignals {
    /// Drive DTR and RTS to the same level
    pub fn both(state: bool) -> Self {
        Self {
            data_terminal_ready: Some(state),
            request_to_send: Some(state),
        }
    }
}

/// A port reported by the native backend
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortDescriptor {
    /// Port path (e.g., COM3, /dev/ttyACM0)
    pub path: String,
    /// USB vendor id as 4 hex digits
    pub vendor_id: Option<String>,
    /// USB product id as 4 hex digits
    pub product_id: Option<String>,
    /// Manufacturer string
    pub manufacturer: Option<String>,
    /// Serial number
    pub serial_number: Option<String>,
}

impl PortDescriptor {
    /// Descriptor with only a path
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the USB ids, formatted the way hosts report them
    #[must_use]
    pub fn usb(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = Some(format!("{:04x}", vendor_id));
        self.product_id = Some(format!("{:04x}", product_id));
        self
    }

    /// Set the manufacturer string
    #[must_use]
    pub fn manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }
}

/// The live transport of a connected device
pub enum Link {
    /// Host-owned port with event delivery
    Native(NativeConnection),
    /// Byte-stream pair
    Stream(StreamConnection),
}

/// Summary of what a handle is connected through
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DeviceInfo {
    /// Native backend connection
    NativeSerial {
        /// Backend connection id
        id: String,
    },
    /// Stream port
    WebSerial {
        /// USB vendor id, if the port exposes one
        usb_vendor_id: Option<u16>,
        /// USB product id, if the port exposes one
        usb_product_id: Option<u16>,
    },
}

/// Exclusive owner of a device connection.
///
/// Holds at most one live [`Link`]; after [`DeviceHandle::take`] (or a
/// disconnect) the handle is empty for good.
#[derive(Default)]
pub struct DeviceHandle {
    link: Option<Link>,
}

impl DeviceHandle {
    /// Handle over a native connection
    pub fn native(connection: NativeConnection) -> Self {
        Self {
            link: Some(Link::Native(connection)),
        }
    }

    /// Handle over a stream connection
    pub fn stream(connection: StreamConnection) -> Self {
        Self {
            link: Some(Link::Stream(connection)),
        }
    }

    /// Live transport, or `TransportNotInitialized`
    pub fn link(&self) -> LinkResult<&Link> {
        self.link.as_ref().ok_or(LinkError::TransportNotInitialized)
    }

    /// Detach the transport, leaving the handle empty
    pub fn take(&mut self) -> Option<Link> {
        self.link.take()
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Describe the live transport
    pub fn info(&self) -> Option<DeviceInfo> {
        match self.link.as_ref()? {
            Link::Native(conn) => Some(DeviceInfo::NativeSerial {
                id: conn.id().to_string(),
            }),
            Link::Stream(conn) => {
                let info = conn.info();
                Some(DeviceInfo::WebSerial {
                    usb_vendor_id: info.usb_vendor_id,
                    usb_product_id: info.usb_product_id,
                })
            }
        }
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle").field("info", &self.info()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_programmer_line_settings() {
        let settings = LineSettings::default();
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.to_string(), "9600 baud (8N1 No FC)");
    }

    #[test]
    fn test_empty_handle() {
        let mut handle = DeviceHandle::default();
        assert!(!handle.is_connected());
        assert!(handle.info().is_none());
        assert!(matches!(handle.link(), Err(LinkError::TransportNotInitialized)));
        assert!(handle.take().is_none());
    }

    #[test]
    fn test_descriptor_usb_ids() {
        let port = PortDescriptor::new("/dev/ttyACM0").usb(0x0483, 0x0721);
        assert_eq!(port.vendor_id.as_deref(), Some("0483"));
        assert_eq!(port.product_id.as_deref(), Some("0721"));
    }

    #[test]
    fn test_device_info_json() {
        let info = DeviceInfo::NativeSerial { id: "COM3_1".into() };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "native-serial");
        assert_eq!(json["id"], "COM3_1");
    }
}
