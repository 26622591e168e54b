//! Stream backend on top of `tokio-serial`
//!
//! [`UsbPortPrompt`] stands in for the host permission prompt: it grants the
//! first USB serial port that passes the filters. The granted
//! [`TokioSerialPort`] opens into a [`StreamConnection`] whose readable and
//! writable halves share one `SerialStream`.

use super::stream::{LineControl, PortPrompt, StreamConnection, StreamPort, StreamPortInfo, UsbFilter};
use super::{LineSettings, LinkError, LinkResult, SerialFlowControl, SerialParity, SerialSignals};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_serial::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialPortType,
    SerialStream, StopBits,
};
use tracing::{debug, info};

/// A `SerialStream` shared between the readable half, the writable half and
/// line control
#[derive(Clone)]
struct SharedStream(Arc<Mutex<SerialStream>>);

impl AsyncRead for SharedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut stream = self.0.lock();
        Pin::new(&mut *stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SharedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut stream = self.0.lock();
        Pin::new(&mut *stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut stream = self.0.lock();
        Pin::new(&mut *stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut stream = self.0.lock();
        Pin::new(&mut *stream).poll_shutdown(cx)
    }
}

#[async_trait]
impl LineControl for SharedStream {
    async fn set_signals(&self, signals: SerialSignals) -> LinkResult<()> {
        let mut stream = self.0.lock();
        if let Some(dtr) = signals.data_terminal_ready {
            stream
                .write_data_terminal_ready(dtr)
                .map_err(|e| LinkError::Io(e.into()))?;
        }
        if let Some(rts) = signals.request_to_send {
            stream
                .write_request_to_send(rts)
                .map_err(|e| LinkError::Io(e.into()))?;
        }
        Ok(())
    }

    async fn close(&self) -> LinkResult<()> {
        let stream = self.0.lock();
        if let Err(e) = stream.clear(ClearBuffer::All) {
            debug!("Failed to clear port buffers on close: {}", e);
        }
        Ok(())
    }
}

/// A serial port granted by [`UsbPortPrompt`]
#[derive(Debug, Clone)]
pub struct TokioSerialPort {
    path: String,
    info: StreamPortInfo,
}

impl TokioSerialPort {
    /// Port at `path` with the given USB identity
    pub fn new(path: impl Into<String>, info: StreamPortInfo) -> Self {
        Self {
            path: path.into(),
            info,
        }
    }

    /// Device path
    pub fn path(&self) -> &str {
        &self.path
    }
}

fn open_stream(path: &str, settings: &LineSettings) -> LinkResult<SerialStream> {
    let data_bits = match settings.data_bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    };
    let stop_bits = if settings.stop_bits == 2 {
        StopBits::Two
    } else {
        StopBits::One
    };
    let parity = match settings.parity {
        SerialParity::None => Parity::None,
        SerialParity::Odd => Parity::Odd,
        SerialParity::Even => Parity::Even,
    };
    let flow_control = match settings.flow_control {
        SerialFlowControl::None => FlowControl::None,
        SerialFlowControl::Hardware => FlowControl::Hardware,
        SerialFlowControl::Software => FlowControl::Software,
    };

    tokio_serial::new(path, settings.baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control)
        .open_native_async()
        .map_err(|e| match e.kind() {
            tokio_serial::ErrorKind::NoDevice => LinkError::PortNotFound(path.to_string()),
            tokio_serial::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
                LinkError::PermissionDenied(path.to_string())
            }
            _ => LinkError::ConnectionFailed(e.to_string()),
        })
}

#[async_trait]
impl StreamPort for TokioSerialPort {
    fn info(&self) -> StreamPortInfo {
        self.info
    }

    async fn open(self: Box<Self>, settings: &LineSettings) -> LinkResult<StreamConnection> {
        let stream = open_stream(&self.path, settings)?;
        info!("Opened stream port {} @ {}", self.path, settings);

        let shared = SharedStream(Arc::new(Mutex::new(stream)));
        Ok(StreamConnection::new(
            self.info,
            Box::new(shared.clone()),
            Box::new(shared.clone()),
            Box::new(shared),
        ))
    }
}

/// Grants the first USB serial port matching any filter; with no filters the
/// first USB port wins
#[derive(Debug, Clone, Default)]
pub struct UsbPortPrompt;

impl UsbPortPrompt {
    /// Create a prompt
    pub fn new() -> Self {
        Self
    }
}

fn grant(ports: Vec<tokio_serial::SerialPortInfo>, filters: &[UsbFilter]) -> Option<TokioSerialPort> {
    ports.into_iter().find_map(|port| match port.port_type {
        SerialPortType::UsbPort(usb)
            if filters.is_empty() || filters.iter().any(|f| f.matches(usb.vid, usb.pid)) =>
        {
            Some(TokioSerialPort::new(
                port.port_name,
                StreamPortInfo {
                    usb_vendor_id: Some(usb.vid),
                    usb_product_id: Some(usb.pid),
                },
            ))
        }
        _ => None,
    })
}

#[async_trait]
impl PortPrompt for UsbPortPrompt {
    async fn request_port(&self, filters: &[UsbFilter]) -> LinkResult<Option<Box<dyn StreamPort>>> {
        let ports = tokio::task::spawn_blocking(tokio_serial::available_ports)
            .await
            .map_err(|e| LinkError::Transport(format!("blocking task failed: {}", e)))?
            .map_err(|e| LinkError::Io(e.into()))?;

        match grant(ports, filters) {
            Some(port) => {
                debug!("Granted {} for {:?}", port.path(), filters);
                Ok(Some(Box::new(port)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb(name: &str, vid: u16, pid: u16) -> tokio_serial::SerialPortInfo {
        tokio_serial::SerialPortInfo {
            port_name: name.into(),
            port_type: SerialPortType::UsbPort(tokio_serial::UsbPortInfo {
                vid,
                pid,
                serial_number: None,
                manufacturer: None,
                product: None,
            }),
        }
    }

    #[test]
    fn test_grant_matches_filter() {
        let ports = vec![
            tokio_serial::SerialPortInfo {
                port_name: "/dev/ttyS0".into(),
                port_type: SerialPortType::Unknown,
            },
            usb("/dev/ttyUSB0", 0x1a86, 0x7523),
            usb("/dev/ttyACM0", 0x0483, 0x0721),
        ];
        let filters = [UsbFilter {
            usb_vendor_id: 0x0483,
            usb_product_id: Some(0x0721),
        }];

        let port = grant(ports, &filters).unwrap();
        assert_eq!(port.path(), "/dev/ttyACM0");
        assert_eq!(port.info().usb_product_id, Some(0x0721));
    }

    #[test]
    fn test_grant_without_filters_takes_first_usb() {
        let ports = vec![usb("/dev/ttyUSB0", 0x1a86, 0x7523), usb("/dev/ttyACM0", 0x0483, 0x0721)];
        assert_eq!(grant(ports, &[]).unwrap().path(), "/dev/ttyUSB0");
    }

    #[test]
    fn test_grant_declines() {
        let filters = [UsbFilter {
            usb_vendor_id: 0x2341,
            usb_product_id: None,
        }];
        assert!(grant(vec![usb("/dev/ttyUSB0", 0x1a86, 0x7523)], &filters).is_none());
    }
}
