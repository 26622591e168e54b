//! Native backend on top of the `serialport` crate
//!
//! Each open port gets a pump thread that reads with a short timeout and
//! forwards received bytes as [`PortEvent`]s. Writes and line control run on
//! the blocking pool.

use super::native::{event_channel, EventSink, NativeBackend, NativeConnection, NativePort, PortEvent};
use super::{
    LineSettings, LinkError, LinkResult, PortDescriptor, SerialFlowControl, SerialParity,
    SerialSignals,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const PUMP_READ_TIMEOUT: Duration = Duration::from_millis(100);
const PUMP_BUFFER_SIZE: usize = 4096;

/// Native backend backed by the operating system's serial ports
#[derive(Debug, Clone)]
pub struct SerialportBackend {
    event_capacity: usize,
}

impl Default for SerialportBackend {
    fn default() -> Self {
        Self { event_capacity: 64 }
    }
}

impl SerialportBackend {
    /// Create a backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how many received chunks may queue before the pump waits
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

fn describe(info: serialport::SerialPortInfo) -> PortDescriptor {
    match info.port_type {
        SerialPortType::UsbPort(usb) => PortDescriptor {
            path: info.port_name,
            vendor_id: Some(format!("{:04x}", usb.vid)),
            product_id: Some(format!("{:04x}", usb.pid)),
            manufacturer: usb.manufacturer,
            serial_number: usb.serial_number,
        },
        _ => PortDescriptor::new(info.port_name),
    }
}

fn open_error(path: &str, e: serialport::Error) -> LinkError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => LinkError::PortNotFound(path.to_string()),
        serialport::ErrorKind::Io(io_kind) => match io_kind {
            std::io::ErrorKind::NotFound => LinkError::PortNotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => LinkError::PermissionDenied(path.to_string()),
            _ => LinkError::ConnectionFailed(e.to_string()),
        },
        _ => LinkError::ConnectionFailed(e.to_string()),
    }
}

fn control_error(e: serialport::Error) -> LinkError {
    LinkError::Io(e.into())
}

fn join_error(e: tokio::task::JoinError) -> LinkError {
    LinkError::Transport(format!("blocking task failed: {}", e))
}

fn builder(path: &str, settings: &LineSettings) -> serialport::SerialPortBuilder {
    let data_bits = match settings.data_bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    };

    let stop_bits = match settings.stop_bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    };

    let parity = match settings.parity {
        SerialParity::Odd => Parity::Odd,
        SerialParity::Even => Parity::Even,
        SerialParity::None => Parity::None,
    };

    let flow_control = match settings.flow_control {
        SerialFlowControl::Hardware => FlowControl::Hardware,
        SerialFlowControl::Software => FlowControl::Software,
        SerialFlowControl::None => FlowControl::None,
    };

    serialport::new(path, settings.baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control)
        .timeout(PUMP_READ_TIMEOUT)
}

fn spawn_pump(
    path: &str,
    mut reader: Box<dyn SerialPort>,
    sink: EventSink,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<()> {
    let name = path.to_string();
    std::thread::Builder::new()
        .name(format!("serial-pump {}", name))
        .spawn(move || {
            let mut buffer = [0u8; PUMP_BUFFER_SIZE];
            loop {
                if shutdown.load(Ordering::SeqCst) {
                    sink.blocking_emit(PortEvent::Closed);
                    break;
                }

                match reader.read(&mut buffer) {
                    Ok(0) => {
                        sink.blocking_emit(PortEvent::Closed);
                        break;
                    }
                    Ok(n) => {
                        if !sink.blocking_emit(PortEvent::Data(Bytes::copy_from_slice(&buffer[..n]))) {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        warn!("Read error on {}: {}", name, e);
                        sink.blocking_emit(PortEvent::Error(e.to_string()));
                        sink.blocking_emit(PortEvent::Closed);
                        break;
                    }
                }
            }
            debug!("Pump for {} stopped", name);
        })?;
    Ok(())
}

struct SerialportPort {
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    shutdown: Arc<AtomicBool>,
}

impl Drop for SerialportPort {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl NativePort for SerialportPort {
    async fn write(&self, data: &[u8]) -> LinkResult<()> {
        let port = self.port.clone();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut port = port.lock();
            port.write_all(&data)?;
            port.flush()
        })
        .await
        .map_err(join_error)??;
        Ok(())
    }

    async fn set_signals(&self, signals: SerialSignals) -> LinkResult<()> {
        let port = self.port.clone();
        tokio::task::spawn_blocking(move || -> LinkResult<()> {
            let mut port = port.lock();
            if let Some(dtr) = signals.data_terminal_ready {
                port.write_data_terminal_ready(dtr).map_err(control_error)?;
            }
            if let Some(rts) = signals.request_to_send {
                port.write_request_to_send(rts).map_err(control_error)?;
            }
            Ok(())
        })
        .await
        .map_err(join_error)?
    }

    async fn close(&self) -> LinkResult<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl NativeBackend for SerialportBackend {
    async fn list_ports(&self) -> LinkResult<Vec<PortDescriptor>> {
        let ports = tokio::task::spawn_blocking(serialport::available_ports)
            .await
            .map_err(join_error)?
            .map_err(control_error)?;
        Ok(ports.into_iter().map(describe).collect())
    }

    async fn open(&self, path: &str, settings: &LineSettings) -> LinkResult<NativeConnection> {
        let builder = builder(path, settings);
        let owned_path = path.to_string();
        let (port, reader) = tokio::task::spawn_blocking(move || {
            let port = builder.open().map_err(|e| open_error(&owned_path, e))?;
            let reader = port.try_clone().map_err(|e| open_error(&owned_path, e))?;
            Ok::<_, LinkError>((port, reader))
        })
        .await
        .map_err(join_error)??;

        let (sink, events) = event_channel(self.event_capacity);
        let shutdown = Arc::new(AtomicBool::new(false));
        spawn_pump(path, reader, sink, shutdown.clone())?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let id = format!("{}_{}", path, millis);
        info!("Opened {} @ {} as {}", path, settings, id);

        Ok(NativeConnection::new(
            id,
            Box::new(SerialportPort {
                port: Arc::new(Mutex::new(port)),
                shutdown,
            }),
            events,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_usb_port() {
        let info = serialport::SerialPortInfo {
            port_name: "/dev/ttyACM0".into(),
            port_type: SerialPortType::UsbPort(serialport::UsbPortInfo {
                vid: 0x0483,
                pid: 0x0721,
                serial_number: Some("0001".into()),
                manufacturer: Some("STMicroelectronics".into()),
                product: None,
            }),
        };

        let port = describe(info);
        assert_eq!(port.path, "/dev/ttyACM0");
        assert_eq!(port.vendor_id.as_deref(), Some("0483"));
        assert_eq!(port.product_id.as_deref(), Some("0721"));
        assert_eq!(port.manufacturer.as_deref(), Some("STMicroelectronics"));
    }

    #[test]
    fn test_describe_plain_port() {
        let info = serialport::SerialPortInfo {
            port_name: "/dev/ttyS0".into(),
            port_type: SerialPortType::Unknown,
        };
        assert_eq!(describe(info), PortDescriptor::new("/dev/ttyS0"));
    }

    #[test]
    fn test_open_error_mapping() {
        let missing = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone");
        assert!(matches!(open_error("COM9", missing), LinkError::PortNotFound(p) if p == "COM9"));

        let denied = serialport::Error::new(
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied),
            "denied",
        );
        assert!(matches!(open_error("COM9", denied), LinkError::PermissionDenied(_)));
    }
}
