//! Device discovery, connection and teardown
//!
//! [`ConnectionManager`] is built once per application with the backend it
//! talks to and passed to whoever needs a device.

use crate::config::LinkSettings;
use crate::core::adapter::ProtocolAdapter;
use crate::core::port_filter::PortFilter;
use crate::core::transport::{
    DeviceHandle, DeviceInfo, LineSettings, LinkError, LinkResult, NativeBackend, PortDescriptor,
    PortPrompt, SerialSignals,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Which host facility provides ports
#[derive(Clone)]
pub enum Backend {
    /// Native serial backend that lists and opens ports by path
    Native(Arc<dyn NativeBackend>),
    /// Permission prompt that grants stream ports
    Stream(Arc<dyn PortPrompt>),
}

impl Backend {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Native(_) => "native",
            Backend::Stream(_) => "stream",
        }
    }
}

/// Outcome of a connection request
#[derive(Debug)]
pub enum DeviceRequest {
    /// Exactly one port matched and was opened
    Connected(DeviceHandle),
    /// Several ports matched; the caller picks one and calls
    /// [`ConnectionManager::connect_with_selected_port`]
    SelectionRequired(Vec<PortDescriptor>),
}

/// Connects to the programmer through one backend
pub struct ConnectionManager {
    backend: Backend,
    line: LineSettings,
    reset_delay: Duration,
    adapter: ProtocolAdapter,
}

impl ConnectionManager {
    /// Manager over `backend` using the fixed programmer line parameters
    pub fn new(backend: Backend, settings: &LinkSettings) -> Self {
        Self {
            backend,
            line: LineSettings::programmer(),
            reset_delay: settings.reset_delay(),
            adapter: ProtocolAdapter::new(settings),
        }
    }

    /// Override the line parameters
    #[must_use]
    pub fn with_line_settings(mut self, line: LineSettings) -> Self {
        self.line = line;
        self
    }

    /// The backend in use
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Adapter for packet I/O on handles from this manager
    pub fn adapter(&self) -> &ProtocolAdapter {
        &self.adapter
    }

    /// Ports passing `filter`, in listing order (native backend only)
    pub async fn list_ports(&self, filter: &PortFilter) -> LinkResult<Vec<PortDescriptor>> {
        match &self.backend {
            Backend::Native(backend) => Ok(filter.apply(backend.list_ports().await?)),
            Backend::Stream(_) => Err(LinkError::InvalidConfiguration(
                "the stream backend cannot enumerate ports".into(),
            )),
        }
    }

    /// Find and open the device.
    ///
    /// On the native backend a single matching port is opened directly and
    /// several matches are handed back for selection. On the stream backend
    /// the prompt decides.
    pub async fn request_device(&self, filter: &PortFilter) -> LinkResult<DeviceRequest> {
        match &self.backend {
            Backend::Native(backend) => {
                let mut candidates = filter.apply(backend.list_ports().await?);
                debug!("{} port(s) match {:?}", candidates.len(), filter);

                match candidates.len() {
                    0 => Err(LinkError::NoPortFound),
                    1 => {
                        let port = candidates.remove(0);
                        let handle = self.open_native(backend.as_ref(), &port).await?;
                        Ok(DeviceRequest::Connected(handle))
                    }
                    _ => Ok(DeviceRequest::SelectionRequired(candidates)),
                }
            }
            Backend::Stream(prompt) => {
                let filters = filter.to_usb_filters();
                let port = prompt
                    .request_port(&filters)
                    .await?
                    .ok_or(LinkError::NoPortSelected)?;
                let conn = port.open(&self.line).await?;
                let handle = ProtocolAdapter::create_device_from_stream(conn);
                info!("Connected {:?}", handle.info());
                Ok(DeviceRequest::Connected(handle))
            }
        }
    }

    /// Open a port the user picked from a selection list
    pub async fn connect_with_selected_port(&self, port: &PortDescriptor) -> LinkResult<DeviceHandle> {
        match &self.backend {
            Backend::Native(backend) => self.open_native(backend.as_ref(), port).await,
            Backend::Stream(_) => Err(LinkError::InvalidConfiguration(
                "port selection requires the native backend".into(),
            )),
        }
    }

    async fn open_native(&self, backend: &dyn NativeBackend, port: &PortDescriptor) -> LinkResult<DeviceHandle> {
        let handle = ProtocolAdapter::create_device_from_port(backend, &port.path, &self.line).await?;
        info!("Connected {} via {:?}", port.path, handle.info());
        Ok(handle)
    }

    /// Reset the programmer: drop DTR/RTS, wait, raise them again
    pub async fn initialize_device(&self, handle: &DeviceHandle) -> LinkResult<()> {
        self.adapter
            .set_signals(handle, SerialSignals::both(false))
            .await?;
        tokio::time::sleep(self.reset_delay).await;
        self.adapter
            .set_signals(handle, SerialSignals::both(true))
            .await?;
        debug!("Reset pulse sent ({:?} low)", self.reset_delay);
        Ok(())
    }

    /// Close whatever the handle holds. Close failures are logged, and the
    /// handle is empty afterwards either way.
    pub async fn disconnect_device(&self, handle: &mut DeviceHandle) {
        if !handle.is_connected() {
            return;
        }
        let info = handle.info();
        match ProtocolAdapter::close_device(handle).await {
            Ok(()) => info!("Disconnected {:?}", info),
            Err(e) => error!("Error while closing {:?}: {}", info, e),
        }
    }

    /// Whether the handle holds a live transport
    pub fn is_device_connected(&self, handle: &DeviceHandle) -> bool {
        ProtocolAdapter::is_device_connected(handle)
    }

    /// Describe the handle's transport
    pub fn device_info(&self, handle: &DeviceHandle) -> Option<DeviceInfo> {
        ProtocolAdapter::device_info(handle)
    }
}
