//! Stream transport: a port granted by a host permission prompt and exposed
//! as a readable/writable byte-stream pair

use super::{LineSettings, LinkError, LinkResult, SerialSignals};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Readable half of a stream port
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writable half of a stream port
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// USB id filter understood by the permission prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsbFilter {
    /// USB vendor id
    pub usb_vendor_id: u16,
    /// USB product id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usb_product_id: Option<u16>,
}

impl UsbFilter {
    /// Whether a port with these ids passes the filter
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.usb_vendor_id == vendor_id
            && self.usb_product_id.map_or(true, |pid| pid == product_id)
    }
}

/// Identity a stream port exposes before and after opening
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamPortInfo {
    /// USB vendor id
    pub usb_vendor_id: Option<u16>,
    /// USB product id
    pub usb_product_id: Option<u16>,
}

/// Output-line control and shutdown for an open stream port
#[async_trait]
pub trait LineControl: Send + Sync {
    /// Drive DTR/RTS
    async fn set_signals(&self, signals: SerialSignals) -> LinkResult<()>;

    /// Release the port
    async fn close(&self) -> LinkResult<()>;
}

/// A port the user granted access to, not yet opened
#[async_trait]
pub trait StreamPort: Send {
    /// USB identity of the port
    fn info(&self) -> StreamPortInfo;

    /// Open with the given line parameters
    async fn open(self: Box<Self>, settings: &LineSettings) -> LinkResult<StreamConnection>;
}

/// Host permission prompt
#[async_trait]
pub trait PortPrompt: Send + Sync {
    /// Ask for a port matching any of `filters`; `None` if the user declined
    async fn request_port(&self, filters: &[UsbFilter]) -> LinkResult<Option<Box<dyn StreamPort>>>;
}

/// An open stream port.
///
/// Each half sits behind its own lock so at most one reader and one writer
/// are active; a second acquisition fails instead of waiting.
pub struct StreamConnection {
    info: StreamPortInfo,
    readable: Mutex<BoxedReader>,
    writable: Mutex<BoxedWriter>,
    control: Box<dyn LineControl>,
}

impl StreamConnection {
    /// Assemble a connection from an opened port's parts
    pub fn new(
        info: StreamPortInfo,
        readable: BoxedReader,
        writable: BoxedWriter,
        control: Box<dyn LineControl>,
    ) -> Self {
        Self {
            info,
            readable: Mutex::new(readable),
            writable: Mutex::new(writable),
            control,
        }
    }

    /// USB identity of the port
    pub fn info(&self) -> StreamPortInfo {
        self.info
    }

    /// Take the reader lock
    pub fn reader(&self) -> LinkResult<MutexGuard<'_, BoxedReader>> {
        self.readable.try_lock().map_err(|_| LinkError::ReaderLocked)
    }

    /// Take the writer lock
    pub fn writer(&self) -> LinkResult<MutexGuard<'_, BoxedWriter>> {
        self.writable.try_lock().map_err(|_| LinkError::WriterLocked)
    }

    /// Drive DTR/RTS
    pub async fn set_signals(&self, signals: SerialSignals) -> LinkResult<()> {
        self.control.set_signals(signals).await
    }

    /// Shut the writable side down and release the port
    pub async fn close(&self) -> LinkResult<()> {
        {
            let mut writer = self.writer()?;
            if let Err(e) = writer.shutdown().await {
                debug!("Writable shutdown failed: {}", e);
            }
        }
        self.control.close().await
    }
}
