//! Native transport: a host-owned serial port that pushes events
//!
//! The backend's pump feeds [`PortEvent`]s into a bounded channel through an
//! [`EventSink`]. Every event is queued, including ones that arrive before a
//! [`DataListener`] registers. Stale bytes are discarded when the next
//! request is written and when a listener is released, so they never leak
//! into a later reply.

use super::{LineSettings, LinkError, LinkResult, PortDescriptor, SerialSignals};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Something the port reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// Bytes received
    Data(Bytes),
    /// Backend-side error
    Error(String),
    /// Port closed by the backend
    Closed,
}

#[derive(Debug, Default)]
struct ListenerState {
    listening: AtomicBool,
    closed: AtomicBool,
}

/// Producer half of a port's event channel, owned by the backend pump
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<PortEvent>,
    state: Arc<ListenerState>,
}

/// Consumer half of a port's event channel, owned by the connection
#[derive(Debug)]
pub struct PortEvents {
    rx: Mutex<mpsc::Receiver<PortEvent>>,
    state: Arc<ListenerState>,
}

/// Create a connected sink/events pair holding at most `capacity` queued events
pub fn event_channel(capacity: usize) -> (EventSink, PortEvents) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let state = Arc::new(ListenerState::default());
    (
        EventSink {
            tx,
            state: state.clone(),
        },
        PortEvents {
            rx: Mutex::new(rx),
            state,
        },
    )
}

impl EventSink {
    fn mark(&self, event: &PortEvent) {
        if matches!(event, PortEvent::Closed) {
            self.state.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Queue without waiting while nobody listens; a full queue between
    /// requests only holds stale bytes
    fn offer(&self, event: PortEvent) -> Result<bool, PortEvent> {
        if self.has_listener() {
            return Err(event);
        }
        match self.tx.try_send(event) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(event)) => {
                warn!("Event queue full, dropping {:?}", event);
                Ok(true)
            }
            Err(TrySendError::Closed(_)) => Ok(false),
        }
    }

    /// Deliver an event from async code.
    ///
    /// Returns `false` once the consumer is gone.
    pub async fn emit(&self, event: PortEvent) -> bool {
        self.mark(&event);
        match self.offer(event) {
            Ok(delivered) => delivered,
            Err(event) => self.tx.send(event).await.is_ok(),
        }
    }

    /// Deliver an event from a blocking pump thread
    pub fn blocking_emit(&self, event: PortEvent) -> bool {
        self.mark(&event);
        match self.offer(event) {
            Ok(delivered) => delivered,
            Err(event) => self.tx.blocking_send(event).is_ok(),
        }
    }

    /// Whether a listener is currently registered
    pub fn has_listener(&self) -> bool {
        self.state.listening.load(Ordering::SeqCst)
    }
}

impl PortEvents {
    /// Register the single data listener.
    ///
    /// Events queued since the last [`discard_stale`](Self::discard_stale)
    /// are delivered. Fails with `ReaderLocked` if another listener is
    /// active and with `Disconnected` if the port already reported closing.
    pub fn listen(&self) -> LinkResult<DataListener<'_>> {
        let rx = self.rx.try_lock().map_err(|_| LinkError::ReaderLocked)?;
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Disconnected);
        }

        self.state.listening.store(true, Ordering::SeqCst);
        Ok(DataListener {
            rx,
            state: &self.state,
        })
    }

    /// Drop events left over from earlier requests; a no-op while a
    /// listener is registered. A dropped `Closed` is still remembered by the
    /// port state.
    pub fn discard_stale(&self) {
        if let Ok(mut rx) = self.rx.try_lock() {
            drain(&mut rx);
        }
    }
}

fn drain(rx: &mut mpsc::Receiver<PortEvent>) {
    let mut dropped = 0usize;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!("Discarded {} stale port events", dropped);
    }
}

/// Registered data listener; unregisters and drains the channel on drop
pub struct DataListener<'a> {
    rx: MutexGuard<'a, mpsc::Receiver<PortEvent>>,
    state: &'a ListenerState,
}

impl DataListener<'_> {
    /// Next event, or `None` when the backend pump has gone away
    pub async fn recv(&mut self) -> Option<PortEvent> {
        self.rx.recv().await
    }
}

impl Drop for DataListener<'_> {
    fn drop(&mut self) {
        self.state.listening.store(false, Ordering::SeqCst);
        drain(&mut self.rx);
    }
}

/// Port operations exposed by the host backend
#[async_trait]
pub trait NativePort: Send + Sync {
    /// Write the whole buffer; resolves once the backend acknowledged it
    async fn write(&self, data: &[u8]) -> LinkResult<()>;

    /// Drive DTR/RTS
    async fn set_signals(&self, signals: SerialSignals) -> LinkResult<()>;

    /// Close the port
    async fn close(&self) -> LinkResult<()>;
}

/// Host backend that enumerates and opens native ports
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NativeBackend: Send + Sync {
    /// List every port the host can see
    async fn list_ports(&self) -> LinkResult<Vec<PortDescriptor>>;

    /// Open `path` with the given line parameters
    async fn open(&self, path: &str, settings: &LineSettings) -> LinkResult<NativeConnection>;
}

/// An open native port
pub struct NativeConnection {
    id: String,
    port: Box<dyn NativePort>,
    events: PortEvents,
    write_lock: Mutex<()>,
}

impl NativeConnection {
    /// Assemble a connection from a backend port and its event stream
    pub fn new(id: impl Into<String>, port: Box<dyn NativePort>, events: PortEvents) -> Self {
        Self {
            id: id.into(),
            port,
            events,
            write_lock: Mutex::new(()),
        }
    }

    /// Backend connection id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Write one buffer; only one write may be in flight.
    ///
    /// Anything queued before the write belongs to an earlier exchange and
    /// is discarded first.
    pub async fn write(&self, data: &[u8]) -> LinkResult<()> {
        let _writer = self.write_lock.try_lock().map_err(|_| LinkError::WriterLocked)?;
        self.events.discard_stale();
        self.port.write(data).await
    }

    /// Register the data listener
    pub fn listen(&self) -> LinkResult<DataListener<'_>> {
        self.events.listen()
    }

    /// Drive DTR/RTS
    pub async fn set_signals(&self, signals: SerialSignals) -> LinkResult<()> {
        self.port.set_signals(signals).await
    }

    /// Close the backend port
    pub async fn close(&self) -> LinkResult<()> {
        self.port.close().await
    }
}
