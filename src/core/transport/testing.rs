//! In-memory transports for unit tests

use super::native::{event_channel, EventSink, NativeConnection, NativePort, PortEvent};
use super::stream::{LineControl, StreamConnection, StreamPortInfo};
use super::{LinkResult, SerialSignals};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Everything a fake transport was asked to do
#[derive(Debug, Default)]
pub struct Recorder {
    pub writes: Mutex<Vec<Vec<u8>>>,
    pub signals: Mutex<Vec<SerialSignals>>,
    pub closes: Mutex<usize>,
}

impl Recorder {
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    pub fn signals(&self) -> Vec<SerialSignals> {
        self.signals.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        *self.closes.lock()
    }
}

/// What a fake native port does when written to
pub enum OnWrite {
    /// Record and return
    Accept,
    /// Never finish
    Stall,
    /// Record, then push a reply before returning, like a fast device
    Reply(EventSink, Bytes),
}

pub struct FakeNativePort {
    pub recorder: Arc<Recorder>,
    pub fail_close: bool,
    pub on_write: OnWrite,
}

#[async_trait]
impl NativePort for FakeNativePort {
    async fn write(&self, data: &[u8]) -> LinkResult<()> {
        self.recorder.writes.lock().push(data.to_vec());
        match &self.on_write {
            OnWrite::Accept => {}
            OnWrite::Stall => std::future::pending::<()>().await,
            OnWrite::Reply(sink, reply) => {
                sink.emit(PortEvent::Data(reply.clone())).await;
            }
        }
        Ok(())
    }

    async fn set_signals(&self, signals: SerialSignals) -> LinkResult<()> {
        self.recorder.signals.lock().push(signals);
        Ok(())
    }

    async fn close(&self) -> LinkResult<()> {
        *self.recorder.closes.lock() += 1;
        if self.fail_close {
            return Err(super::LinkError::Transport("close failed".into()));
        }
        Ok(())
    }
}

/// Native connection over a fake port, plus the sink that feeds it
pub fn native_connection(id: &str) -> (NativeConnection, EventSink, Arc<Recorder>) {
    native_connection_with(id, |_| OnWrite::Accept)
}

/// Like [`native_connection`], with the write behaviour built from the sink
pub fn native_connection_with(
    id: &str,
    on_write: impl FnOnce(&EventSink) -> OnWrite,
) -> (NativeConnection, EventSink, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let (sink, events) = event_channel(16);
    let conn = NativeConnection::new(
        id,
        Box::new(FakeNativePort {
            recorder: recorder.clone(),
            fail_close: false,
            on_write: on_write(&sink),
        }),
        events,
    );
    (conn, sink, recorder)
}

pub struct RecordingControl(pub Arc<Recorder>);

#[async_trait]
impl LineControl for RecordingControl {
    async fn set_signals(&self, signals: SerialSignals) -> LinkResult<()> {
        self.0.signals.lock().push(signals);
        Ok(())
    }

    async fn close(&self) -> LinkResult<()> {
        *self.0.closes.lock() += 1;
        Ok(())
    }
}

/// Stream connection over any in-memory duplex
pub fn stream_connection<T>(io: T, info: StreamPortInfo) -> (StreamConnection, Arc<Recorder>)
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let recorder = Arc::new(Recorder::default());
    let (reader, writer) = tokio::io::split(io);
    let conn = StreamConnection::new(
        info,
        Box::new(reader),
        Box::new(writer),
        Box::new(RecordingControl(recorder.clone())),
    );
    (conn, recorder)
}
