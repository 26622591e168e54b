//! Request/response I/O over a [`DeviceHandle`]
//!
//! [`ProtocolAdapter`] gives both transports one contract: send a framed
//! packet within a timeout, then collect an exact number of reply bytes
//! within a timeout. The two transports differ in one place. On a stream
//! port a timeout after some bytes arrived returns the partial buffer, on a
//! native port it is always an error.

use crate::config::LinkSettings;
use crate::core::protocol::ACK;
use crate::core::transport::{
    DeviceHandle, DeviceInfo, LineSettings, Link, LinkError, LinkResult, NativeBackend,
    NativeConnection, PortEvent, SerialSignals, StreamConnection,
};
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, trace, warn};

const LOG_PREVIEW_LEN: usize = 32;

/// How the stream transport's reads fill the reply buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Reads land directly in the unfilled tail of the reply buffer
    #[default]
    Byob,
    /// Each read yields a fresh chunk that is copied in
    Default,
}

/// Accumulation buffer for one reply.
///
/// Holds exactly `target` bytes of storage; `offset` bytes are filled.
#[derive(Debug)]
pub struct PendingRead {
    buf: BytesMut,
    offset: usize,
}

impl PendingRead {
    /// Empty buffer for a `target`-byte reply
    pub fn new(target: usize) -> Self {
        Self {
            buf: BytesMut::zeroed(target),
            offset: 0,
        }
    }

    /// Requested length
    pub fn target(&self) -> usize {
        self.buf.len()
    }

    /// Bytes filled so far
    pub fn filled(&self) -> usize {
        self.offset
    }

    /// Bytes still missing
    pub fn remaining(&self) -> usize {
        self.target() - self.offset
    }

    /// Whether the reply is complete
    pub fn is_full(&self) -> bool {
        self.offset >= self.target()
    }

    /// Unfilled tail, for reads that write in place
    pub fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.offset..]
    }

    /// Mark `n` bytes of the tail as filled
    pub fn advance(&mut self, n: usize) {
        self.offset += n.min(self.remaining());
    }

    /// Copy as much of `chunk` as fits; returns the number of bytes taken
    pub fn extend(&mut self, chunk: &[u8]) -> usize {
        let take = chunk.len().min(self.remaining());
        self.buf[self.offset..self.offset + take].copy_from_slice(&chunk[..take]);
        self.offset += take;
        take
    }

    /// The filled prefix
    pub fn into_bytes(mut self) -> Bytes {
        self.buf.truncate(self.offset);
        self.buf.freeze()
    }
}

fn preview(data: &[u8]) -> String {
    if data.len() > LOG_PREVIEW_LEN {
        format!("{}.. ({} bytes)", hex::encode(&data[..LOG_PREVIEW_LEN]), data.len())
    } else {
        hex::encode(data)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Packet I/O over either transport
#[derive(Debug, Clone)]
pub struct ProtocolAdapter {
    send_timeout: Duration,
    receive_timeout: Duration,
    operation_timeout: Duration,
}

impl Default for ProtocolAdapter {
    fn default() -> Self {
        Self::new(&LinkSettings::default())
    }
}

impl ProtocolAdapter {
    /// Adapter using the default timeouts from `settings`
    pub fn new(settings: &LinkSettings) -> Self {
        Self {
            send_timeout: settings.send_timeout(),
            receive_timeout: settings.receive_timeout(),
            operation_timeout: settings.operation_timeout(),
        }
    }

    /// Default send timeout
    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Default receive timeout
    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    /// How long the device may take to finish a long operation
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Write `payload` to the device.
    ///
    /// Returns `Ok(true)` once the transport accepted the bytes, or
    /// `SendTimeout` if it did not within `timeout`.
    pub async fn send_package(
        &self,
        handle: &DeviceHandle,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> LinkResult<bool> {
        let timeout = timeout.unwrap_or(self.send_timeout);
        let link = handle.link()?;
        debug!("TX {}", preview(payload));

        let result = match link {
            Link::Native(conn) => tokio::time::timeout(timeout, conn.write(payload)).await,
            Link::Stream(conn) => {
                let mut writer = conn.writer()?;
                tokio::time::timeout(timeout, async {
                    writer.write_all(payload).await?;
                    writer.flush().await?;
                    Ok::<(), LinkError>(())
                })
                .await
            }
        };

        match result {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => {
                error!("Failed to send package: {}", e);
                Err(e)
            }
            Err(_) => {
                warn!("Send of {} bytes timed out after {:?}", payload.len(), timeout);
                Err(LinkError::SendTimeout(millis(timeout)))
            }
        }
    }

    /// Collect a `length`-byte reply.
    ///
    /// `mode` only affects the stream transport.
    pub async fn get_package(
        &self,
        handle: &DeviceHandle,
        length: usize,
        timeout: Option<Duration>,
        mode: ReadMode,
    ) -> LinkResult<Bytes> {
        let timeout = timeout.unwrap_or(self.receive_timeout);
        let link = handle.link()?;
        let mut pending = PendingRead::new(length);
        if pending.is_full() {
            return Ok(Bytes::new());
        }

        match link {
            Link::Native(conn) => receive_native(conn, &mut pending, timeout).await?,
            Link::Stream(conn) => receive_stream(conn, &mut pending, timeout, mode).await?,
        }

        let reply = pending.into_bytes();
        debug!("RX {}", preview(&reply));
        Ok(reply)
    }

    /// Read the one-byte status reply; `true` iff it is [`ACK`]
    pub async fn get_result(&self, handle: &DeviceHandle, timeout: Option<Duration>) -> LinkResult<bool> {
        let reply = self.get_package(handle, 1, timeout, ReadMode::default()).await?;
        let acked = reply.first() == Some(&ACK);
        if !acked {
            debug!("Status byte {:02x?} is not ACK", reply.first());
        }
        Ok(acked)
    }

    /// Drive DTR/RTS on the live transport
    pub async fn set_signals(&self, handle: &DeviceHandle, signals: SerialSignals) -> LinkResult<()> {
        match handle.link()? {
            Link::Native(conn) => conn.set_signals(signals).await,
            Link::Stream(conn) => conn.set_signals(signals).await,
        }
    }

    /// Open `path` on a native backend
    pub async fn create_device_from_port(
        backend: &dyn NativeBackend,
        path: &str,
        settings: &LineSettings,
    ) -> LinkResult<DeviceHandle> {
        match backend.open(path, settings).await {
            Ok(conn) => Ok(DeviceHandle::native(conn)),
            Err(e) => {
                error!("Failed to create device from {}: {}", path, e);
                Err(e)
            }
        }
    }

    /// Wrap an opened stream port
    pub fn create_device_from_stream(connection: StreamConnection) -> DeviceHandle {
        DeviceHandle::stream(connection)
    }

    /// Close and detach the live transport; an empty handle is a no-op
    pub async fn close_device(handle: &mut DeviceHandle) -> LinkResult<()> {
        match handle.take() {
            Some(Link::Native(conn)) => conn.close().await,
            Some(Link::Stream(conn)) => conn.close().await,
            None => Ok(()),
        }
    }

    /// Whether the handle holds a live transport
    pub fn is_device_connected(handle: &DeviceHandle) -> bool {
        handle.is_connected()
    }

    /// Describe the live transport
    pub fn device_info(handle: &DeviceHandle) -> Option<DeviceInfo> {
        handle.info()
    }
}

async fn receive_native(
    conn: &NativeConnection,
    pending: &mut PendingRead,
    timeout: Duration,
) -> LinkResult<()> {
    let mut listener = conn.listen()?;

    let fill = async {
        while !pending.is_full() {
            match listener.recv().await {
                Some(PortEvent::Data(chunk)) => {
                    let taken = pending.extend(&chunk);
                    if taken < chunk.len() {
                        trace!("Discarding {} bytes past the reply", chunk.len() - taken);
                    }
                }
                Some(PortEvent::Error(msg)) => return Err(LinkError::Transport(msg)),
                Some(PortEvent::Closed) | None => return Err(LinkError::Disconnected),
            }
        }
        Ok(())
    };

    let outcome = tokio::time::timeout(timeout, fill).await;
    match outcome {
        Ok(result) => result,
        Err(_) => {
            warn!(
                "Receive timed out after {:?} with {}/{} bytes",
                timeout,
                pending.filled(),
                pending.target()
            );
            Err(LinkError::ReceiveTimeout(millis(timeout)))
        }
    }
}

async fn receive_stream(
    conn: &StreamConnection,
    pending: &mut PendingRead,
    timeout: Duration,
    mode: ReadMode,
) -> LinkResult<()> {
    let mut reader = conn.reader()?;

    let fill = async {
        while !pending.is_full() {
            let n = match mode {
                ReadMode::Byob => {
                    let n = reader.read(pending.unfilled_mut()).await?;
                    pending.advance(n);
                    n
                }
                ReadMode::Default => {
                    let mut chunk = BytesMut::zeroed(pending.remaining());
                    let n = reader.read(&mut chunk).await?;
                    chunk.truncate(n);
                    pending.extend(&chunk)
                }
            };
            if n == 0 {
                debug!("Stream ended with {}/{} bytes", pending.filled(), pending.target());
                break;
            }
        }
        Ok::<_, std::io::Error>(())
    };

    let outcome = tokio::time::timeout(timeout, fill).await;
    let filled = pending.filled();
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) if filled == 0 => Err(e.into()),
        Ok(Err(e)) => {
            warn!("Read failed after {} bytes, returning them: {}", filled, e);
            Ok(())
        }
        Err(_) if filled == 0 => Err(LinkError::ReceiveTimeout(millis(timeout))),
        Err(_) => {
            warn!(
                "Receive timed out after {:?}, returning {}/{} bytes",
                timeout,
                filled,
                pending.target()
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::testing::{
        native_connection, native_connection_with, stream_connection, OnWrite,
    };
    use crate::core::transport::StreamPortInfo;
    use tokio::io::AsyncWriteExt;

    fn adapter() -> ProtocolAdapter {
        ProtocolAdapter::default()
    }

    fn stream_handle<T>(io: T) -> DeviceHandle
    where
        T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
    {
        DeviceHandle::stream(stream_connection(io, StreamPortInfo::default()).0)
    }

    async fn wait_for_listener(sink: &crate::core::transport::EventSink) {
        while !sink.has_listener() {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_pending_read_never_overfills() {
        let mut pending = PendingRead::new(4);
        assert_eq!(pending.extend(&[1, 2, 3]), 3);
        assert_eq!(pending.extend(&[4, 5, 6]), 1);
        assert!(pending.is_full());
        pending.advance(10);
        assert_eq!(pending.filled(), 4);
        assert_eq!(&pending.into_bytes()[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_pending_read_in_place() {
        let mut pending = PendingRead::new(3);
        pending.unfilled_mut()[0] = 9;
        pending.advance(1);
        assert_eq!(pending.unfilled_mut().len(), 2);
        assert_eq!(&pending.into_bytes()[..], &[9]);
    }

    #[tokio::test]
    async fn test_empty_handle() {
        let handle = DeviceHandle::default();
        assert!(matches!(
            adapter().send_package(&handle, &[1], None).await,
            Err(LinkError::TransportNotInitialized)
        ));
        assert!(matches!(
            adapter().get_package(&handle, 1, None, ReadMode::Byob).await,
            Err(LinkError::TransportNotInitialized)
        ));
        assert!(matches!(
            adapter().set_signals(&handle, SerialSignals::both(true)).await,
            Err(LinkError::TransportNotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_stream_chunks_byob() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0u8; 10])
            .read(&[1u8; 5])
            .build();
        let handle = stream_handle(mock);

        let reply = adapter()
            .get_package(&handle, 15, Some(Duration::from_secs(1)), ReadMode::Byob)
            .await
            .unwrap();
        assert_eq!(reply.len(), 15);
        assert_eq!(&reply[10..], &[1u8; 5]);
    }

    #[tokio::test]
    async fn test_stream_chunks_default_mode() {
        let mock = tokio_test::io::Builder::new()
            .read(&[7u8; 10])
            .read(&[8u8; 5])
            .build();
        let handle = stream_handle(mock);

        let reply = adapter()
            .get_package(&handle, 15, Some(Duration::from_secs(1)), ReadMode::Default)
            .await
            .unwrap();
        assert_eq!(&reply[..10], &[7u8; 10]);
        assert_eq!(&reply[10..], &[8u8; 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_partial_reply_on_timeout() {
        let (ours, mut device) = tokio::io::duplex(64);
        let handle = stream_handle(ours);
        device.write_all(&[1, 2, 3]).await.unwrap();

        let reply = adapter()
            .get_package(&handle, 10, Some(Duration::from_millis(1000)), ReadMode::Byob)
            .await
            .unwrap();
        assert_eq!(&reply[..], &[1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_timeout_without_data() {
        let (ours, _device) = tokio::io::duplex(64);
        let handle = stream_handle(ours);

        let err = adapter()
            .get_package(&handle, 10, Some(Duration::from_millis(1000)), ReadMode::Default)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::ReceiveTimeout(1000)));

        // the reader lock was released
        let conn = match handle.link().unwrap() {
            Link::Stream(conn) => conn,
            Link::Native(_) => unreachable!(),
        };
        assert!(conn.reader().is_ok());
    }

    #[tokio::test]
    async fn test_stream_eof_returns_accumulated() {
        let (ours, mut device) = tokio::io::duplex(64);
        let handle = stream_handle(ours);
        device.write_all(&[0xAA, 0xBB]).await.unwrap();
        drop(device);

        let reply = adapter()
            .get_package(&handle, 8, Some(Duration::from_secs(1)), ReadMode::Byob)
            .await
            .unwrap();
        assert_eq!(&reply[..], &[0xAA, 0xBB]);
    }

    #[tokio::test]
    async fn test_stream_send_writes_packet() {
        let mock = tokio_test::io::Builder::new()
            .write(&[0x05, 0x00, 0xF0, 0xBF, 0x04])
            .build();
        let handle = stream_handle(mock);

        let sent = adapter()
            .send_package(&handle, &[0x05, 0x00, 0xF0, 0xBF, 0x04], None)
            .await
            .unwrap();
        assert!(sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_send_timeout_releases_writer() {
        let (ours, _device) = tokio::io::duplex(1);
        let handle = stream_handle(ours);
        let timeout = Some(Duration::from_millis(1000));

        let err = adapter().send_package(&handle, &[0u8; 8], timeout).await.unwrap_err();
        assert!(matches!(err, LinkError::SendTimeout(1000)));

        // a second attempt reaches the transport again instead of WriterLocked
        let err = adapter().send_package(&handle, &[0u8; 8], timeout).await.unwrap_err();
        assert!(matches!(err, LinkError::SendTimeout(_)));
    }

    #[tokio::test]
    async fn test_stream_reader_contention() {
        let (ours, _device) = tokio::io::duplex(64);
        let handle = stream_handle(ours);
        let conn = match handle.link().unwrap() {
            Link::Stream(conn) => conn,
            Link::Native(_) => unreachable!(),
        };

        let _held = conn.reader().unwrap();
        let err = adapter()
            .get_package(&handle, 1, None, ReadMode::Byob)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::ReaderLocked));
    }

    #[tokio::test]
    async fn test_native_chunks() {
        let (conn, sink, _recorder) = native_connection("COM3_1");
        let handle = DeviceHandle::native(conn);

        let feeder = tokio::spawn(async move {
            wait_for_listener(&sink).await;
            sink.emit(PortEvent::Data(Bytes::from(vec![1u8; 10]))).await;
            sink.emit(PortEvent::Data(Bytes::from(vec![2u8; 5]))).await;
            sink
        });

        let reply = adapter()
            .get_package(&handle, 15, Some(Duration::from_secs(1)), ReadMode::Byob)
            .await
            .unwrap();
        assert_eq!(&reply[..10], &[1u8; 10]);
        assert_eq!(&reply[10..], &[2u8; 5]);
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn test_native_discards_excess() {
        let (conn, sink, _recorder) = native_connection("COM3_1");
        let handle = DeviceHandle::native(conn);

        let feeder = tokio::spawn(async move {
            wait_for_listener(&sink).await;
            sink.emit(PortEvent::Data(Bytes::from_static(&[1, 2, 3, 4, 5, 6]))).await;
            sink
        });

        let reply = adapter()
            .get_package(&handle, 4, Some(Duration::from_secs(1)), ReadMode::Byob)
            .await
            .unwrap();
        assert_eq!(&reply[..], &[1, 2, 3, 4]);

        let sink = feeder.await.unwrap();
        assert!(!sink.has_listener());
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_partial_is_timeout() {
        let (conn, sink, _recorder) = native_connection("COM3_1");
        let handle = DeviceHandle::native(conn);

        let feeder = tokio::spawn(async move {
            wait_for_listener(&sink).await;
            sink.emit(PortEvent::Data(Bytes::from_static(&[1, 2, 3]))).await;
            sink
        });

        let err = adapter()
            .get_package(&handle, 10, Some(Duration::from_millis(1000)), ReadMode::Byob)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::ReceiveTimeout(1000)));

        let sink = feeder.await.unwrap();
        assert!(!sink.has_listener());
    }

    #[tokio::test]
    async fn test_native_error_event() {
        let (conn, sink, _recorder) = native_connection("COM3_1");
        let handle = DeviceHandle::native(conn);

        let feeder = tokio::spawn(async move {
            wait_for_listener(&sink).await;
            sink.emit(PortEvent::Error("framing error".into())).await;
            sink
        });

        let err = adapter()
            .get_package(&handle, 4, Some(Duration::from_secs(1)), ReadMode::Byob)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Transport(msg) if msg == "framing error"));
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn test_native_send_records_bytes() {
        let (conn, _sink, recorder) = native_connection("COM3_1");
        let handle = DeviceHandle::native(conn);

        assert!(adapter().send_package(&handle, &[5, 0, 0xF0, 0xBF, 0x04], None).await.unwrap());
        assert_eq!(recorder.written(), vec![vec![5, 0, 0xF0, 0xBF, 0x04]]);
    }

    #[tokio::test]
    async fn test_native_reply_during_send_is_received() {
        let (conn, _sink, _recorder) = native_connection_with("COM3_1", |sink| {
            OnWrite::Reply(sink.clone(), Bytes::from_static(&[ACK]))
        });
        let handle = DeviceHandle::native(conn);

        assert!(adapter().send_package(&handle, &[5, 0, 0xF1, 0, 0], None).await.unwrap());
        let acked = adapter()
            .get_result(&handle, Some(Duration::from_millis(1000)))
            .await
            .unwrap();
        assert!(acked);
    }

    #[tokio::test]
    async fn test_native_stale_bytes_skipped() {
        let (conn, sink, _recorder) = native_connection_with("COM3_1", |sink| {
            OnWrite::Reply(sink.clone(), Bytes::from_static(&[0, 0, 0x10, 0x11]))
        });
        let handle = DeviceHandle::native(conn);
        sink.emit(PortEvent::Data(Bytes::from_static(&[0xEE; 3]))).await;

        adapter().send_package(&handle, &[1, 2, 3], None).await.unwrap();
        let reply = adapter()
            .get_package(&handle, 4, Some(Duration::from_millis(1000)), ReadMode::Byob)
            .await
            .unwrap();
        assert_eq!(&reply[..], &[0, 0, 0x10, 0x11]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_send_timeout_releases_writer() {
        let (conn, _sink, recorder) = native_connection_with("COM3_1", |_| OnWrite::Stall);
        let handle = DeviceHandle::native(conn);
        let timeout = Some(Duration::from_millis(1000));

        let err = adapter().send_package(&handle, &[0u8; 8], timeout).await.unwrap_err();
        assert!(matches!(err, LinkError::SendTimeout(1000)));

        // the stalled write was dropped, so the next one is not WriterLocked
        let err = adapter().send_package(&handle, &[1u8; 8], timeout).await.unwrap_err();
        assert!(matches!(err, LinkError::SendTimeout(1000)));
        assert_eq!(recorder.written().len(), 2);
    }

    #[tokio::test]
    async fn test_get_result() {
        for (byte, expected) in [(0xAAu8, true), (0x00, false), (0xFF, false)] {
            let mock = tokio_test::io::Builder::new().read(&[byte]).build();
            let handle = stream_handle(mock);
            assert_eq!(adapter().get_result(&handle, None).await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_set_signals_forwarded() {
        let (conn, recorder) = stream_connection(tokio::io::duplex(8).0, StreamPortInfo::default());
        let handle = DeviceHandle::stream(conn);

        adapter().set_signals(&handle, SerialSignals::both(false)).await.unwrap();
        assert_eq!(recorder.signals(), vec![SerialSignals::both(false)]);
    }

    #[tokio::test]
    async fn test_close_device_empties_handle() {
        let (conn, _sink, recorder) = native_connection("COM3_1");
        let mut handle = DeviceHandle::native(conn);
        assert!(ProtocolAdapter::is_device_connected(&handle));

        ProtocolAdapter::close_device(&mut handle).await.unwrap();
        assert!(!ProtocolAdapter::is_device_connected(&handle));
        assert!(ProtocolAdapter::device_info(&handle).is_none());
        assert_eq!(recorder.close_count(), 1);

        ProtocolAdapter::close_device(&mut handle).await.unwrap();
        assert_eq!(recorder.close_count(), 1);
    }
}
