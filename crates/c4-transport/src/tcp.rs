//! TCP-backed implementation of the framed wire protocol.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::{Connection, ConnectionId, RecvEvent, Transport, TransportError, BUF_SIZE, MAX_PAYLOAD_LEN, PROTOCOL_ID};

/// How long a single receive attempt waits for data before rechecking
/// the caller's `alive` flag.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A `TcpListener` that hands out [`TcpConnection`]s.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Binds a listener to `addr` (e.g. `"0.0.0.0:53333"`).
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(TransportError::from)?;
        Ok(Self { listener })
    }

    /// Returns the address actually bound, useful when `addr` used port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener.local_addr().map_err(TransportError::from)
    }
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, peer_addr) = self.listener.accept().await.map_err(TransportError::from)?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %peer_addr, "accepted connection");
        Ok(TcpConnection {
            id,
            peer_addr,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        })
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// One accepted TCP connection, split into independently-locked read and
/// write halves so a broadcast write never blocks the reader task.
pub struct TcpConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

/// Reads exactly `buf.len()` bytes, collapsing EOF/reset/pipe errors into
/// `Disconnected` and everything else into `Io`.
async fn read_exact_checked(reader: &mut OwnedReadHalf, buf: &mut [u8]) -> Result<(), TransportError> {
    reader.read_exact(buf).await.map_err(TransportError::from)
}

impl TcpConnection {
    async fn read_one_frame(reader: &mut OwnedReadHalf) -> Result<RecvEvent, TransportError> {
        let mut proto_buf = vec![0u8; PROTOCOL_ID.len()];
        match read_exact_checked(reader, &mut proto_buf).await {
            Ok(()) => {}
            Err(TransportError::Disconnected) => return Ok(RecvEvent::Disconnected),
            Err(e) => return Err(e),
        }
        if proto_buf != PROTOCOL_ID.as_bytes() {
            return Err(TransportError::Framing(format!(
                "expected protocol id {PROTOCOL_ID:?}, got {:?}",
                String::from_utf8_lossy(&proto_buf)
            )));
        }

        let mut len_buf = [0u8; 4];
        match read_exact_checked(reader, &mut len_buf).await {
            Ok(()) => {}
            Err(TransportError::Disconnected) => return Ok(RecvEvent::Disconnected),
            Err(e) => return Err(e),
        }
        let len_str = std::str::from_utf8(&len_buf)
            .map_err(|_| TransportError::Framing("length field is not ASCII".into()))?;
        let len: usize = len_str
            .parse()
            .map_err(|_| TransportError::Framing(format!("malformed length {len_str:?}")))?;
        if len >= BUF_SIZE - 1 {
            return Err(TransportError::Framing(format!(
                "payload length {len} exceeds BUF_SIZE"
            )));
        }

        // payload + one trailing terminator byte, discarded below.
        let mut body = vec![0u8; len + 1];
        match read_exact_checked(reader, &mut body).await {
            Ok(()) => {}
            Err(TransportError::Disconnected) => return Ok(RecvEvent::Disconnected),
            Err(e) => return Err(e),
        }
        body.truncate(len);
        let payload = String::from_utf8(body)
            .map_err(|_| TransportError::Framing("payload is not valid UTF-8".into()))?;
        Ok(RecvEvent::Frame(payload))
    }
}

impl Connection for TcpConnection {
    type Error = TransportError;

    async fn send_frame(&self, payload: &str) -> Result<(), Self::Error> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(TransportError::Framing(format!(
                "payload of {} bytes exceeds the {} byte limit",
                payload.len(),
                MAX_PAYLOAD_LEN
            )));
        }
        let mut frame = Vec::with_capacity(PROTOCOL_ID.len() + 4 + payload.len() + 1);
        frame.extend_from_slice(PROTOCOL_ID.as_bytes());
        frame.extend_from_slice(format!("{:04}", payload.len()).as_bytes());
        frame.extend_from_slice(payload.as_bytes());
        frame.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await.map_err(TransportError::from)
    }

    async fn recv_frame(&self, alive: &AtomicBool) -> Result<RecvEvent, Self::Error> {
        let mut reader = self.reader.lock().await;
        loop {
            if !alive.load(Ordering::Acquire) {
                return Ok(RecvEvent::Cancelled);
            }
            match tokio::time::timeout(POLL_INTERVAL, reader.readable()).await {
                Ok(Ok(())) => match Self::read_one_frame(&mut reader).await? {
                    // Spec §4.1: empty payloads are silently ignored, not
                    // dispatched as an unknown command.
                    RecvEvent::Frame(payload) if payload.is_empty() => continue,
                    event => return Ok(event),
                },
                Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof => return Ok(RecvEvent::Disconnected),
                Ok(Err(e)) => return Err(TransportError::from(e)),
                Err(_elapsed) => continue,
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        let mut writer = self.writer.lock().await;
        match writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(TransportError::from(e)),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> String {
        self.peer_addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_accept_send_and_receive_a_frame() {
        let mut transport = TcpTransport::bind("127.0.0.1:0").await.expect("should bind");
        let addr = transport.local_addr().expect("should have local addr");

        let server_handle = tokio::spawn(async move { transport.accept().await.expect("should accept") });

        let client = TcpStream::connect(addr).await.expect("client should connect");
        let (mut client_read, mut client_write) = client.into_split();

        let server_conn = server_handle.await.expect("task should complete");
        assert!(server_conn.id().into_inner() > 0);

        server_conn.send_frame("hello").await.expect("send should succeed");

        let mut proto = [0u8; 8];
        client_read.read_exact(&mut proto).await.unwrap();
        assert_eq!(&proto, PROTOCOL_ID.as_bytes());
        let mut len_buf = [0u8; 4];
        client_read.read_exact(&mut len_buf).await.unwrap();
        assert_eq!(&len_buf, b"0005");
        let mut payload = [0u8; 5];
        client_read.read_exact(&mut payload).await.unwrap();
        assert_eq!(&payload, b"hello");
        let mut term = [0u8; 1];
        client_read.read_exact(&mut term).await.unwrap();

        let frame = format!("{PROTOCOL_ID}0003hi\n");
        client_write.write_all(frame.as_bytes()).await.unwrap();

        let alive = AtomicBool::new(true);
        let event = server_conn.recv_frame(&alive).await.expect("recv should succeed");
        assert_eq!(event, RecvEvent::Frame("hi".to_string()));
    }

    #[tokio::test]
    async fn test_recv_returns_disconnected_on_peer_close() {
        let mut transport = TcpTransport::bind("127.0.0.1:0").await.expect("should bind");
        let addr = transport.local_addr().unwrap();

        let server_handle = tokio::spawn(async move { transport.accept().await.unwrap() });
        let client = TcpStream::connect(addr).await.unwrap();
        let server_conn = server_handle.await.unwrap();

        drop(client);

        let alive = AtomicBool::new(true);
        let event = server_conn.recv_frame(&alive).await.expect("recv should not error");
        assert_eq!(event, RecvEvent::Disconnected);
    }

    #[tokio::test]
    async fn test_recv_returns_cancelled_when_alive_flips_false() {
        let mut transport = TcpTransport::bind("127.0.0.1:0").await.expect("should bind");
        let addr = transport.local_addr().unwrap();

        let server_handle = tokio::spawn(async move { transport.accept().await.unwrap() });
        let _client = TcpStream::connect(addr).await.unwrap();
        let server_conn = server_handle.await.unwrap();

        let alive = Arc::new(AtomicBool::new(false));
        let event = server_conn.recv_frame(&alive).await.expect("recv should not error");
        assert_eq!(event, RecvEvent::Cancelled);
    }

    #[tokio::test]
    async fn test_send_frame_rejects_oversized_payload() {
        let mut transport = TcpTransport::bind("127.0.0.1:0").await.expect("should bind");
        let addr = transport.local_addr().unwrap();
        let server_handle = tokio::spawn(async move { transport.accept().await.unwrap() });
        let _client = TcpStream::connect(addr).await.unwrap();
        let server_conn = server_handle.await.unwrap();

        let too_big = "x".repeat(MAX_PAYLOAD_LEN + 1);
        let result = server_conn.send_frame(&too_big).await;
        assert!(matches!(result, Err(TransportError::Framing(_))));
    }

    #[tokio::test]
    async fn test_recv_rejects_bad_protocol_id() {
        let mut transport = TcpTransport::bind("127.0.0.1:0").await.expect("should bind");
        let addr = transport.local_addr().unwrap();
        let server_handle = tokio::spawn(async move { transport.accept().await.unwrap() });
        let client = TcpStream::connect(addr).await.unwrap();
        let (_client_read, mut client_write) = client.into_split();
        let server_conn = server_handle.await.unwrap();

        client_write.write_all(b"bogusbad0003hi\n").await.unwrap();

        let alive = AtomicBool::new(true);
        let result = server_conn.recv_frame(&alive).await;
        assert!(matches!(result, Err(TransportError::Framing(_))));
    }

    #[tokio::test]
    async fn test_recv_silently_skips_empty_payload_frames() {
        let mut transport = TcpTransport::bind("127.0.0.1:0").await.expect("should bind");
        let addr = transport.local_addr().unwrap();
        let server_handle = tokio::spawn(async move { transport.accept().await.unwrap() });
        let client = TcpStream::connect(addr).await.unwrap();
        let (_client_read, mut client_write) = client.into_split();
        let server_conn = server_handle.await.unwrap();

        // An empty-payload frame followed by a real one: the reader must
        // skip straight past the empty frame instead of surfacing it.
        let empty_frame = format!("{PROTOCOL_ID}0000\n");
        let real_frame = format!("{PROTOCOL_ID}0003hi\n");
        client_write.write_all(empty_frame.as_bytes()).await.unwrap();
        client_write.write_all(real_frame.as_bytes()).await.unwrap();

        let alive = AtomicBool::new(true);
        let event = server_conn.recv_frame(&alive).await.expect("recv should succeed");
        assert_eq!(event, RecvEvent::Frame("hi".to_string()));
    }
}
