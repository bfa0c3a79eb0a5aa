//! Byte splicing between a proxy stream and a TCP socket

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::host::ProxyStream;

const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// How a [`ProxySession`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Both directions reached EOF
    Closed,
    /// One direction failed and the other was cancelled
    Failed,
    /// One direction reached EOF and the other stalled
    HalfCloseTimeout,
}

/// Bytes moved by a finished session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Read from the proxy stream, written to the socket
    pub from_stream: u64,
    /// Read from the socket, written to the proxy stream
    pub from_socket: u64,
    pub end: SessionEnd,
}

/// Owns both ends of a proxied connection until the splice is over.
///
/// A direction ending in an error cancels the other one at once and resets
/// the proxy stream. A direction reaching EOF shuts down the opposite writer,
/// then the remaining direction is cancelled once it moves no bytes for
/// `half_close_timeout`. Both handles are dropped exactly once, when
/// [`ProxySession::run`] returns.
pub struct ProxySession<S, T> {
    label: String,
    stream: S,
    socket: T,
    half_close_timeout: Duration,
}

impl<S, T> ProxySession<S, T>
where
    S: ProxyStream,
    T: AsyncRead + AsyncWrite + Send + Unpin,
{
    pub fn new(label: impl Into<String>, stream: S, socket: T, half_close_timeout: Duration) -> Self {
        Self {
            label: label.into(),
            stream,
            socket,
            half_close_timeout,
        }
    }

    pub async fn run(self) -> SessionStats {
        let Self {
            label,
            stream,
            socket,
            half_close_timeout,
        } = self;

        let (mut stream_rx, mut stream_tx) = tokio::io::split(stream);
        let (mut socket_rx, mut socket_tx) = tokio::io::split(socket);
        let from_stream = AtomicU64::new(0);
        let from_socket = AtomicU64::new(0);

        let end = {
            let upstream = pump(&mut stream_rx, &mut socket_tx, &from_stream);
            let downstream = pump(&mut socket_rx, &mut stream_tx, &from_socket);
            tokio::pin!(upstream, downstream);

            tokio::select! {
                result = &mut upstream => {
                    finish(&label, result, downstream, &from_socket, half_close_timeout).await
                }
                result = &mut downstream => {
                    finish(&label, result, upstream, &from_stream, half_close_timeout).await
                }
            }
        };
        let from_stream = from_stream.into_inner();
        let from_socket = from_socket.into_inner();

        let mut stream = stream_rx.unsplit(stream_tx);
        if end != SessionEnd::Closed {
            stream.reset();
        }

        let stats = SessionStats {
            from_stream,
            from_socket,
            end,
        };
        info!(
            "Proxy session {} ended ({:?}): {} bytes in, {} bytes out",
            label, stats.end, stats.from_stream, stats.from_socket
        );
        stats
    }
}

/// Copy until EOF, then shut down the writer.
async fn pump<R, W>(reader: &mut R, writer: &mut W, copied: &AtomicU64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        copied.fetch_add(n as u64, Ordering::Relaxed);
    }
    writer.shutdown().await
}

/// Drive the remaining direction after `first` ended, while it keeps moving
/// bytes.
async fn finish<F>(
    label: &str,
    first: io::Result<()>,
    mut rest: Pin<&mut F>,
    progress: &AtomicU64,
    half_close_timeout: Duration,
) -> SessionEnd
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(e) = first {
        debug!("Proxy session {} direction failed: {}", label, e);
        return SessionEnd::Failed;
    }

    let mut seen = progress.load(Ordering::Relaxed);
    loop {
        match tokio::time::timeout(half_close_timeout, rest.as_mut()).await {
            Ok(Ok(())) => return SessionEnd::Closed,
            Ok(Err(e)) => {
                debug!("Proxy session {} direction failed: {}", label, e);
                return SessionEnd::Failed;
            }
            Err(_) => {
                let moved = progress.load(Ordering::Relaxed);
                if moved == seen {
                    warn!(
                        "Proxy session {} half-closed and idle for {:?}, cancelling",
                        label, half_close_timeout
                    );
                    return SessionEnd::HalfCloseTimeout;
                }
                seen = moved;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryStream;

    #[tokio::test]
    async fn test_bytes_flow_both_ways_and_close_cleanly() {
        let (stream, mut peer) = MemoryStream::pair();
        let (socket, mut target) = tokio::io::duplex(1024);
        let session = tokio::spawn(
            ProxySession::new("test", stream, socket, Duration::from_secs(5)).run(),
        );

        peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        target.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        target.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        peer.shutdown().await.unwrap();
        target.shutdown().await.unwrap();

        let stats = session.await.unwrap();
        assert_eq!(stats.end, SessionEnd::Closed);
        assert_eq!(stats.from_stream, 4);
        assert_eq!(stats.from_socket, 5);
        assert!(!peer.was_reset());
    }

    #[tokio::test]
    async fn test_half_close_is_bounded() {
        let (stream, mut peer) = MemoryStream::pair();
        let (socket, _target) = tokio::io::duplex(1024);
        let session = tokio::spawn(
            ProxySession::new("test", stream, socket, Duration::from_millis(50)).run(),
        );

        // The target never answers nor closes
        peer.shutdown().await.unwrap();

        let stats = session.await.unwrap();
        assert_eq!(stats.end, SessionEnd::HalfCloseTimeout);
        assert!(peer.was_reset());
    }

    #[tokio::test]
    async fn test_half_closed_session_survives_while_bytes_move() {
        let (stream, mut peer) = MemoryStream::pair();
        let (socket, mut target) = tokio::io::duplex(1024);
        let session = tokio::spawn(
            ProxySession::new("test", stream, socket, Duration::from_millis(100)).run(),
        );

        // Request sent, then a slow response outlasting the idle limit
        peer.write_all(b"GET").await.unwrap();
        peer.shutdown().await.unwrap();
        let mut request = [0u8; 3];
        target.read_exact(&mut request).await.unwrap();

        for chunk in b"abcdef" {
            target.write_all(&[*chunk]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        target.shutdown().await.unwrap();

        let mut response = Vec::new();
        peer.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"abcdef");

        let stats = session.await.unwrap();
        assert_eq!(stats.end, SessionEnd::Closed);
        assert_eq!(stats.from_socket, 6);
        assert!(!peer.was_reset());
    }

    #[tokio::test]
    async fn test_reset_stream_cancels_the_session() {
        let (stream, mut peer) = MemoryStream::pair();
        let (socket, _target) = tokio::io::duplex(1024);
        let session = tokio::spawn(
            ProxySession::new("test", stream, socket, Duration::from_secs(30)).run(),
        );

        peer.reset();

        let stats = session.await.unwrap();
        assert_eq!(stats.end, SessionEnd::Failed);
    }
}
