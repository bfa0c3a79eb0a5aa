//! In-process tunnel hosts
//!
//! A [`MemoryNetwork`] connects any number of [`MemoryHost`]s inside one
//! process. Streams are tokio duplex pipes, dials are counted, and a direct
//! path between two hosts can be simulated with [`MemoryNetwork::mark_direct`].

use async_trait::async_trait;
use dashmap::DashMap;
use iroh::{NodeId, RelayUrl, SecretKey};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::Notify;
use tracing::debug;

use super::{ProxyStream, StreamHandler, TunnelHost};
use crate::error::{TunnelError, TunnelResult};
use crate::types::{PeerAddressRecord, Transport};

const PIPE_CAPACITY: usize = 64 * 1024;

/// One end of an in-process stream
pub struct MemoryStream {
    pipe: Option<DuplexStream>,
    reset: Arc<AtomicBool>,
}

impl MemoryStream {
    /// Connected pair of streams sharing one reset flag
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
        let reset = Arc::new(AtomicBool::new(false));
        (
            Self {
                pipe: Some(a),
                reset: reset.clone(),
            },
            Self {
                pipe: Some(b),
                reset,
            },
        )
    }

    /// Whether either end reset the stream
    pub fn was_reset(&self) -> bool {
        self.reset.load(Ordering::SeqCst)
    }

    fn reset_error() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionReset, "stream reset")
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let reset = self.was_reset();
        match self.pipe.as_mut() {
            Some(_) if reset => Poll::Ready(Err(Self::reset_error())),
            Some(pipe) => Pin::new(pipe).poll_read(cx, buf),
            None => Poll::Ready(Err(Self::reset_error())),
        }
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let reset = self.was_reset();
        match self.pipe.as_mut() {
            Some(_) if reset => Poll::Ready(Err(Self::reset_error())),
            Some(pipe) => Pin::new(pipe).poll_write(cx, buf),
            None => Poll::Ready(Err(Self::reset_error())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.pipe.as_mut() {
            Some(pipe) => Pin::new(pipe).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.pipe.as_mut() {
            Some(pipe) => Pin::new(pipe).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl ProxyStream for MemoryStream {
    fn reset(&mut self) {
        self.reset.store(true, Ordering::SeqCst);
        // Dropping the pipe wakes the other end with EOF
        self.pipe = None;
    }
}

struct HostState {
    node_id: NodeId,
    addrs: RwLock<Vec<Transport>>,
    addrs_changed: Notify,
    handlers: RwLock<HashMap<&'static [u8], Arc<dyn StreamHandler<MemoryStream>>>>,
    /// Live path count per connected peer
    paths: DashMap<NodeId, usize>,
    dials: AtomicUsize,
}

/// A set of in-process hosts that can reach each other
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hosts: Arc<DashMap<NodeId, Arc<HostState>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host with a fresh identity
    pub fn host(&self) -> MemoryHost {
        self.host_with_key(SecretKey::from_bytes(&rand::random::<[u8; 32]>()))
    }

    /// Add a host with the given identity
    pub fn host_with_key(&self, secret_key: SecretKey) -> MemoryHost {
        let node_id = secret_key.public();
        let port = 10_000 + (self.hosts.len() as u16);
        let state = Arc::new(HostState {
            node_id,
            addrs: RwLock::new(vec![Transport::Direct(SocketAddr::from((
                [127, 0, 0, 1],
                port,
            )))]),
            addrs_changed: Notify::new(),
            handlers: RwLock::new(HashMap::new()),
            paths: DashMap::new(),
            dials: AtomicUsize::new(0),
        });
        self.hosts.insert(node_id, state.clone());
        MemoryHost {
            network: self.clone(),
            state,
        }
    }

    /// Simulate a punched path between two connected hosts
    pub fn mark_direct(&self, a: NodeId, b: NodeId) {
        for (from, to) in [(a, b), (b, a)] {
            if let Some(state) = self.hosts.get(&from) {
                state.paths.insert(to, 2);
            }
        }
    }

    fn lookup(&self, node_id: &NodeId) -> Option<Arc<HostState>> {
        self.hosts.get(node_id).map(|entry| entry.value().clone())
    }
}

/// A tunnel host living in a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryHost {
    network: MemoryNetwork,
    state: Arc<HostState>,
}

impl MemoryHost {
    /// Number of dials this host performed
    pub fn dial_count(&self) -> usize {
        self.state.dials.load(Ordering::SeqCst)
    }

    /// Announce a relay address, as an iroh endpoint does once its relay is connected
    pub fn go_online(&self, relay_url: RelayUrl) {
        self.state.addrs.write().push(Transport::Relay(relay_url));
        self.state.addrs_changed.notify_waiters();
    }
}

#[async_trait]
impl TunnelHost for MemoryHost {
    type Stream = MemoryStream;

    fn node_id(&self) -> NodeId {
        self.state.node_id
    }

    fn local_addrs(&self) -> Vec<Transport> {
        self.state.addrs.read().clone()
    }

    async fn addrs_updated(&self) {
        self.state.addrs_changed.notified().await;
    }

    fn connection_count(&self, peer: NodeId) -> usize {
        self.state.paths.get(&peer).map(|count| *count).unwrap_or(0)
    }

    async fn connect(&self, record: &PeerAddressRecord, _protocol: &'static [u8]) -> TunnelResult<()> {
        let peer = record
            .node_id()
            .ok_or_else(|| TunnelError::connect(&record.node_name, "address record holds no identity"))?;
        self.state.dials.fetch_add(1, Ordering::SeqCst);

        let remote = self
            .network
            .lookup(&peer)
            .ok_or_else(|| TunnelError::connect(&record.node_name, "peer is not reachable"))?;

        self.state.paths.entry(peer).or_insert(1);
        remote.paths.entry(self.state.node_id).or_insert(1);
        debug!("Memory host {} dialed {}", self.state.node_id.fmt_short(), peer.fmt_short());
        Ok(())
    }

    async fn open_stream(&self, peer: NodeId, protocol: &'static [u8]) -> TunnelResult<MemoryStream> {
        if self.connection_count(peer) == 0 {
            return Err(TunnelError::stream_open(peer, "no live connection"));
        }

        let remote = self
            .network
            .lookup(&peer)
            .ok_or_else(|| TunnelError::stream_open(peer, "peer went away"))?;
        let handler = remote
            .handlers
            .read()
            .get(protocol)
            .cloned()
            .ok_or_else(|| TunnelError::stream_open(peer, "protocol not supported"))?;

        let (local, inbound) = MemoryStream::pair();
        let from = self.state.node_id;
        tokio::spawn(async move {
            handler.handle_stream(inbound, from).await;
        });
        Ok(local)
    }

    async fn serve(
        &self,
        protocol: &'static [u8],
        handler: Arc<dyn StreamHandler<MemoryStream>>,
    ) -> TunnelResult<()> {
        self.state.handlers.write().insert(protocol, handler);
        Ok(())
    }

    async fn shutdown(&self) -> TunnelResult<()> {
        self.network.hosts.remove(&self.state.node_id);
        self.state.handlers.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_reset_is_seen_by_peer() {
        let (mut a, mut b) = MemoryStream::pair();
        a.write_all(b"hello").await.unwrap();
        a.reset();

        assert!(b.was_reset());
        let mut buf = [0u8; 5];
        assert!(b.read_exact(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_counts_dials_and_paths() {
        let network = MemoryNetwork::new();
        let a = network.host();
        let b = network.host();
        let record = PeerAddressRecord::new("b", b.node_id(), b.local_addrs());

        assert_eq!(a.connection_count(b.node_id()), 0);
        a.connect(&record, b"/test").await.unwrap();
        assert_eq!(a.dial_count(), 1);
        assert_eq!(a.connection_count(b.node_id()), 1);
        assert_eq!(b.connection_count(a.node_id()), 1);

        network.mark_direct(a.node_id(), b.node_id());
        assert_eq!(a.connection_count(b.node_id()), 2);
    }
}
