//! iroh-backed tunnel host

use async_trait::async_trait;
use dashmap::DashMap;
use iroh::endpoint::{Connection, ConnectionType, RecvStream, SendStream, VarInt};
use iroh::protocol::{AcceptError, ProtocolHandler, Router};
use iroh::{Endpoint, NodeId, RelayMap, RelayMode, RelayUrl, SecretKey, Watcher as _};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info, warn};

use super::{ProxyStream, StreamHandler, TunnelHost};
use crate::error::{TunnelError, TunnelResult};
use crate::types::{PeerAddressRecord, Transport};

type ConnectionKey = (NodeId, &'static [u8]);
type HandlerMap = HashMap<&'static [u8], Arc<dyn StreamHandler<IrohStream>>>;

/// Settings for binding an [`IrohHost`]
#[derive(Debug, Clone)]
pub struct IrohHostOptions {
    pub secret_key: SecretKey,
    /// The only relay this host uses, none disables relaying
    pub relay_url: Option<RelayUrl>,
    pub listen_address: SocketAddr,
}

/// A QUIC stream pair opened on an iroh connection
pub struct IrohStream {
    send: SendStream,
    recv: RecvStream,
}

impl IrohStream {
    pub fn new(send: SendStream, recv: RecvStream) -> Self {
        Self { send, recv }
    }
}

impl AsyncRead for IrohStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        AsyncRead::poll_read(Pin::new(&mut self.recv), cx, buf)
    }
}

impl AsyncWrite for IrohStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        AsyncWrite::poll_write(Pin::new(&mut self.send), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_flush(Pin::new(&mut self.send), cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_shutdown(Pin::new(&mut self.send), cx)
    }
}

impl ProxyStream for IrohStream {
    fn reset(&mut self) {
        // Both fail only when the stream is already gone
        let _ = self.send.reset(VarInt::from_u32(0));
        let _ = self.recv.stop(VarInt::from_u32(0));
    }
}

/// Tunnel host running on an iroh endpoint
///
/// Every live connection accepts streams, whichever side dialed it, so a
/// peer that connected to us can open streams back over the same connection.
pub struct IrohHost {
    endpoint: Endpoint,
    dispatch: StreamDispatch,
    router: Mutex<Option<Router>>,
}

impl IrohHost {
    /// Bind an endpoint pinned to the configured relay.
    ///
    /// No discovery service is installed, so the node is only reachable
    /// through the addresses it publishes itself.
    pub async fn bind(options: IrohHostOptions) -> TunnelResult<Self> {
        let relay_mode = match &options.relay_url {
            Some(url) => RelayMode::Custom(RelayMap::from(url.clone())),
            None => RelayMode::Disabled,
        };

        let mut builder = Endpoint::builder()
            .secret_key(options.secret_key)
            .relay_mode(relay_mode);
        builder = match options.listen_address {
            SocketAddr::V4(addr) => builder.bind_addr_v4(addr),
            SocketAddr::V6(addr) => builder.bind_addr_v6(addr),
        };

        let endpoint = builder.bind().await.map_err(|e| {
            TunnelError::configuration(
                "agent.listen_address",
                format!("failed to bind endpoint on {}: {}", options.listen_address, e),
            )
        })?;

        info!(
            "Iroh endpoint {} bound on {:?}",
            endpoint.node_id(),
            endpoint.bound_sockets()
        );

        Ok(Self {
            endpoint,
            dispatch: StreamDispatch::default(),
            router: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[async_trait]
impl TunnelHost for IrohHost {
    type Stream = IrohStream;

    fn node_id(&self) -> NodeId {
        self.endpoint.node_id()
    }

    fn local_addrs(&self) -> Vec<Transport> {
        let Some(addr) = self.endpoint.node_addr().get() else {
            return Vec::new();
        };
        addr.direct_addresses
            .iter()
            .copied()
            .map(Transport::Direct)
            .chain(addr.relay_url.map(Transport::Relay))
            .collect()
    }

    async fn addrs_updated(&self) {
        let mut watcher = self.endpoint.node_addr();
        let _ = watcher.updated().await;
    }

    fn connection_count(&self, peer: NodeId) -> usize {
        if !self.dispatch.has_live(peer) {
            return 0;
        }

        // A confirmed UDP path next to the relay path counts as a second connection
        match self.endpoint.conn_type(peer).map(|mut watcher| watcher.get()) {
            Some(ConnectionType::Direct(_)) => 2,
            _ => 1,
        }
    }

    async fn connect(&self, record: &PeerAddressRecord, protocol: &'static [u8]) -> TunnelResult<()> {
        let node_addr = record.to_node_addr().ok_or_else(|| {
            TunnelError::connect(&record.node_name, "address record holds no identity")
        })?;
        let key = (node_addr.node_id, protocol);

        if self.dispatch.live_connection(&key).is_some() {
            debug!("Reusing live connection to {}", record.node_name);
            return Ok(());
        }

        let conn = self
            .endpoint
            .connect(node_addr, protocol)
            .await
            .map_err(|e| TunnelError::connect(&record.node_name, e))?;

        debug!("Connected to {} ({})", record.node_name, key.0.fmt_short());
        self.dispatch.register(key, &conn);
        let dispatch = self.dispatch.clone();
        tokio::spawn(async move {
            dispatch.run(conn, key.0, protocol).await;
        });
        Ok(())
    }

    async fn open_stream(&self, peer: NodeId, protocol: &'static [u8]) -> TunnelResult<IrohStream> {
        let conn = self
            .dispatch
            .live_connection(&(peer, protocol))
            .ok_or_else(|| TunnelError::stream_open(peer, "no live connection"))?;

        let (send, recv) = conn
            .open_bi()
            .await
            .map_err(|e| TunnelError::stream_open(peer, e))?;
        Ok(IrohStream::new(send, recv))
    }

    async fn serve(
        &self,
        protocol: &'static [u8],
        handler: Arc<dyn StreamHandler<IrohStream>>,
    ) -> TunnelResult<()> {
        let mut router = self.router.lock();
        if router.is_some() {
            return Err(TunnelError::internal("a stream handler is already registered"));
        }

        self.dispatch.handlers.write().insert(protocol, handler);
        let acceptor = StreamAcceptor {
            protocol,
            dispatch: self.dispatch.clone(),
        };
        *router = Some(
            Router::builder(self.endpoint.clone())
                .accept(protocol, acceptor)
                .spawn(),
        );

        info!("Serving {}", String::from_utf8_lossy(protocol));
        Ok(())
    }

    async fn shutdown(&self) -> TunnelResult<()> {
        let router = self.router.lock().take();
        match router {
            Some(router) => router
                .shutdown()
                .await
                .map_err(|e| TunnelError::internal(format!("router shutdown failed: {}", e)))?,
            None => self.endpoint.close().await,
        }
        self.dispatch.connections.clear();
        self.dispatch.handlers.write().clear();
        Ok(())
    }
}

/// Live connections and the handlers their inbound streams go to
#[derive(Clone, Default)]
struct StreamDispatch {
    connections: Arc<DashMap<ConnectionKey, Connection>>,
    handlers: Arc<RwLock<HandlerMap>>,
}

impl StreamDispatch {
    fn live_connection(&self, key: &ConnectionKey) -> Option<Connection> {
        let conn = self.connections.get(key)?.value().clone();
        if conn.close_reason().is_some() {
            self.connections.remove(key);
            return None;
        }
        Some(conn)
    }

    fn has_live(&self, peer: NodeId) -> bool {
        self.connections
            .iter()
            .any(|entry| entry.key().0 == peer && entry.value().close_reason().is_none())
    }

    fn register(&self, key: ConnectionKey, conn: &Connection) {
        self.connections.insert(key, conn.clone());
    }

    /// Hand the streams of a registered connection to the handler of
    /// `protocol` until the connection closes.
    async fn run(&self, conn: Connection, remote: NodeId, protocol: &'static [u8]) {
        let key = (remote, protocol);
        let stable_id = conn.stable_id();

        loop {
            match conn.accept_bi().await {
                Ok((send, recv)) => {
                    let mut stream = IrohStream::new(send, recv);
                    let handler = self.handlers.read().get(protocol).cloned();
                    match handler {
                        Some(handler) => {
                            tokio::spawn(async move {
                                handler.handle_stream(stream, remote).await;
                            });
                        }
                        None => {
                            debug!("No handler for stream from {}", remote.fmt_short());
                            stream.reset();
                        }
                    }
                }
                Err(e) => {
                    debug!("Connection with {} closed: {}", remote.fmt_short(), e);
                    break;
                }
            }
        }

        self.connections
            .remove_if(&key, |_, live| live.stable_id() == stable_id);
    }
}

/// Accepts inbound connections of one protocol
#[derive(Clone)]
struct StreamAcceptor {
    protocol: &'static [u8],
    dispatch: StreamDispatch,
}

impl fmt::Debug for StreamAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamAcceptor")
            .field("protocol", &String::from_utf8_lossy(self.protocol))
            .finish()
    }
}

impl ProtocolHandler for StreamAcceptor {
    async fn accept(&self, connection: Connection) -> Result<(), AcceptError> {
        let remote = match connection.remote_node_id() {
            Ok(id) => id,
            Err(e) => {
                warn!("Dropping connection without peer identity: {}", e);
                return Ok(());
            }
        };

        // Inbound connections carry our streams to the peer as well
        debug!("Accepted connection from {}", remote.fmt_short());
        self.dispatch.register((remote, self.protocol), &connection);
        self.dispatch.run(connection, remote, self.protocol).await;
        Ok(())
    }
}
