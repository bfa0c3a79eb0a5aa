//! Peer-to-peer host abstraction
//!
//! The tunnel only needs a handful of operations from the P2P layer: its own
//! identity and addresses, dialing a peer, opening a protocol-tagged stream,
//! registering a handler for inbound streams and counting live paths to a
//! peer. [`TunnelHost`] captures exactly that, so the proxy protocol and the
//! agent bootstrap run unchanged over iroh ([`IrohHost`]) and over the
//! in-process [`MemoryNetwork`] used by tests.

use async_trait::async_trait;
use iroh::NodeId;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TunnelResult;
use crate::types::{PeerAddressRecord, Transport};

pub mod iroh_host;
pub mod memory;

pub use iroh_host::{IrohHost, IrohHostOptions, IrohStream};
pub use memory::{MemoryHost, MemoryNetwork, MemoryStream};

/// Bidirectional byte stream opened over a peer connection
pub trait ProxyStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Abort both directions, signalling abnormal termination to the peer
    fn reset(&mut self);
}

/// Receives inbound streams of one protocol
#[async_trait]
pub trait StreamHandler<S: ProxyStream>: Send + Sync + 'static {
    async fn handle_stream(&self, stream: S, remote: NodeId);
}

/// The P2P host a tunnel agent runs on
#[async_trait]
pub trait TunnelHost: Send + Sync + 'static {
    type Stream: ProxyStream;

    fn node_id(&self) -> NodeId;

    /// Transports this host can currently be reached on
    fn local_addrs(&self) -> Vec<Transport>;

    /// Resolves once the local addresses may have changed
    async fn addrs_updated(&self);

    /// Number of live paths to `peer`, zero when not connected
    fn connection_count(&self, peer: NodeId) -> usize;

    /// Dial `record` for `protocol`, reusing a live connection when one exists
    async fn connect(&self, record: &PeerAddressRecord, protocol: &'static [u8]) -> TunnelResult<()>;

    /// Open a stream to an already connected peer
    async fn open_stream(&self, peer: NodeId, protocol: &'static [u8]) -> TunnelResult<Self::Stream>;

    /// Route inbound streams of `protocol` to `handler`
    async fn serve(
        &self,
        protocol: &'static [u8],
        handler: Arc<dyn StreamHandler<Self::Stream>>,
    ) -> TunnelResult<()>;

    async fn shutdown(&self) -> TunnelResult<()>;
}

/// Whether the host already holds a relay address
pub fn has_relay_addr(addrs: &[Transport]) -> bool {
    addrs.iter().any(Transport::is_relay)
}
