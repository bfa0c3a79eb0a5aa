//! Local TCP forwarder
//!
//! Accepts TCP connections on a local socket and carries each one through a
//! fresh proxy stream to a fixed target behind a remote node.

use std::fmt;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TunnelResult;
use crate::host::TunnelHost;
use crate::protocol::{ProxySession, TcpProxyService};
use crate::types::NodeName;

/// Service a forwarder connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub node_name: NodeName,
    pub ip: String,
    pub port: u16,
}

impl fmt::Display for ForwardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} via {}", self.ip, self.port, self.node_name)
    }
}

pub struct TcpForwarder<H: TunnelHost> {
    listener: TcpListener,
    proxy: TcpProxyService<H>,
    target: ForwardTarget,
}

impl<H: TunnelHost> TcpForwarder<H> {
    pub async fn bind(
        addr: SocketAddr,
        proxy: TcpProxyService<H>,
        target: ForwardTarget,
    ) -> TunnelResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Forwarding {} to {}", listener.local_addr()?, target);
        Ok(Self {
            listener,
            proxy,
            target,
        })
    }

    pub fn local_addr(&self) -> TunnelResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `cancel` fires.
    ///
    /// Sessions already running are not interrupted by cancellation.
    pub async fn run(self, cancel: CancellationToken) -> TunnelResult<()> {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Forwarder for {} stopping", self.target);
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, peer)) => {
                    debug!("Accepted {} for {}", peer, self.target);
                    let proxy = self.proxy.clone();
                    let target = self.target.clone();
                    tokio::spawn(async move { forward(proxy, target, socket, peer).await });
                }
                Err(e) => warn!("Failed to accept a connection: {}", e),
            }
        }
    }
}

async fn forward<H: TunnelHost>(
    proxy: TcpProxyService<H>,
    target: ForwardTarget,
    socket: TcpStream,
    peer: SocketAddr,
) {
    let stream = match proxy
        .get_proxy_stream(&target.node_name, &target.ip, target.port)
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Cannot forward {} to {}: {}", peer, target, e);
            return;
        }
    };

    let label = format!("{}->{}", peer, target);
    ProxySession::new(label, stream, socket, proxy.config().half_close_timeout)
        .run()
        .await;
}
