//! Tunnel agent bootstrap
//!
//! Bootstrapping an edge node runs, in order:
//!
//! 1. load the node identity from the provisioned key file
//! 2. parse the `<node-id>@<relay-url>` relay server address
//! 3. bind the host, pinned to that relay and without discovery
//! 4. resolve the node name
//! 5. wait until the host holds a relay address
//! 6. publish the host's addresses into the directory
//! 7. serve the TCP proxy protocol
//!
//! Steps 1 to 3 are specific to iroh ([`TunnelAgent::bootstrap`]); steps 4 to
//! 7 run on any [`TunnelHost`] ([`TunnelAgent::start`]).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TunnelConfig;
use crate::directory::PeerDirectory;
use crate::error::{TunnelError, TunnelResult};
use crate::host::{has_relay_addr, IrohHost, IrohHostOptions, TunnelHost};
use crate::identity::load_secret_key;
use crate::protocol::{TcpProxyService, TCP_PROXY_ALPN};
use crate::types::{NodeName, Transport};

/// Wait until `host` holds a relay address and return its addresses.
///
/// Address change notifications end the wait early; `interval` bounds the
/// time between two checks. `deadline` of `None` waits forever.
pub async fn wait_for_relay<H>(
    host: &H,
    interval: Duration,
    deadline: Option<Duration>,
    cancel: &CancellationToken,
) -> TunnelResult<Vec<Transport>>
where
    H: TunnelHost + ?Sized,
{
    let ready = async {
        let mut checks = 0u64;
        loop {
            let addrs = host.local_addrs();
            if has_relay_addr(&addrs) {
                return addrs;
            }

            checks += 1;
            if checks == 1 {
                info!("Waiting for the relay connection of {}", host.node_id().fmt_short());
            } else {
                debug!("Relay not connected yet after {} checks", checks);
            }

            tokio::select! {
                _ = host.addrs_updated() => {}
                _ = tokio::time::sleep(interval) => {}
            }
        }
    };

    let bounded = async {
        match deadline {
            Some(limit) => tokio::time::timeout(limit, ready)
                .await
                .map_err(|_| TunnelError::timeout("waiting for the relay connection", limit)),
            None => Ok(ready.await),
        }
    };

    tokio::select! {
        result = bounded => result,
        _ = cancel.cancelled() => Err(TunnelError::cancelled("waiting for the relay connection")),
    }
}

/// A bootstrapped edge node
pub struct TunnelAgent<H: TunnelHost> {
    node_name: NodeName,
    host: Arc<H>,
    directory: Arc<PeerDirectory>,
    proxy: TcpProxyService<H>,
}

impl<H: TunnelHost> TunnelAgent<H> {
    /// Finish bootstrap on an already bound host.
    pub async fn start(
        host: Arc<H>,
        directory: Arc<PeerDirectory>,
        config: &TunnelConfig,
        cancel: &CancellationToken,
    ) -> TunnelResult<Self> {
        let node_name = config.agent.resolve_node_name()?;

        let addrs = wait_for_relay(
            host.as_ref(),
            config.agent.relay_check_interval,
            config.agent.relay_ready_deadline(),
            cancel,
        )
        .await?;
        info!("Node {} is connected to its relay", node_name);

        match directory.set(&node_name, host.node_id(), addrs).await {
            Ok(()) => {}
            // The record is still served from memory
            Err(e @ TunnelError::Store { .. }) => {
                warn!("Addresses of {} are not durable: {}", node_name, e);
            }
            Err(e) => return Err(e),
        }

        let proxy = TcpProxyService::new(host.clone(), directory.clone(), config.proxy.clone());
        host.serve(TCP_PROXY_ALPN, Arc::new(proxy.clone())).await?;
        info!("Tunnel agent {} is ready", node_name);

        Ok(Self {
            node_name,
            host,
            directory,
            proxy,
        })
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    pub fn proxy(&self) -> &TcpProxyService<H> {
        &self.proxy
    }

    /// See [`TcpProxyService::get_proxy_stream`]
    pub async fn get_proxy_stream(
        &self,
        node_name: &str,
        ip: &str,
        port: u16,
    ) -> TunnelResult<H::Stream> {
        self.proxy.get_proxy_stream(node_name, ip, port).await
    }

    pub async fn shutdown(&self) -> TunnelResult<()> {
        info!("Shutting down tunnel agent {}", self.node_name);
        self.host.shutdown().await
    }
}

impl TunnelAgent<IrohHost> {
    /// Bootstrap an edge node on iroh.
    pub async fn bootstrap(
        config: &TunnelConfig,
        directory: Arc<PeerDirectory>,
        cancel: &CancellationToken,
    ) -> TunnelResult<Self> {
        let secret_key = load_secret_key(&config.security.private_key_file)?;
        let relay = config.agent.relay_server()?;
        info!(
            "Tunnel agent uses relay {} operated by {}",
            relay.url,
            relay.node_id.fmt_short()
        );

        let host = IrohHost::bind(IrohHostOptions {
            secret_key,
            relay_url: Some(relay.url),
            listen_address: config.agent.listen_address,
        })
        .await?;

        Self::start(Arc::new(host), directory, config, cancel).await
    }
}

/// Holds the single agent of a process.
///
/// Concurrent callers of [`AgentCell::get_or_bootstrap`] share one bootstrap;
/// a failed bootstrap leaves the cell empty so a later call may retry.
pub struct AgentCell<H: TunnelHost> {
    agent: OnceCell<Arc<TunnelAgent<H>>>,
}

impl<H: TunnelHost> Default for AgentCell<H> {
    fn default() -> Self {
        Self {
            agent: OnceCell::new(),
        }
    }
}

impl<H: TunnelHost> AgentCell<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<TunnelAgent<H>>> {
        self.agent.get().cloned()
    }

    pub async fn get_or_bootstrap<F, Fut>(&self, bootstrap: F) -> TunnelResult<Arc<TunnelAgent<H>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TunnelResult<TunnelAgent<H>>>,
    {
        self.agent
            .get_or_try_init(|| async { bootstrap().await.map(Arc::new) })
            .await
            .cloned()
    }
}
