//! Tunnel server
//!
//! Runs the relay hop edge agents connect through. The relay listens on the
//! fixed server port, over TLS when enabled, and never proxies application
//! traffic itself. The server also binds an iroh endpoint carrying its
//! identity and reports the `<node-id>@<relay-url>` strings agents are
//! configured with.

use iroh::{NodeId, RelayUrl, Watcher as _};
use iroh_relay::server::{
    AccessConfig, CertConfig, Limits, RelayConfig, Server as RelayServer,
    ServerConfig as RelayServerConfig, TlsConfig,
};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::TunnelConfig;
use crate::error::{TunnelError, TunnelResult};
use crate::host::{IrohHost, IrohHostOptions, TunnelHost};
use crate::identity::{load_secret_key, relay_tls_config};
use crate::types::RelayServerAddr;

/// How long local interface discovery may take before advertising
const DISCOVERY_WAIT: Duration = Duration::from_secs(2);

/// Advertised relay sockets: discovered and configured IPs on the relay port,
/// first occurrence wins.
pub fn advertised_addrs(
    bound: SocketAddr,
    discovered: impl IntoIterator<Item = IpAddr>,
    configured: &[IpAddr],
) -> Vec<SocketAddr> {
    let mut addrs: Vec<SocketAddr> = Vec::new();
    let bound_ip = (!bound.ip().is_unspecified()).then(|| bound.ip());

    for ip in bound_ip
        .into_iter()
        .chain(discovered)
        .chain(configured.iter().copied())
    {
        let addr = SocketAddr::new(ip, bound.port());
        if !ip.is_unspecified() && !addrs.contains(&addr) {
            addrs.push(addr);
        }
    }
    addrs
}

/// A running relay server
pub struct TunnelServer {
    relay: RelayServer,
    host: IrohHost,
    relay_addr: SocketAddr,
    advertised: Vec<RelayServerAddr>,
}

impl TunnelServer {
    /// Start the relay and the server endpoint.
    pub async fn start(config: &TunnelConfig) -> TunnelResult<Self> {
        let secret_key = load_secret_key(&config.security.private_key_file)?;
        let bind_addr = config.server.bind_addr();
        let tls_enabled = config.security.tls_enabled;

        let relay_config = if tls_enabled {
            let tls = relay_tls_config(&config.security)?;
            // Plain HTTP only serves captive portal probes next to TLS
            let side_port = SocketAddr::new(bind_addr.ip(), 0);
            RelayConfig {
                http_bind_addr: side_port,
                tls: Some(TlsConfig {
                    https_bind_addr: bind_addr,
                    quic_bind_addr: side_port,
                    cert: CertConfig::Manual { certs: tls.certs },
                    server_config: tls.server_config,
                }),
                limits: Limits::default(),
                key_cache_capacity: None,
                access: AccessConfig::Everyone,
            }
        } else {
            info!("Relay transport security is disabled");
            RelayConfig {
                http_bind_addr: bind_addr,
                tls: None,
                limits: Limits::default(),
                key_cache_capacity: None,
                access: AccessConfig::Everyone,
            }
        };

        let relay = RelayServer::spawn(RelayServerConfig::<(), ()> {
            relay: Some(relay_config),
            ..Default::default()
        })
        .await
        .map_err(|e| {
            TunnelError::configuration(
                "server.listen_port",
                format!("failed to start relay on {}: {}", bind_addr, e),
            )
        })?;

        let relay_addr = if tls_enabled {
            relay.https_addr()
        } else {
            relay.http_addr()
        }
        .ok_or_else(|| TunnelError::internal("relay started without a listener"))?;

        let host = IrohHost::bind(IrohHostOptions {
            secret_key,
            relay_url: None,
            listen_address: SocketAddr::new(bind_addr.ip(), 0),
        })
        .await?;

        let discovered = discover_ips(&host).await;
        let scheme = if tls_enabled { "https" } else { "http" };
        let advertised = advertised_addrs(relay_addr, discovered, &config.server.advertise_addresses)
            .into_iter()
            .map(|addr| relay_url(scheme, addr).map(|url| RelayServerAddr {
                node_id: host.node_id(),
                url,
            }))
            .collect::<TunnelResult<Vec<_>>>()?;

        info!("Tunnel server {} relaying on {}", host.node_id(), relay_addr);
        for addr in &advertised {
            info!("Agents may use relay server {}", addr);
        }

        Ok(Self {
            relay,
            host,
            relay_addr,
            advertised,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.host.node_id()
    }

    /// Socket the relay listens on
    pub fn relay_addr(&self) -> SocketAddr {
        self.relay_addr
    }

    /// Relay server addresses to configure agents with
    pub fn advertised(&self) -> &[RelayServerAddr] {
        &self.advertised
    }

    pub async fn shutdown(self) -> TunnelResult<()> {
        info!("Shutting down tunnel server {}", self.host.node_id().fmt_short());
        self.host.shutdown().await?;
        self.relay
            .shutdown()
            .await
            .map_err(|e| TunnelError::internal(format!("relay shutdown failed: {}", e)))
    }
}

fn relay_url(scheme: &str, addr: SocketAddr) -> TunnelResult<RelayUrl> {
    let url = format!("{}://{}", scheme, addr);
    url.parse()
        .map_err(|e| TunnelError::invalid_config("server.advertise_addresses", &url, &format!("{}", e)))
}

/// IPs of the local interfaces, as found by the endpoint
async fn discover_ips(host: &IrohHost) -> Vec<IpAddr> {
    let mut watcher = host.endpoint().node_addr();
    let found = tokio::time::timeout(DISCOVERY_WAIT, async {
        loop {
            if let Some(addr) = watcher.get() {
                if !addr.direct_addresses.is_empty() {
                    return addr.direct_addresses;
                }
            }
            if watcher.updated().await.is_err() {
                return Default::default();
            }
        }
    })
    .await
    .unwrap_or_default();

    debug!("Discovered {} local addresses", found.len());
    found.into_iter().map(|addr| addr.ip()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advertised_addrs_are_deduplicated_on_the_relay_port() {
        let bound: SocketAddr = "10.0.0.1:10006".parse().unwrap();
        let discovered: Vec<IpAddr> = vec!["10.0.0.1".parse().unwrap(), "192.168.1.2".parse().unwrap()];
        let configured: Vec<IpAddr> = vec!["203.0.113.7".parse().unwrap(), "192.168.1.2".parse().unwrap()];

        assert_eq!(
            advertised_addrs(bound, discovered, &configured),
            vec![
                "10.0.0.1:10006".parse::<SocketAddr>().unwrap(),
                "192.168.1.2:10006".parse().unwrap(),
                "203.0.113.7:10006".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn test_unspecified_bind_ip_is_not_advertised() {
        let bound: SocketAddr = "0.0.0.0:10006".parse().unwrap();
        let configured: Vec<IpAddr> = vec!["203.0.113.7".parse().unwrap()];
        assert_eq!(
            advertised_addrs(bound, Vec::new(), &configured),
            vec!["203.0.113.7:10006".parse::<SocketAddr>().unwrap()]
        );
    }

    #[test]
    fn test_relay_url_formats_ipv6() {
        let url = relay_url("http", "[::1]:10006".parse().unwrap()).unwrap();
        assert_eq!(url.port(), Some(10006));
    }
}
