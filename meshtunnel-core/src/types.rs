//! Core types shared across the tunnel
//!
//! A [`PeerAddressRecord`] is everything another node needs to dial a peer:
//! every reachable transport address, each tagged with the owner's [`NodeId`].

use iroh::{NodeAddr, NodeId, RelayUrl};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::{TunnelError, TunnelResult};

/// Cluster-unique node name, stable across restarts
pub type NodeName = String;

/// How traffic to a peer currently flows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionMode {
    /// A punched path exists next to the relay path
    Direct,
    /// Only the relay path is known, or nothing at all
    Relay,
}

impl ConnectionMode {
    /// Two or more concurrent paths mean hole punching succeeded.
    pub fn from_connection_count(count: usize) -> Self {
        if count >= 2 {
            ConnectionMode::Direct
        } else {
            ConnectionMode::Relay
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionMode::Direct => "direct",
            ConnectionMode::Relay => "relay",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One way of reaching a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    /// UDP socket address, possibly punched
    Direct(SocketAddr),
    /// Home relay of the peer
    Relay(RelayUrl),
}

impl Transport {
    pub fn is_relay(&self) -> bool {
        matches!(self, Transport::Relay(_))
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Direct(addr) => write!(f, "udp/{}", addr),
            Transport::Relay(url) => write!(f, "relay/{}", url),
        }
    }
}

/// A transport address carrying the identity it leads to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TunnelAddr {
    pub transport: Transport,
    pub node_id: NodeId,
}

impl TunnelAddr {
    pub fn new(transport: Transport, node_id: NodeId) -> Self {
        Self { transport, node_id }
    }
}

impl fmt::Display for TunnelAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/node/{}", self.transport, self.node_id)
    }
}

/// All known addresses of one node, sufficient to dial it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddressRecord {
    pub node_name: NodeName,
    pub addresses: Vec<TunnelAddr>,
}

impl PeerAddressRecord {
    /// Tag every transport with `node_id`.
    pub fn new(
        node_name: impl Into<NodeName>,
        node_id: NodeId,
        transports: impl IntoIterator<Item = Transport>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            addresses: transports
                .into_iter()
                .map(|transport| TunnelAddr::new(transport, node_id))
                .collect(),
        }
    }

    /// Serialized form stored in the directory and the durable store
    pub fn encode(&self) -> TunnelResult<Vec<u8>> {
        if self.addresses.is_empty() {
            return Err(TunnelError::encoding(&self.node_name, "no addresses to publish"));
        }
        bincode::serialize(&self.addresses).map_err(|e| TunnelError::encoding(&self.node_name, e))
    }

    /// Parse stored bytes; the result always names exactly one identity.
    pub fn decode(node_name: impl Into<NodeName>, bytes: &[u8]) -> TunnelResult<Self> {
        let node_name = node_name.into();
        let addresses: Vec<TunnelAddr> =
            bincode::deserialize(bytes).map_err(|e| TunnelError::decoding(&node_name, e))?;

        let Some(first) = addresses.first() else {
            return Err(TunnelError::decoding(&node_name, "record holds no addresses"));
        };
        if addresses.iter().any(|addr| addr.node_id != first.node_id) {
            return Err(TunnelError::decoding(
                &node_name,
                "record mixes addresses of several identities",
            ));
        }

        Ok(Self {
            node_name,
            addresses,
        })
    }

    /// Identity every address leads to
    pub fn node_id(&self) -> Option<NodeId> {
        self.addresses.first().map(|addr| addr.node_id)
    }

    pub fn relay_url(&self) -> Option<&RelayUrl> {
        self.addresses.iter().find_map(|addr| match &addr.transport {
            Transport::Relay(url) => Some(url),
            Transport::Direct(_) => None,
        })
    }

    pub fn direct_addrs(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.addresses.iter().filter_map(|addr| match addr.transport {
            Transport::Direct(socket) => Some(socket),
            Transport::Relay(_) => None,
        })
    }

    /// Dialable iroh address
    pub fn to_node_addr(&self) -> Option<NodeAddr> {
        let node_id = self.node_id()?;
        Some(NodeAddr::from_parts(
            node_id,
            self.relay_url().cloned(),
            self.direct_addrs(),
        ))
    }
}

/// Relay server address in `<node-id>@<relay-url>` form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayServerAddr {
    pub node_id: NodeId,
    pub url: RelayUrl,
}

impl FromStr for RelayServerAddr {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, url) = s.trim().split_once('@').ok_or_else(|| {
            TunnelError::invalid_config("agent.relay_server", s, "expected <node-id>@<relay-url>")
        })?;

        let node_id = id.parse::<NodeId>().map_err(|e| {
            TunnelError::invalid_config("agent.relay_server", id, &e.to_string())
        })?;
        let url = url.parse::<RelayUrl>().map_err(|e| {
            TunnelError::invalid_config("agent.relay_server", url, &e.to_string())
        })?;

        Ok(Self { node_id, url })
    }
}

impl fmt::Display for RelayServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.node_id, self.url)
    }
}
