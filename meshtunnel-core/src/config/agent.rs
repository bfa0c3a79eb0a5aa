//! Tunnel agent configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use super::defaults::*;
use super::{parse_duration_secs_from_env, parse_env};
use crate::error::{TunnelError, TunnelResult};
use crate::types::RelayServerAddr;

/// Tunnel agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Name this node publishes its addresses under.
    ///
    /// Falls back to the `MY_NODE_NAME` environment variable when unset.
    pub node_name: Option<String>,

    /// Relay server in `<node-id>@<relay-url>` form
    pub relay_server: String,

    /// Local socket the agent endpoint binds
    pub listen_address: SocketAddr,

    /// How often relay readiness is rechecked without an address change
    #[serde(with = "humantime_serde")]
    pub relay_check_interval: Duration,

    /// Upper bound on the relay readiness wait, zero waits forever
    #[serde(with = "humantime_serde")]
    pub relay_ready_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: None,
            relay_server: String::new(),
            listen_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_LISTEN_PORT)),
            relay_check_interval: duration_secs(DEFAULT_RELAY_CHECK_INTERVAL_SECS),
            relay_ready_timeout: duration_secs(DEFAULT_RELAY_READY_TIMEOUT_SECS),
        }
    }
}

impl AgentConfig {
    /// Load agent configuration from environment variables
    pub fn from_env() -> TunnelResult<Self> {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("MESHTUNNEL_NODE_NAME") {
            config.node_name = Some(name);
        }

        if let Ok(server) = std::env::var("MESHTUNNEL_RELAY_SERVER") {
            config.relay_server = server;
        }

        if let Some(addr) = parse_env("MESHTUNNEL_LISTEN_ADDRESS")? {
            config.listen_address = addr;
        }

        config.relay_check_interval = parse_duration_secs_from_env(
            "MESHTUNNEL_RELAY_CHECK_INTERVAL_SECS",
            config.relay_check_interval,
        );

        config.relay_ready_timeout = parse_duration_secs_from_env(
            "MESHTUNNEL_RELAY_READY_TIMEOUT_SECS",
            config.relay_ready_timeout,
        );

        Ok(config)
    }

    /// Validate agent configuration
    pub fn validate(&self) -> TunnelResult<()> {
        if let Some(name) = &self.node_name {
            if name.trim().is_empty() {
                return Err(TunnelError::invalid_config(
                    "agent.node_name",
                    name,
                    "must not be blank",
                ));
            }
        }

        // An empty relay server is only rejected when an agent is actually started
        if !self.relay_server.is_empty() {
            self.relay_server()?;
        }

        if self.relay_check_interval < Duration::from_millis(10) {
            return Err(TunnelError::configuration(
                "agent.relay_check_interval",
                "too small (min 10ms)",
            ));
        }

        Ok(())
    }

    /// Parsed relay server address
    pub fn relay_server(&self) -> TunnelResult<RelayServerAddr> {
        if self.relay_server.is_empty() {
            return Err(TunnelError::configuration(
                "agent.relay_server",
                "relay server address is not configured",
            ));
        }
        self.relay_server.parse()
    }

    /// Configured node name, or `MY_NODE_NAME` from the environment
    pub fn resolve_node_name(&self) -> TunnelResult<String> {
        if let Some(name) = &self.node_name {
            return Ok(name.clone());
        }

        match std::env::var(NODE_NAME_ENV) {
            Ok(name) if !name.trim().is_empty() => Ok(name),
            _ => Err(TunnelError::configuration(
                "agent.node_name",
                format!("node name is not configured and {} is not set", NODE_NAME_ENV),
            )),
        }
    }

    /// Relay readiness bound, `None` meaning no bound
    pub fn relay_ready_deadline(&self) -> Option<Duration> {
        if self.relay_ready_timeout.is_zero() {
            None
        } else {
            Some(self.relay_ready_timeout)
        }
    }
}
