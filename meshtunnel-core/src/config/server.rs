//! Tunnel server (relay) configuration

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

use super::defaults::*;
use super::parse_env;
use crate::error::{TunnelError, TunnelResult};

/// Tunnel server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP the relay listener binds
    pub bind_ip: IpAddr,

    /// Fixed relay port, shared by every advertised address
    pub listen_port: u16,

    /// Extra public IPs to advertise on the listen port
    pub advertise_addresses: Vec<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::from([0, 0, 0, 0]),
            listen_port: DEFAULT_LISTEN_PORT,
            advertise_addresses: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load server configuration from environment variables
    pub fn from_env() -> TunnelResult<Self> {
        let mut config = Self::default();

        if let Some(ip) = parse_env("MESHTUNNEL_SERVER_BIND_IP")? {
            config.bind_ip = ip;
        }

        if let Some(port) = parse_env("MESHTUNNEL_SERVER_LISTEN_PORT")? {
            config.listen_port = port;
        }

        // Comma separated list
        if let Ok(list) = std::env::var("MESHTUNNEL_SERVER_ADVERTISE_ADDRESSES") {
            config.advertise_addresses = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<IpAddr>())
                .collect::<Result<_, _>>()?;
        }

        Ok(config)
    }

    /// Validate server configuration
    pub fn validate(&self) -> TunnelResult<()> {
        if self.listen_port == 0 {
            return Err(TunnelError::configuration(
                "server.listen_port",
                "relay needs a fixed port agents can be configured with",
            ));
        }

        if let Some(ip) = self.advertise_addresses.iter().find(|ip| ip.is_unspecified()) {
            return Err(TunnelError::invalid_config(
                "server.advertise_addresses",
                ip,
                "unspecified address cannot be advertised",
            ));
        }

        Ok(())
    }

    /// Socket the relay binds
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.listen_port)
    }

    /// Configured advertise addresses paired with the listen port
    pub fn configured_advertise_addrs(&self) -> Vec<SocketAddr> {
        self.advertise_addresses
            .iter()
            .map(|ip| SocketAddr::new(*ip, self.listen_port))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr().to_string(), DEFAULT_LISTEN_ADDRESS);
    }

    #[test]
    fn test_advertise_addresses_use_listen_port() {
        let config = ServerConfig {
            listen_port: 20006,
            advertise_addresses: vec!["203.0.113.7".parse().unwrap()],
            ..Default::default()
        };
        assert_eq!(
            config.configured_advertise_addrs(),
            vec!["203.0.113.7:20006".parse::<SocketAddr>().unwrap()]
        );
    }

    #[test]
    fn test_rejects_port_zero_and_unspecified_advertise() {
        let config = ServerConfig {
            listen_port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            advertise_addresses: vec!["0.0.0.0".parse().unwrap()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
