//! Configuration for meshtunnel
//!
//! Every section carries sensible defaults, can be overridden from
//! `MESHTUNNEL_*` environment variables and is validated before use. A TOML
//! file may be used instead of the environment; missing keys keep their
//! defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{TunnelError, TunnelResult};

pub mod agent;
pub mod defaults;
pub mod directory;
pub mod proxy;
pub mod security;
pub mod server;

pub use agent::AgentConfig;
pub use defaults::*;
pub use directory::DirectoryConfig;
pub use proxy::ProxyConfig;
pub use security::SecurityConfig;
pub use server::ServerConfig;

/// Root configuration structure for meshtunnel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Edge agent settings
    pub agent: AgentConfig,

    /// Relay server settings
    pub server: ServerConfig,

    /// Peer address directory settings
    pub directory: DirectoryConfig,

    /// TCP proxy settings
    pub proxy: ProxyConfig,

    /// Certificates and keys
    pub security: SecurityConfig,
}

impl TunnelConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> TunnelResult<Self> {
        let config = Self {
            agent: AgentConfig::from_env()?,
            server: ServerConfig::from_env()?,
            directory: DirectoryConfig::from_env()?,
            proxy: ProxyConfig::from_env()?,
            security: SecurityConfig::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> TunnelResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TunnelError::configuration(
                "config_file",
                format!("Failed to read {}: {}", path.display(), e),
            )
        })?;

        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> TunnelResult<()> {
        self.agent.validate()?;
        self.server.validate()?;
        self.directory.validate()?;
        self.proxy.validate()?;
        self.security.validate()?;
        Ok(())
    }

    /// Create a test configuration with minimal settings
    pub fn test() -> Self {
        let mut config = Self::default();
        config.agent.node_name = Some("test-node".to_string());
        config.agent.listen_address = std::net::SocketAddr::from(([127, 0, 0, 1], 0));
        config.agent.relay_check_interval = Duration::from_millis(50);
        config.agent.relay_ready_timeout = Duration::from_secs(5);
        config.server.bind_ip = std::net::IpAddr::from([127, 0, 0, 1]);
        config.security.tls_enabled = false;
        config.security.private_key_file = PathBuf::from("/tmp/meshtunnel-test/node.key");
        config.proxy.dial_attempts = 2;
        config.proxy.dial_timeout = Duration::from_millis(500);
        config.proxy.half_close_timeout = Duration::from_secs(2);
        config
    }
}

/// Builder for TunnelConfig
pub struct TunnelConfigBuilder {
    config: TunnelConfig,
}

impl TunnelConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: TunnelConfig::default(),
        }
    }

    pub fn node_name(mut self, name: impl Into<String>) -> Self {
        self.config.agent.node_name = Some(name.into());
        self
    }

    pub fn relay_server(mut self, server: impl Into<String>) -> Self {
        self.config.agent.relay_server = server.into();
        self
    }

    pub fn agent(mut self, agent: AgentConfig) -> Self {
        self.config.agent = agent;
        self
    }

    pub fn server(mut self, server: ServerConfig) -> Self {
        self.config.server = server;
        self
    }

    pub fn directory(mut self, directory: DirectoryConfig) -> Self {
        self.config.directory = directory;
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = proxy;
        self
    }

    pub fn security(mut self, security: SecurityConfig) -> Self {
        self.config.security = security;
        self
    }

    pub fn build(self) -> TunnelResult<TunnelConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for TunnelConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse an environment variable, `None` when it is unset
pub(crate) fn parse_env<T: FromStr>(key: &str) -> TunnelResult<Option<T>> {
    match std::env::var(key) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| TunnelError::invalid_config(key, val, "cannot be parsed")),
        Err(_) => Ok(None),
    }
}

pub(crate) fn parse_duration_secs_from_env(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config_validation() {
        assert!(TunnelConfig::default().validate().is_ok());
        assert!(TunnelConfig::test().validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = TunnelConfigBuilder::new()
            .node_name("edge-1")
            .proxy(ProxyConfig {
                dial_attempts: 3,
                ..Default::default()
            })
            .build()
            .unwrap();

        assert_eq!(config.agent.node_name.as_deref(), Some("edge-1"));
        assert_eq!(config.proxy.dial_attempts, 3);
    }

    #[test]
    fn test_builder_rejects_invalid_section() {
        let result = TunnelConfigBuilder::new()
            .relay_server("garbage")
            .build();
        assert!(matches!(result, Err(TunnelError::Configuration { .. })));
    }

    #[test]
    fn test_from_file_keeps_defaults_for_missing_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[agent]
node_name = "edge-3"
relay_ready_timeout = "30s"

[proxy]
dial_timeout = "2s"
"#
        )
        .unwrap();

        let config = TunnelConfig::from_file(file.path()).unwrap();
        assert_eq!(config.agent.node_name.as_deref(), Some("edge-3"));
        assert_eq!(config.agent.relay_ready_timeout, Duration::from_secs(30));
        assert_eq!(config.proxy.dial_timeout, Duration::from_secs(2));
        assert_eq!(config.proxy.dial_attempts, DEFAULT_DIAL_ATTEMPTS);
        assert_eq!(config.directory.namespace, DEFAULT_NAMESPACE);
    }

    #[test]
    fn test_from_file_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent\nnode_name = ").unwrap();
        assert!(matches!(
            TunnelConfig::from_file(file.path()),
            Err(TunnelError::Configuration { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("MESHTUNNEL_DIAL_ATTEMPTS", "7");
        std::env::set_var("MESHTUNNEL_NAMESPACE", "edge-system");
        let config = TunnelConfig::from_env();
        std::env::remove_var("MESHTUNNEL_DIAL_ATTEMPTS");
        std::env::remove_var("MESHTUNNEL_NAMESPACE");

        let config = config.unwrap();
        assert_eq!(config.proxy.dial_attempts, 7);
        assert_eq!(config.directory.namespace, "edge-system");
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_unparsable_value() {
        std::env::set_var("MESHTUNNEL_DIAL_ATTEMPTS", "many");
        let result = TunnelConfig::from_env();
        std::env::remove_var("MESHTUNNEL_DIAL_ATTEMPTS");
        assert!(result.is_err());
    }
}
