//! Certificate and key configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults::*;
use super::parse_env;
use crate::error::{TunnelError, TunnelResult};

/// Certificate and key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Serve the relay over TLS
    pub tls_enabled: bool,

    /// CA bundle used to verify client certificates
    pub ca_file: PathBuf,

    /// Certificate chain presented by the relay
    pub cert_file: PathBuf,

    /// PEM private key; also the source of the node identity
    pub private_key_file: PathBuf,

    /// Require relay clients to present a certificate signed by the CA
    pub require_client_auth: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            tls_enabled: true,
            ca_file: PathBuf::from(DEFAULT_CA_FILE),
            cert_file: PathBuf::from(DEFAULT_CERT_FILE),
            private_key_file: PathBuf::from(DEFAULT_KEY_FILE),
            require_client_auth: false,
        }
    }
}

impl SecurityConfig {
    /// Load security configuration from environment variables
    pub fn from_env() -> TunnelResult<Self> {
        let mut config = Self::default();

        if let Some(enabled) = parse_env("MESHTUNNEL_TLS_ENABLED")? {
            config.tls_enabled = enabled;
        }

        if let Ok(path) = std::env::var("MESHTUNNEL_CA_FILE") {
            config.ca_file = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("MESHTUNNEL_CERT_FILE") {
            config.cert_file = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("MESHTUNNEL_KEY_FILE") {
            config.private_key_file = PathBuf::from(path);
        }

        if let Some(required) = parse_env("MESHTUNNEL_REQUIRE_CLIENT_AUTH")? {
            config.require_client_auth = required;
        }

        Ok(config)
    }

    /// Validate security configuration
    pub fn validate(&self) -> TunnelResult<()> {
        if self.private_key_file.as_os_str().is_empty() {
            return Err(TunnelError::configuration(
                "security.private_key_file",
                "cannot be empty",
            ));
        }

        if self.tls_enabled && self.cert_file.as_os_str().is_empty() {
            return Err(TunnelError::configuration(
                "security.cert_file",
                "required when TLS is enabled",
            ));
        }

        if self.require_client_auth {
            if !self.tls_enabled {
                return Err(TunnelError::configuration(
                    "security.require_client_auth",
                    "client authentication needs TLS",
                ));
            }
            if self.ca_file.as_os_str().is_empty() {
                return Err(TunnelError::configuration(
                    "security.ca_file",
                    "required for client authentication",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_security_config() {
        let config = SecurityConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.tls_enabled);
        assert!(!config.require_client_auth);
    }

    #[test]
    fn test_client_auth_requires_tls() {
        let config = SecurityConfig {
            tls_enabled: false,
            require_client_auth: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
