//! TCP proxy protocol configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;
use super::{parse_duration_secs_from_env, parse_env};
use crate::error::{TunnelError, TunnelResult};

/// TCP proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Attempts made to dial the requested target before answering FAILED
    pub dial_attempts: u32,

    /// Bound on each individual dial attempt
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,

    /// Bound on reading a single proxy message
    #[serde(with = "humantime_serde")]
    pub message_read_timeout: Duration,

    /// Idle time the remaining direction of a session may spend after the other one finished
    #[serde(with = "humantime_serde")]
    pub half_close_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            dial_attempts: DEFAULT_DIAL_ATTEMPTS,
            dial_timeout: duration_secs(DEFAULT_DIAL_TIMEOUT_SECS),
            message_read_timeout: duration_secs(DEFAULT_MESSAGE_READ_TIMEOUT_SECS),
            half_close_timeout: duration_secs(DEFAULT_HALF_CLOSE_TIMEOUT_SECS),
        }
    }
}

impl ProxyConfig {
    /// Load proxy configuration from environment variables
    pub fn from_env() -> TunnelResult<Self> {
        let mut config = Self::default();

        if let Some(attempts) = parse_env("MESHTUNNEL_DIAL_ATTEMPTS")? {
            config.dial_attempts = attempts;
        }

        config.dial_timeout =
            parse_duration_secs_from_env("MESHTUNNEL_DIAL_TIMEOUT_SECS", config.dial_timeout);

        config.message_read_timeout = parse_duration_secs_from_env(
            "MESHTUNNEL_MESSAGE_READ_TIMEOUT_SECS",
            config.message_read_timeout,
        );

        config.half_close_timeout = parse_duration_secs_from_env(
            "MESHTUNNEL_HALF_CLOSE_TIMEOUT_SECS",
            config.half_close_timeout,
        );

        Ok(config)
    }

    /// Validate proxy configuration
    pub fn validate(&self) -> TunnelResult<()> {
        if self.dial_attempts == 0 {
            return Err(TunnelError::configuration(
                "proxy.dial_attempts",
                "must be at least 1",
            ));
        }

        if self.dial_timeout.is_zero() {
            return Err(TunnelError::configuration(
                "proxy.dial_timeout",
                "must be greater than zero",
            ));
        }

        if self.message_read_timeout.is_zero() {
            return Err(TunnelError::configuration(
                "proxy.message_read_timeout",
                "must be greater than zero",
            ));
        }

        Ok(())
    }
}
