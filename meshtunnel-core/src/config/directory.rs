//! Peer address directory configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults::*;
use super::parse_env;
use crate::error::{TunnelError, TunnelResult};

/// Peer address directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Namespace the address records live in
    pub namespace: String,

    /// Name of the shared record holding every node's addresses
    pub record_name: String,

    /// Durable store location; an in-memory store is used when unset
    pub db_path: Option<PathBuf>,

    /// Capacity of the store change-event channel
    pub event_buffer: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            record_name: DEFAULT_RECORD_NAME.to_string(),
            db_path: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl DirectoryConfig {
    /// Load directory configuration from environment variables
    pub fn from_env() -> TunnelResult<Self> {
        let mut config = Self::default();

        if let Ok(ns) = std::env::var("MESHTUNNEL_NAMESPACE") {
            config.namespace = ns;
        }

        if let Ok(name) = std::env::var("MESHTUNNEL_RECORD_NAME") {
            config.record_name = name;
        }

        if let Ok(path) = std::env::var("MESHTUNNEL_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(buffer) = parse_env("MESHTUNNEL_EVENT_BUFFER")? {
            config.event_buffer = buffer;
        }

        Ok(config)
    }

    /// Validate directory configuration
    pub fn validate(&self) -> TunnelResult<()> {
        for (field, value) in [
            ("directory.namespace", &self.namespace),
            ("directory.record_name", &self.record_name),
        ] {
            if value.is_empty() {
                return Err(TunnelError::configuration(field, "cannot be empty"));
            }
            // '/' separates the scope parts of a store key
            if value.contains('/') {
                return Err(TunnelError::invalid_config(field, value, "must not contain '/'"));
            }
        }

        if self.event_buffer == 0 {
            return Err(TunnelError::configuration(
                "directory.event_buffer",
                "must be at least 1",
            ));
        }

        Ok(())
    }
}
