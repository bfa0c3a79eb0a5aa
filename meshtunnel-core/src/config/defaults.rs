//! Default configuration values for meshtunnel
//!
//! This module centralizes all default values to make them easy to find and modify.

use std::time::Duration;

// Agent defaults
pub const DEFAULT_LISTEN_PORT: u16 = 10006;
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:10006";
pub const DEFAULT_RELAY_CHECK_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_RELAY_READY_TIMEOUT_SECS: u64 = 300; // 5 minutes
pub const NODE_NAME_ENV: &str = "MY_NODE_NAME";

// Server defaults
pub const DEFAULT_SERVER_BIND_IP: &str = "0.0.0.0";

// Directory defaults
pub const DEFAULT_NAMESPACE: &str = "kubeedge";
pub const DEFAULT_RECORD_NAME: &str = "edgemeshagentsecret";
pub const DEFAULT_EVENT_BUFFER: usize = 64;

// Proxy defaults
pub const DEFAULT_DIAL_ATTEMPTS: u32 = 5;
pub const DEFAULT_DIAL_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MESSAGE_READ_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_HALF_CLOSE_TIMEOUT_SECS: u64 = 30;

// Security defaults
pub const DEFAULT_CA_FILE: &str = "/etc/kubeedge/edgemesh/ca/rootCA.crt";
pub const DEFAULT_CERT_FILE: &str = "/etc/kubeedge/edgemesh/certs/server.crt";
pub const DEFAULT_KEY_FILE: &str = "/etc/kubeedge/edgemesh/certs/server.key";

// Helper functions for Duration creation
pub const fn duration_ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

pub const fn duration_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
