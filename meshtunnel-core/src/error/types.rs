//! Core error types for meshtunnel

use thiserror::Error;

/// Error type for every meshtunnel operation
#[derive(Error, Debug)]
pub enum TunnelError {
    // Startup
    #[error("Configuration error in {component}: {message}")]
    Configuration { component: String, message: String },

    // Directory
    #[error("Failed to encode addresses for {node_name}: {message}")]
    Encoding { node_name: String, message: String },

    #[error("Failed to decode addresses for {node_name}: {message}")]
    Decoding { node_name: String, message: String },

    #[error("No address record for node {node_name}")]
    AddressNotFound { node_name: String },

    #[error("Address store operation '{operation}' failed")]
    Store {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // Proxy attempt
    #[error("Cannot resolve address of node {node_name}")]
    AddressResolution {
        node_name: String,
        #[source]
        source: Box<TunnelError>,
    },

    #[error("Failed to connect to peer {peer}: {details}")]
    Connect { peer: String, details: String },

    #[error("Failed to open stream to peer {peer}: {details}")]
    StreamOpen { peer: String, details: String },

    #[error("Protocol violation: {message}")]
    Protocol { message: String },

    #[error("Node {node_name} refused to proxy {target}")]
    ProxyRefused { node_name: String, target: String },

    #[error("Target {target} unreachable after {attempts} attempts: {last_error}")]
    DialExhausted {
        target: String,
        attempts: u32,
        last_error: String,
    },

    // Operational
    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type TunnelResult<T> = std::result::Result<T, TunnelError>;
