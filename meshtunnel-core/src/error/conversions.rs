//! Error conversion implementations for TunnelError
//!
//! Conversions that need more context than the source error carries (the node
//! name of an encoding failure, for example) go through the constructors
//! instead.

use super::types::TunnelError;

// Storage error conversions
impl From<redb::DatabaseError> for TunnelError {
    fn from(err: redb::DatabaseError) -> Self {
        TunnelError::store("open_database", err)
    }
}

impl From<redb::TransactionError> for TunnelError {
    fn from(err: redb::TransactionError) -> Self {
        TunnelError::store("transaction", err)
    }
}

impl From<redb::TableError> for TunnelError {
    fn from(err: redb::TableError) -> Self {
        TunnelError::store("open_table", err)
    }
}

impl From<redb::StorageError> for TunnelError {
    fn from(err: redb::StorageError) -> Self {
        TunnelError::store("storage_operation", err)
    }
}

impl From<redb::CommitError> for TunnelError {
    fn from(err: redb::CommitError) -> Self {
        TunnelError::store("commit", err)
    }
}

// Wire message conversions
impl From<prost::DecodeError> for TunnelError {
    fn from(err: prost::DecodeError) -> Self {
        TunnelError::Protocol {
            message: format!("Malformed proxy message: {}", err),
        }
    }
}

impl From<prost::EncodeError> for TunnelError {
    fn from(err: prost::EncodeError) -> Self {
        TunnelError::Protocol {
            message: format!("Failed to encode proxy message: {}", err),
        }
    }
}

impl From<bincode::Error> for TunnelError {
    fn from(err: bincode::Error) -> Self {
        TunnelError::Internal {
            message: format!("Serialization error: {}", err),
        }
    }
}

// Configuration conversions
impl From<toml::de::Error> for TunnelError {
    fn from(err: toml::de::Error) -> Self {
        TunnelError::Configuration {
            component: "config_file".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<std::net::AddrParseError> for TunnelError {
    fn from(err: std::net::AddrParseError) -> Self {
        TunnelError::Configuration {
            component: "network_address".to_string(),
            message: format!("Invalid network address: {}", err),
        }
    }
}

// Async/Task error conversions
impl From<tokio::task::JoinError> for TunnelError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            TunnelError::Internal {
                message: "Task was cancelled".to_string(),
            }
        } else if err.is_panic() {
            TunnelError::Internal {
                message: "Task panicked".to_string(),
            }
        } else {
            TunnelError::Internal {
                message: format!("Task join failed: {}", err),
            }
        }
    }
}

impl From<tokio::time::error::Elapsed> for TunnelError {
    fn from(_err: tokio::time::error::Elapsed) -> Self {
        TunnelError::Timeout {
            operation: "async_operation".to_string(),
            duration: std::time::Duration::from_secs(0), // Duration not available from Elapsed
        }
    }
}

impl From<tokio::sync::broadcast::error::RecvError> for TunnelError {
    fn from(err: tokio::sync::broadcast::error::RecvError) -> Self {
        use tokio::sync::broadcast::error::RecvError;
        match err {
            RecvError::Closed => TunnelError::Internal {
                message: "Broadcast channel closed".to_string(),
            },
            RecvError::Lagged(count) => TunnelError::Internal {
                message: format!("Broadcast channel lagged by {} messages", count),
            },
        }
    }
}
