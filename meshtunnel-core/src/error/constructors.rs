//! Constructor methods for TunnelError

use super::types::TunnelError;

impl TunnelError {
    /// Create a configuration error with component and message
    ///
    /// # Examples
    /// ```rust
    /// use meshtunnel_core::error::TunnelError;
    ///
    /// let err = TunnelError::configuration("agent.node_name", "MY_NODE_NAME is not set");
    /// assert!(err.is_fatal());
    /// ```
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        TunnelError::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error describing a rejected value
    pub fn invalid_config<T: std::fmt::Display>(field: &str, value: T, reason: &str) -> Self {
        TunnelError::Configuration {
            component: field.to_string(),
            message: format!("Invalid value '{}': {}", value, reason),
        }
    }

    pub fn encoding(node_name: impl Into<String>, source: impl std::fmt::Display) -> Self {
        TunnelError::Encoding {
            node_name: node_name.into(),
            message: source.to_string(),
        }
    }

    pub fn decoding(node_name: impl Into<String>, source: impl std::fmt::Display) -> Self {
        TunnelError::Decoding {
            node_name: node_name.into(),
            message: source.to_string(),
        }
    }

    /// Create a store error with a boxed source
    pub fn store<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        TunnelError::Store {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a directory failure seen while resolving a proxy target
    pub fn resolution(node_name: impl Into<String>, source: TunnelError) -> Self {
        TunnelError::AddressResolution {
            node_name: node_name.into(),
            source: Box::new(source),
        }
    }

    pub fn connect(peer: impl std::fmt::Display, details: impl std::fmt::Display) -> Self {
        TunnelError::Connect {
            peer: peer.to_string(),
            details: details.to_string(),
        }
    }

    pub fn stream_open(peer: impl std::fmt::Display, details: impl std::fmt::Display) -> Self {
        TunnelError::StreamOpen {
            peer: peer.to_string(),
            details: details.to_string(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        TunnelError::Protocol {
            message: message.into(),
        }
    }

    /// Create a timeout error with operation and duration
    pub fn timeout(operation: impl Into<String>, duration: std::time::Duration) -> Self {
        TunnelError::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        TunnelError::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        TunnelError::Internal {
            message: message.into(),
        }
    }

    /// Startup errors the process must not continue past.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TunnelError::Configuration { .. })
    }

    /// Transient network failures a caller may retry with backoff.
    ///
    /// Only the bounded target dial is retried inside the crate; everything
    /// classified here is surfaced to the caller as is.
    pub fn is_retryable(&self) -> bool {
        match self {
            TunnelError::Connect { .. }
            | TunnelError::StreamOpen { .. }
            | TunnelError::Timeout { .. }
            | TunnelError::ProxyRefused { .. }
            | TunnelError::DialExhausted { .. } => true,
            TunnelError::AddressResolution { source, .. } => {
                matches!(**source, TunnelError::AddressNotFound { .. } | TunnelError::Store { .. })
            }
            TunnelError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}
