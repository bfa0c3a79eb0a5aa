//! Durable storage for peer address records
//!
//! Every node's record lives under a `(namespace, record_name)` scope, keyed by
//! node name. Stores broadcast a [`StoreEvent`] carrying the full record set of
//! a scope after every change, so directories on other tasks can `reset`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::broadcast;

use crate::config::DirectoryConfig;
use crate::error::TunnelResult;
use crate::types::NodeName;

pub mod memory_store;
pub mod redb_store;

pub use memory_store::MemoryAddressStore;
pub use redb_store::RedbAddressStore;

/// Encoded records of one scope, keyed by node name
pub type RecordSet = HashMap<NodeName, Vec<u8>>;

/// Namespace and record name the address records are stored under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordScope {
    pub namespace: String,
    pub record_name: String,
}

impl RecordScope {
    pub fn new(namespace: impl Into<String>, record_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            record_name: record_name.into(),
        }
    }

    /// Prefix shared by every key of this scope
    pub fn prefix(&self) -> String {
        format!("{}/{}/", self.namespace, self.record_name)
    }

    pub fn key(&self, node_name: &str) -> String {
        format!("{}{}", self.prefix(), node_name)
    }

    /// Node name of a key belonging to this scope
    pub fn node_name_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.prefix())
    }
}

impl From<&DirectoryConfig> for RecordScope {
    fn from(config: &DirectoryConfig) -> Self {
        Self::new(&config.namespace, &config.record_name)
    }
}

impl fmt::Display for RecordScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.record_name)
    }
}

/// Kind of change a store observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Insert,
    Update,
    Delete,
}

/// Change notification for one scope
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub scope: RecordScope,
    pub operation: StoreOperation,
    /// Every record of the scope after the change
    pub records: RecordSet,
}

/// Durable key-value store for encoded address records.
///
/// Implementations must allow concurrent `load` calls.
#[async_trait]
pub trait AddressStore: Send + Sync {
    /// Encoded record of `node_name`, if any
    async fn load(&self, scope: &RecordScope, node_name: &str) -> TunnelResult<Option<Vec<u8>>>;

    /// Insert or overwrite the record of `node_name`
    async fn save(&self, scope: &RecordScope, node_name: &str, bytes: &[u8]) -> TunnelResult<()>;

    /// Drop the record of `node_name`
    async fn remove(&self, scope: &RecordScope, node_name: &str) -> TunnelResult<()>;

    /// Every record of the scope
    async fn load_all(&self, scope: &RecordScope) -> TunnelResult<RecordSet>;

    /// Replace the whole scope at once
    async fn replace_all(&self, scope: &RecordScope, records: RecordSet) -> TunnelResult<()>;

    /// Change notifications for every scope
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
