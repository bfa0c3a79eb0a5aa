//! Peer address directory
//!
//! Maps node names to encoded [`PeerAddressRecord`]s. The in-memory map is the
//! fast path; every write is mirrored to an [`AddressStore`], and reads that
//! miss the map fall back to the store without filling the map. The map is
//! refreshed by [`PeerDirectory::set`] and [`PeerDirectory::reset`] only.

use iroh::NodeId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::DirectoryConfig;
use crate::error::{TunnelError, TunnelResult};
use crate::storage::{AddressStore, RecordScope, RecordSet};
use crate::types::{NodeName, PeerAddressRecord, Transport};

/// Name to address mapping shared by every tunnel component of a process
pub struct PeerDirectory {
    scope: RecordScope,
    records: RwLock<HashMap<NodeName, Vec<u8>>>,
    store: Arc<dyn AddressStore>,
}

impl PeerDirectory {
    pub fn new(config: &DirectoryConfig, store: Arc<dyn AddressStore>) -> Self {
        Self {
            scope: RecordScope::from(config),
            records: RwLock::new(HashMap::new()),
            store,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.scope.namespace
    }

    pub fn record_name(&self) -> &str {
        &self.scope.record_name
    }

    pub fn scope(&self) -> &RecordScope {
        &self.scope
    }

    pub fn store(&self) -> &Arc<dyn AddressStore> {
        &self.store
    }

    /// Publish the addresses of `node_name`.
    ///
    /// The in-memory entry is updated even when the durable write fails; the
    /// returned error then reports the lost durability.
    pub async fn set(
        &self,
        node_name: &str,
        node_id: NodeId,
        transports: impl IntoIterator<Item = Transport>,
    ) -> TunnelResult<()> {
        let record = PeerAddressRecord::new(node_name, node_id, transports);
        let bytes = record.encode()?;

        let mut records = self.records.write().await;
        records.insert(node_name.to_string(), bytes.clone());

        // Writes are rare, so the store round trip stays under the write lock
        if let Err(e) = self.store.save(&self.scope, node_name, &bytes).await {
            warn!("Failed to persist address record of {}: {}", node_name, e);
            return Err(e);
        }

        info!(
            "Published {} addresses of {} as {}",
            record.addresses.len(),
            node_name,
            node_id.fmt_short()
        );
        Ok(())
    }

    /// Look up the addresses of `node_name`.
    pub async fn get(&self, node_name: &str) -> TunnelResult<PeerAddressRecord> {
        let records = self.records.read().await;
        if let Some(bytes) = records.get(node_name) {
            return PeerAddressRecord::decode(node_name, bytes);
        }

        debug!("No cached address of {}, asking the store", node_name);
        match self.store.load(&self.scope, node_name).await? {
            Some(bytes) => PeerAddressRecord::decode(node_name, &bytes),
            None => Err(TunnelError::AddressNotFound {
                node_name: node_name.to_string(),
            }),
        }
    }

    /// Overwrite cached entries with `records`, last write wins per name.
    ///
    /// Names absent from `records` keep their current entry.
    pub async fn reset(&self, records: RecordSet) {
        let count = records.len();
        let mut cached = self.records.write().await;
        cached.extend(records);
        debug!("Directory reset with {} records, {} cached", count, cached.len());
    }

    /// Names with a cached entry
    pub async fn node_names(&self) -> Vec<NodeName> {
        let mut names: Vec<_> = self.records.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryAddressStore;
    use iroh::SecretKey;
    use tracing_test::traced_test;

    fn directory() -> (PeerDirectory, Arc<MemoryAddressStore>) {
        let store = Arc::new(MemoryAddressStore::default());
        let directory = PeerDirectory::new(&DirectoryConfig::default(), store.clone());
        (directory, store)
    }

    fn transports() -> Vec<Transport> {
        vec![
            Transport::Direct("10.0.0.5:10006".parse().unwrap()),
            Transport::Relay("https://relay.example.com".parse().unwrap()),
        ]
    }

    #[tokio::test]
    async fn test_scope_defaults() {
        let (directory, _) = directory();
        assert_eq!(directory.namespace(), "kubeedge");
        assert_eq!(directory.record_name(), "edgemeshagentsecret");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_store_failure_still_updates_cache() {
        let (directory, store) = directory();
        let node_id = SecretKey::from_bytes(&[3; 32]).public();

        store.set_fail_writes(true);
        let result = directory.set("edge-1", node_id, transports()).await;
        assert!(matches!(result, Err(TunnelError::Store { .. })));

        let record = directory.get("edge-1").await.unwrap();
        assert_eq!(record.node_id(), Some(node_id));
        assert_eq!(store.load_count(), 0);
        assert!(logs_contain("Failed to persist address record of edge-1"));
    }

    #[tokio::test]
    async fn test_store_fallback_does_not_backfill() {
        let (directory, store) = directory();
        let node_id = SecretKey::from_bytes(&[4; 32]).public();
        let bytes = PeerAddressRecord::new("edge-2", node_id, transports())
            .encode()
            .unwrap();
        store.save(directory.scope(), "edge-2", &bytes).await.unwrap();

        assert_eq!(directory.get("edge-2").await.unwrap().node_id(), Some(node_id));
        assert_eq!(directory.get("edge-2").await.unwrap().node_id(), Some(node_id));
        assert_eq!(store.load_count(), 2);
        assert!(directory.node_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_reset_is_last_write_wins_per_name() {
        let (directory, _) = directory();
        let first = SecretKey::from_bytes(&[5; 32]).public();
        let second = SecretKey::from_bytes(&[6; 32]).public();

        directory.set("edge-1", first, transports()).await.unwrap();

        let replacement = PeerAddressRecord::new("edge-1", second, transports())
            .encode()
            .unwrap();
        let other = PeerAddressRecord::new("edge-3", first, transports())
            .encode()
            .unwrap();
        let update = RecordSet::from([
            ("edge-1".to_string(), replacement),
            ("edge-3".to_string(), other),
        ]);

        directory.reset(update.clone()).await;
        directory.reset(update).await;

        assert_eq!(directory.get("edge-1").await.unwrap().node_id(), Some(second));
        assert_eq!(directory.node_names().await, vec!["edge-1", "edge-3"]);
    }
}
