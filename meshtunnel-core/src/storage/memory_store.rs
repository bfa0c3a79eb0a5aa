//! In-process address store

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::broadcast;

use super::{AddressStore, RecordScope, RecordSet, StoreEvent, StoreOperation};
use crate::error::{TunnelError, TunnelResult};

/// Address store kept in memory, for single-process deployments and tests.
///
/// Writes can be made to fail on demand to exercise durability error paths.
pub struct MemoryAddressStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    events: broadcast::Sender<StoreEvent>,
    fail_writes: AtomicBool,
    loads: AtomicUsize,
}

impl MemoryAddressStore {
    pub fn new(event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
            fail_writes: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
        }
    }

    /// Make every following write fail until switched back off
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of single-record loads served so far
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn check_writable(&self, operation: &str) -> TunnelResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TunnelError::store(
                operation,
                std::io::Error::new(std::io::ErrorKind::Other, "injected write failure"),
            ));
        }
        Ok(())
    }

    fn scope_records(entries: &HashMap<String, Vec<u8>>, scope: &RecordScope) -> RecordSet {
        entries
            .iter()
            .filter_map(|(key, value)| {
                scope
                    .node_name_of(key)
                    .map(|node_name| (node_name.to_string(), value.clone()))
            })
            .collect()
    }

    fn notify(&self, scope: &RecordScope, operation: StoreOperation, records: RecordSet) {
        let _ = self.events.send(StoreEvent {
            scope: scope.clone(),
            operation,
            records,
        });
    }
}

impl Default for MemoryAddressStore {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_BUFFER)
    }
}

#[async_trait]
impl AddressStore for MemoryAddressStore {
    async fn load(&self, scope: &RecordScope, node_name: &str) -> TunnelResult<Option<Vec<u8>>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.read().get(&scope.key(node_name)).cloned())
    }

    async fn save(&self, scope: &RecordScope, node_name: &str, bytes: &[u8]) -> TunnelResult<()> {
        self.check_writable("save")?;
        let (existed, records) = {
            let mut entries = self.entries.write();
            let existed = entries.insert(scope.key(node_name), bytes.to_vec()).is_some();
            (existed, Self::scope_records(&entries, scope))
        };

        let operation = if existed {
            StoreOperation::Update
        } else {
            StoreOperation::Insert
        };
        self.notify(scope, operation, records);
        Ok(())
    }

    async fn remove(&self, scope: &RecordScope, node_name: &str) -> TunnelResult<()> {
        self.check_writable("remove")?;
        let (removed, records) = {
            let mut entries = self.entries.write();
            let removed = entries.remove(&scope.key(node_name)).is_some();
            (removed, Self::scope_records(&entries, scope))
        };

        if removed {
            self.notify(scope, StoreOperation::Delete, records);
        }
        Ok(())
    }

    async fn load_all(&self, scope: &RecordScope) -> TunnelResult<RecordSet> {
        Ok(Self::scope_records(&self.entries.read(), scope))
    }

    async fn replace_all(&self, scope: &RecordScope, records: RecordSet) -> TunnelResult<()> {
        self.check_writable("replace_all")?;
        let existed = {
            let mut entries = self.entries.write();
            let prefix = scope.prefix();
            let before = entries.len();
            entries.retain(|key, _| !key.starts_with(&prefix));
            let existed = entries.len() != before;
            for (node_name, bytes) in &records {
                entries.insert(scope.key(node_name), bytes.clone());
            }
            existed
        };

        let operation = if existed {
            StoreOperation::Update
        } else {
            StoreOperation::Insert
        };
        self.notify(scope, operation, records);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_write_failure() {
        let store = MemoryAddressStore::default();
        let scope = RecordScope::new("ns", "record");

        store.set_fail_writes(true);
        assert!(matches!(
            store.save(&scope, "edge-1", b"a").await,
            Err(TunnelError::Store { .. })
        ));
        assert_eq!(store.load(&scope, "edge-1").await.unwrap(), None);

        store.set_fail_writes(false);
        store.save(&scope, "edge-1", b"a").await.unwrap();
        assert_eq!(store.load(&scope, "edge-1").await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.load_count(), 2);
    }
}
