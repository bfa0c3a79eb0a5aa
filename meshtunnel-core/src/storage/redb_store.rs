//! redb-backed address store

use async_trait::async_trait;
use redb::{Database, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{AddressStore, RecordScope, RecordSet, StoreEvent, StoreOperation};
use crate::error::{TunnelError, TunnelResult};

/// Single table holding every scope, keyed by `{namespace}/{record_name}/{node_name}`
pub const PEER_ADDRESS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("peer_addresses");

/// Address store persisted in a redb database file
pub struct RedbAddressStore {
    database: Arc<Database>,
    events: broadcast::Sender<StoreEvent>,
}

impl RedbAddressStore {
    /// Open or create the database at `path`
    pub fn open(path: impl AsRef<Path>, event_buffer: usize) -> TunnelResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let database = Database::create(path)?;

        // Create the table up front so read transactions never see it missing
        let write_txn = database.begin_write()?;
        write_txn.open_table(PEER_ADDRESS_TABLE)?;
        write_txn.commit()?;

        info!("Opened peer address store at {}", path.display());
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Ok(Self {
            database: Arc::new(database),
            events,
        })
    }

    fn read_scope(db: &Database, scope: &RecordScope) -> TunnelResult<RecordSet> {
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(PEER_ADDRESS_TABLE)?;

        let prefix = scope.prefix();
        let mut records = RecordSet::new();
        for entry in table.range::<&str>(prefix.as_str()..)? {
            let (key, value) = entry?;
            let Some(node_name) = scope.node_name_of(key.value()) else {
                break;
            };
            records.insert(node_name.to_string(), value.value().to_vec());
        }
        Ok(records)
    }

    fn notify(&self, scope: &RecordScope, operation: StoreOperation, records: RecordSet) {
        // No subscribers is fine
        let _ = self.events.send(StoreEvent {
            scope: scope.clone(),
            operation,
            records,
        });
    }

    async fn blocking<T, F>(&self, f: F) -> TunnelResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> TunnelResult<T> + Send + 'static,
    {
        let db = self.database.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| TunnelError::Internal {
                message: format!("Task join error: {}", e),
            })?
    }
}

#[async_trait]
impl AddressStore for RedbAddressStore {
    async fn load(&self, scope: &RecordScope, node_name: &str) -> TunnelResult<Option<Vec<u8>>> {
        let key = scope.key(node_name);
        self.blocking(move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(PEER_ADDRESS_TABLE)?;
            let value = table.get(key.as_str())?.map(|bytes| bytes.value().to_vec());
            Ok(value)
        })
        .await
    }

    async fn save(&self, scope: &RecordScope, node_name: &str, bytes: &[u8]) -> TunnelResult<()> {
        let key = scope.key(node_name);
        let bytes = bytes.to_vec();
        let scope_owned = scope.clone();

        let (existed, records) = self
            .blocking(move |db| {
                let write_txn = db.begin_write()?;
                let existed = {
                    let mut table = write_txn.open_table(PEER_ADDRESS_TABLE)?;
                    let previous = table.insert(key.as_str(), bytes.as_slice())?;
                    previous.is_some()
                };
                write_txn.commit()?;
                Ok((existed, Self::read_scope(db, &scope_owned)?))
            })
            .await?;

        debug!("Stored address record of {} in {}", node_name, scope);
        let operation = if existed {
            StoreOperation::Update
        } else {
            StoreOperation::Insert
        };
        self.notify(scope, operation, records);
        Ok(())
    }

    async fn remove(&self, scope: &RecordScope, node_name: &str) -> TunnelResult<()> {
        let key = scope.key(node_name);
        let scope_owned = scope.clone();

        let (removed, records) = self
            .blocking(move |db| {
                let write_txn = db.begin_write()?;
                let removed = {
                    let mut table = write_txn.open_table(PEER_ADDRESS_TABLE)?;
                    let previous = table.remove(key.as_str())?;
                    previous.is_some()
                };
                write_txn.commit()?;
                Ok((removed, Self::read_scope(db, &scope_owned)?))
            })
            .await?;

        if removed {
            debug!("Removed address record of {} from {}", node_name, scope);
            self.notify(scope, StoreOperation::Delete, records);
        }
        Ok(())
    }

    async fn load_all(&self, scope: &RecordScope) -> TunnelResult<RecordSet> {
        let scope = scope.clone();
        self.blocking(move |db| Self::read_scope(db, &scope)).await
    }

    async fn replace_all(&self, scope: &RecordScope, records: RecordSet) -> TunnelResult<()> {
        let scope_owned = scope.clone();
        let written = records.clone();

        let existed = self
            .blocking(move |db| {
                let stale: Vec<String> = Self::read_scope(db, &scope_owned)?
                    .into_keys()
                    .map(|node_name| scope_owned.key(&node_name))
                    .collect();

                let write_txn = db.begin_write()?;
                {
                    let mut table = write_txn.open_table(PEER_ADDRESS_TABLE)?;
                    for key in &stale {
                        table.remove(key.as_str())?;
                    }
                    for (node_name, bytes) in &written {
                        table.insert(scope_owned.key(node_name).as_str(), bytes.as_slice())?;
                    }
                }
                write_txn.commit()?;
                Ok(!stale.is_empty())
            })
            .await?;

        info!("Replaced {} address records in {}", records.len(), scope);
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
    use tempfile::TempDir;

    fn scope() -> RecordScope {
        RecordScope::new("kubeedge", "edgemeshagentsecret")
    }

    #[tokio::test]
    async fn test_save_load_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("addresses.redb");

        {
            let store = RedbAddressStore::open(&path, 8).unwrap();
            store.save(&scope(), "edge-1", b"record-1").await.unwrap();
        }

        let store = RedbAddressStore::open(&path, 8).unwrap();
        assert_eq!(
            store.load(&scope(), "edge-1").await.unwrap(),
            Some(b"record-1".to_vec())
        );
        assert_eq!(store.load(&scope(), "edge-2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = RedbAddressStore::open(dir.path().join("db.redb"), 8).unwrap();
        let other = RecordScope::new("kubeedge", "othersecret");

        store.save(&scope(), "edge-1", b"a").await.unwrap();
        store.save(&other, "edge-1", b"b").await.unwrap();

        let records = store.load_all(&scope()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records["edge-1"], b"a".to_vec());
    }

    #[tokio::test]
    async fn test_events_follow_writes() {
        let dir = TempDir::new().unwrap();
        let store = RedbAddressStore::open(dir.path().join("db.redb"), 8).unwrap();
        let mut events = store.subscribe();

        store.save(&scope(), "edge-1", b"a").await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.operation, StoreOperation::Insert);

        store.save(&scope(), "edge-1", b"b").await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.operation, StoreOperation::Update);
        assert_eq!(event.records["edge-1"], b"b".to_vec());

        store.remove(&scope(), "edge-1").await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.operation, StoreOperation::Delete);
        assert!(event.records.is_empty());
    }

    #[tokio::test]
    async fn test_replace_all_drops_stale_records() {
        let dir = TempDir::new().unwrap();
        let store = RedbAddressStore::open(dir.path().join("db.redb"), 8).unwrap();

        store.save(&scope(), "edge-1", b"a").await.unwrap();
        store
            .replace_all(&scope(), RecordSet::from([("edge-2".to_string(), b"b".to_vec())]))
            .await
            .unwrap();

        let records = store.load_all(&scope()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records.contains_key("edge-2"));
    }
}
