// Tunnel module receive loop tests

use iroh::SecretKey;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use meshtunnel_core::module::apply_event;
use meshtunnel_core::storage::{AddressStore, RecordScope, RecordSet, StoreEvent, StoreOperation};
use meshtunnel_core::types::{PeerAddressRecord, Transport};
use meshtunnel_core::TunnelModule;

mod common;
use common::{eventually, relay_url, shared_directory};

fn encoded(node_name: &str, seed: u8) -> Vec<u8> {
    PeerAddressRecord::new(
        node_name,
        SecretKey::from_bytes(&[seed; 32]).public(),
        vec![Transport::Relay(relay_url())],
    )
    .encode()
    .unwrap()
}

fn event(scope: RecordScope, operation: StoreOperation, names: &[&str]) -> StoreEvent {
    StoreEvent {
        scope,
        operation,
        records: names
            .iter()
            .map(|name| (name.to_string(), encoded(name, 9)))
            .collect::<RecordSet>(),
    }
}

#[tokio::test]
async fn test_only_inserts_and_updates_of_own_scope_apply() {
    let (directory, _) = shared_directory();
    let own = directory.scope().clone();
    let foreign = RecordScope::new("other", own.record_name.clone());

    assert!(!apply_event(&directory, event(foreign, StoreOperation::Insert, &["edge-x"])).await);
    assert!(!apply_event(&directory, event(own.clone(), StoreOperation::Delete, &["edge-y"])).await);
    assert!(directory.node_names().await.is_empty());

    assert!(apply_event(&directory, event(own.clone(), StoreOperation::Insert, &["edge-1"])).await);
    assert!(apply_event(&directory, event(own, StoreOperation::Update, &["edge-2"])).await);
    assert_eq!(directory.node_names().await, vec!["edge-1", "edge-2"]);
}

#[tokio::test]
async fn test_module_follows_external_writes() {
    let (directory, store) = shared_directory();
    let scope = directory.scope().clone();
    store.save(&scope, "edge-early", &encoded("edge-early", 1)).await.unwrap();

    let shutdown = CancellationToken::new();
    let module = TunnelModule::new(directory.clone(), &shutdown);
    module.start().await.unwrap();
    assert_eq!(directory.node_names().await, vec!["edge-early"]);

    // Another process publishing through the shared store
    store.save(&scope, "edge-late", &encoded("edge-late", 2)).await.unwrap();
    assert!(
        eventually(Duration::from_secs(2), || async {
            directory.node_names().await.contains(&"edge-late".to_string())
        })
        .await
    );

    module.stop().await.unwrap();
    assert!(!shutdown.is_cancelled());
}

#[tokio::test]
async fn test_module_stops_with_process_shutdown() {
    let (directory, store) = shared_directory();
    let shutdown = CancellationToken::new();
    let module = TunnelModule::new(directory.clone(), &shutdown);
    module.start().await.unwrap();
    assert!(module.start().await.is_err());

    shutdown.cancel();
    module.stop().await.unwrap();

    store
        .save(directory.scope(), "edge-after", &encoded("edge-after", 3))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(directory.node_names().await.is_empty());
}
