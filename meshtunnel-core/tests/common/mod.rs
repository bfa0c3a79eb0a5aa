//! Shared helpers for meshtunnel-core integration tests

#![allow(dead_code)]

use iroh::RelayUrl;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use meshtunnel_core::config::DirectoryConfig;
use meshtunnel_core::host::{MemoryHost, MemoryNetwork};
use meshtunnel_core::storage::MemoryAddressStore;
use meshtunnel_core::{PeerDirectory, TunnelAgent, TunnelConfig};

pub fn relay_url() -> RelayUrl {
    "http://relay.test:10006".parse().unwrap()
}

/// Directory over an in-memory store, shared by every agent of a test
pub fn shared_directory() -> (Arc<PeerDirectory>, Arc<MemoryAddressStore>) {
    let store = Arc::new(MemoryAddressStore::default());
    let directory = Arc::new(PeerDirectory::new(&DirectoryConfig::default(), store.clone()));
    (directory, store)
}

pub fn agent_config(node_name: &str) -> TunnelConfig {
    let mut config = TunnelConfig::test();
    config.agent.node_name = Some(node_name.to_string());
    config
}

/// Agent whose host is already connected to the relay
pub async fn online_agent(
    network: &MemoryNetwork,
    directory: &Arc<PeerDirectory>,
    node_name: &str,
) -> TunnelAgent<MemoryHost> {
    let host = network.host();
    host.go_online(relay_url());
    TunnelAgent::start(
        Arc::new(host),
        directory.clone(),
        &agent_config(node_name),
        &CancellationToken::new(),
    )
    .await
    .unwrap()
}

/// Poll `check` until it holds or `limit` passes
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
