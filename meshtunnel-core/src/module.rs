//! Tunnel module
//!
//! Keeps the process's [`PeerDirectory`] in line with the durable store:
//! every insert or update of the directory's scope replaces the cached
//! records, wherever the change came from.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::directory::PeerDirectory;
use crate::error::{TunnelError, TunnelResult};
use crate::storage::{StoreEvent, StoreOperation};

/// Apply one store event to `directory`; returns whether it was relevant.
pub async fn apply_event(directory: &PeerDirectory, event: StoreEvent) -> bool {
    if &event.scope != directory.scope() {
        debug!("Ignoring change of foreign scope {}", event.scope);
        return false;
    }

    match event.operation {
        StoreOperation::Insert | StoreOperation::Update => {
            debug!(
                "Scope {} changed ({:?}), {} records",
                event.scope,
                event.operation,
                event.records.len()
            );
            directory.reset(event.records).await;
            true
        }
        StoreOperation::Delete => false,
    }
}

/// Reload the whole scope from the store.
async fn resync(directory: &PeerDirectory) {
    match directory.store().load_all(directory.scope()).await {
        Ok(records) => directory.reset(records).await,
        Err(e) => warn!("Failed to load scope {}: {}", directory.scope(), e),
    }
}

/// Consume store events until cancelled or the store goes away.
pub async fn receive_loop(
    directory: Arc<PeerDirectory>,
    mut events: broadcast::Receiver<StoreEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Tunnel module stopping");
                return;
            }
            event = events.recv() => event,
        };

        match event {
            Ok(event) => {
                apply_event(&directory, event).await;
            }
            Err(RecvError::Lagged(missed)) => {
                warn!("Missed {} store events, reloading scope", missed);
                resync(&directory).await;
            }
            Err(RecvError::Closed) => {
                warn!("Store event channel closed, tunnel module exits");
                return;
            }
        }
    }
}

/// Long-lived receive loop bound to one directory
pub struct TunnelModule {
    directory: Arc<PeerDirectory>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TunnelModule {
    /// The module stops with `shutdown` or with [`TunnelModule::stop`].
    pub fn new(directory: Arc<PeerDirectory>, shutdown: &CancellationToken) -> Self {
        Self {
            directory,
            cancel: shutdown.child_token(),
            task: Mutex::new(None),
        }
    }

    /// Load the current scope, then follow store changes.
    pub async fn start(&self) -> TunnelResult<()> {
        if self.task.lock().is_some() {
            return Err(TunnelError::internal("tunnel module already started"));
        }

        // Subscribe first so no change between load and loop is lost
        let events = self.directory.store().subscribe();
        resync(&self.directory).await;

        let handle = tokio::spawn(receive_loop(
            self.directory.clone(),
            events,
            self.cancel.clone(),
        ));

        let mut task = self.task.lock();
        if task.is_some() {
            handle.abort();
            return Err(TunnelError::internal("tunnel module already started"));
        }
        *task = Some(handle);
        info!("Tunnel module following scope {}", self.directory.scope());
        Ok(())
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(&self) -> TunnelResult<()> {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await?;
        }
        Ok(())
    }
}
