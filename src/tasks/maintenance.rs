//! Cache Maintenance Task
//!
//! Fire-and-forget backend housekeeping: memory reclamation followed by keyspace
//! introspection. Failures are logged, never reported back.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::Store;

/// Spawns one maintenance pass in the background.
///
/// # Returns
/// A JoinHandle for the spawned task; callers normally drop it.
pub fn spawn_maintenance(store: Arc<Store>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting cache maintenance");

        match store.purge_memory().await {
            Ok(()) => info!("Memory purge completed"),
            Err(e) => warn!(error = %e, "Memory purge failed"),
        }

        match store.keyspace().await {
            Ok(keyspace) => {
                for (db, summary) in &keyspace {
                    info!(db = %db, summary = %summary, "Keyspace");
                }
                info!(databases = keyspace.len(), "Cache maintenance completed");
            }
            Err(e) => warn!(error = %e, "Keyspace introspection failed"),
        }
    })
}
