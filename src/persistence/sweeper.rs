//! Periodic removal of expired records.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use super::DurableStore;

/// Spawns a task calling [`DurableStore::purge_expired`] every `interval`.
///
/// Failures are logged and the next tick tries again.
pub fn spawn_sweeper(store: Arc<dyn DurableStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_once(store.as_ref()).await;
        }
    })
}

/// Runs one purge pass, returning the number of records removed.
pub async fn sweep_once(store: &dyn DurableStore) -> u64 {
    match store.purge_expired(Utc::now().timestamp()).await {
        Ok(removed) => {
            if removed > 0 {
                tracing::info!(removed, "purged expired records");
            }
            removed
        }
        Err(e) => {
            tracing::warn!(error = %e, "expired record sweep failed");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Connection, ConnectionId};
    use crate::persistence::MemoryStore;

    #[tokio::test]
    async fn sweep_removes_expired_connections() {
        let store = MemoryStore::new();
        let stale = Connection {
            connection_id: ConnectionId::new("stale"),
            connected_at: 0,
            filters: None,
            expires_at: Utc::now().timestamp() - 10,
        };
        let _ = store.upsert_connection(&stale).await;
        assert_eq!(sweep_once(&store).await, 1);
        assert_eq!(sweep_once(&store).await, 0);
    }
}
