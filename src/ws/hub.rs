//! In-process push channel backing the WebSocket connections.
//!
//! Each socket task attaches once and receives a bounded queue of text
//! frames. The hub maps connection ids to the sending half; the socket
//! task drains the receiving half into the socket.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};

use super::broadcast::{DeliveryError, PushChannel};
use crate::domain::ConnectionId;

/// Registry of outbound queues keyed by connection id.
#[derive(Debug, Clone)]
pub struct ConnectionHub {
    senders: Arc<RwLock<HashMap<ConnectionId, mpsc::Sender<String>>>>,
    buffer: usize,
}

impl ConnectionHub {
    /// Creates a hub whose per-connection queues hold `buffer` frames.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            senders: Arc::new(RwLock::new(HashMap::new())),
            buffer: buffer.max(1),
        }
    }

    /// Opens the outbound queue for `id`, replacing any previous one.
    pub async fn attach(&self, id: &ConnectionId) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.senders.write().await.insert(id.clone(), tx);
        rx
    }

    /// Drops the outbound queue for `id`.
    pub async fn detach(&self, id: &ConnectionId) {
        self.senders.write().await.remove(id);
    }

    /// Number of attached connections.
    pub async fn len(&self) -> usize {
        self.senders.read().await.len()
    }

    /// Returns `true` if no connection is attached.
    pub async fn is_empty(&self) -> bool {
        self.senders.read().await.is_empty()
    }
}

#[async_trait]
impl PushChannel for ConnectionHub {
    async fn deliver(&self, id: &ConnectionId, payload: &str) -> Result<(), DeliveryError> {
        let sender = self
            .senders
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(DeliveryError::Gone)?;
        match sender.try_send(payload.to_string()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(DeliveryError::Transient("outbound queue full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.forget_closed(id, &sender).await;
                Err(DeliveryError::Gone)
            }
        }
    }
}

impl ConnectionHub {
    /// Drops the entry for `id` if it still holds `closed`. A socket that
    /// never completed its upgrade leaves such an entry behind.
    async fn forget_closed(&self, id: &ConnectionId, closed: &mpsc::Sender<String>) {
        let mut senders = self.senders.write().await;
        if senders
            .get(id)
            .is_some_and(|current| current.same_channel(closed))
        {
            senders.remove(id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[tokio::test]
    async fn attached_connection_receives_frames() {
        let hub = ConnectionHub::new(4);
        let id = ConnectionId::new("a");
        let mut rx = hub.attach(&id).await;
        assert_ok!(hub.deliver(&id, "hello").await);
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
        assert_eq!(hub.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_or_closed_connection_is_gone() {
        let hub = ConnectionHub::new(4);
        assert_eq!(
            hub.deliver(&ConnectionId::new("nobody"), "x").await,
            Err(DeliveryError::Gone)
        );

        let id = ConnectionId::new("closed");
        let rx = hub.attach(&id).await;
        drop(rx);
        assert_eq!(hub.deliver(&id, "x").await, Err(DeliveryError::Gone));
    }

    #[tokio::test]
    async fn abandoned_queues_are_dropped_on_delivery() {
        let hub = ConnectionHub::new(4);
        let ids: Vec<ConnectionId> = (0..100)
            .map(|i| ConnectionId::new(format!("never-upgraded-{i}")))
            .collect();
        for id in &ids {
            drop(hub.attach(id).await);
        }
        assert_eq!(hub.len().await, 100);

        for id in &ids {
            assert_eq!(hub.deliver(id, "x").await, Err(DeliveryError::Gone));
        }
        assert!(hub.is_empty().await);
    }

    #[tokio::test]
    async fn reattached_queue_survives_stale_close() {
        let hub = ConnectionHub::new(4);
        let id = ConnectionId::new("again");
        let old = hub.attach(&id).await;
        let Some(stale) = hub.senders.read().await.get(&id).cloned() else {
            panic!("sender should be attached");
        };
        drop(old);
        let mut fresh = hub.attach(&id).await;

        hub.forget_closed(&id, &stale).await;
        assert_ok!(hub.deliver(&id, "still here").await);
        assert_eq!(fresh.recv().await.as_deref(), Some("still here"));
    }

    #[tokio::test]
    async fn full_queue_is_transient() {
        let hub = ConnectionHub::new(1);
        let id = ConnectionId::new("slow");
        let _rx = hub.attach(&id).await;
        assert_ok!(hub.deliver(&id, "1").await);
        let err = assert_err!(hub.deliver(&id, "2").await);
        assert!(matches!(err, DeliveryError::Transient(_)));
    }

    #[tokio::test]
    async fn detach_removes_queue() {
        let hub = ConnectionHub::new(4);
        let id = ConnectionId::new("a");
        let _rx = hub.attach(&id).await;
        hub.detach(&id).await;
        assert!(hub.is_empty().await);
        assert_eq!(hub.deliver(&id, "x").await, Err(DeliveryError::Gone));
    }
}
