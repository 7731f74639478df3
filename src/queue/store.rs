//! Persistence seam for queued work.
//!
//! The queue writes every admission, dequeue and terminal transition through a
//! [`QueueStore`] before changing its in-memory ordering, so a store that
//! survives restarts gives "no lost queue items".

use crate::error::Result;
use crate::queue::QueueItem;
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

#[async_trait]
pub trait QueueStore: Send + Sync + std::fmt::Debug {
    /// Insert or overwrite an item
    async fn save(&self, item: &QueueItem) -> Result<()>;

    async fn load(&self, id: Uuid) -> Result<Option<QueueItem>>;

    /// Every item whose status is still pending, in no particular order
    async fn list_pending(&self) -> Result<Vec<QueueItem>>;
}

/// Process-local store; terminal items are retained for audit
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    items: DashMap<Uuid, QueueItem>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total items held, terminal ones included
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn save(&self, item: &QueueItem) -> Result<()> {
        self.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<QueueItem>> {
        Ok(self.items.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_pending(&self) -> Result<Vec<QueueItem>> {
        Ok(self
            .items
            .iter()
            .filter(|entry| entry.value().is_pending())
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_load_and_list_pending() {
        let store = InMemoryQueueStore::new();
        let pending = QueueItem::new(json!({"order_id": 1}), 1);
        let done = QueueItem::new(json!({"order_id": 2}), 1).completed();

        store.save(&pending).await.unwrap();
        store.save(&done).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.load(done.id).await.unwrap(), Some(done));
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());

        let listed = store.list_pending().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, pending.id);
    }
}
