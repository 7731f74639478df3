//! # Priority Work Queue
//!
//! Bounded queue of deferred work. Dequeue order is priority descending, then
//! `enqueued_at` ascending, then admission order, so equal-priority items are
//! served FIFO even when their timestamps collide.
//!
//! All operations are serialized by one async mutex, which is also held across
//! the store write so the in-memory ordering never runs ahead of persistence.

use crate::constants::{metrics as metric_names, tags as tag_keys};
use crate::error::{ResilienceError, Result};
use crate::queue::{InMemoryQueueStore, QueueItem, QueueStore};
use crate::resilience::metrics::{metric_tags, SharedMetricsSink, TracingMetricsSink};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Heap key; the greatest entry is served first
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueEntry {
    priority: i32,
    enqueued_at: DateTime<Utc>,
    sequence: u64,
    id: Uuid,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A pending item and whether it is still waiting in the heap
#[derive(Debug)]
struct TrackedItem {
    item: QueueItem,
    queued: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    /// May hold stale entries for items marked while still queued
    heap: BinaryHeap<QueueEntry>,
    /// Pending items, both waiting and handed out by `dequeue`
    pending: HashMap<Uuid, TrackedItem>,
    queued_count: usize,
    next_sequence: u64,
}

impl QueueState {
    fn admit(&mut self, item: QueueItem) {
        let entry = QueueEntry {
            priority: item.priority,
            enqueued_at: item.enqueued_at,
            sequence: self.next_sequence,
            id: item.id,
        };
        self.next_sequence += 1;
        self.heap.push(entry);
        self.pending.insert(item.id, TrackedItem { item, queued: true });
        self.queued_count += 1;
    }

    /// Pop until an entry that is still waiting turns up
    fn pop_live(&mut self) -> Option<QueueEntry> {
        while let Some(entry) = self.heap.pop() {
            if self
                .pending
                .get(&entry.id)
                .is_some_and(|tracked| tracked.queued)
            {
                return Some(entry);
            }
        }
        None
    }
}

#[derive(Debug)]
pub struct PriorityWorkQueue {
    name: String,
    max_size: usize,
    store: Arc<dyn QueueStore>,
    state: Mutex<QueueState>,
    sink: SharedMetricsSink,
}

impl PriorityWorkQueue {
    /// In-memory queue with the default metrics sink
    pub fn new(name: impl Into<String>, max_size: usize) -> Result<Self> {
        Self::with_store(
            name,
            max_size,
            Arc::new(InMemoryQueueStore::new()),
            Arc::new(TracingMetricsSink),
        )
    }

    /// Empty queue backed by `store`. Items already pending in the store are
    /// not loaded; use [`PriorityWorkQueue::restore`] for that.
    pub fn with_store(
        name: impl Into<String>,
        max_size: usize,
        store: Arc<dyn QueueStore>,
        sink: SharedMetricsSink,
    ) -> Result<Self> {
        let name = name.into();
        if max_size == 0 {
            return Err(ResilienceError::Configuration(format!(
                "queue '{name}': max_size must be greater than 0"
            )));
        }

        Ok(Self {
            name,
            max_size,
            store,
            state: Mutex::new(QueueState::default()),
            sink,
        })
    }

    /// Rebuild the queue from every pending item in `store`.
    ///
    /// Items handed out before a restart but never marked are admitted again.
    /// Nothing is dropped when the store holds more than `max_size` items; new
    /// enqueues are refused until the backlog drains below capacity.
    pub async fn restore(
        name: impl Into<String>,
        max_size: usize,
        store: Arc<dyn QueueStore>,
        sink: SharedMetricsSink,
    ) -> Result<Self> {
        let queue = Self::with_store(name, max_size, store, sink)?;

        let mut items = queue.store.list_pending().await?;
        items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.enqueued_at.cmp(&b.enqueued_at))
        });

        let restored = items.len();
        {
            let mut state = queue.state.lock().await;
            for item in items {
                state.admit(item);
            }
        }

        if restored > queue.max_size {
            warn!(
                queue = %queue.name,
                restored = restored,
                max_size = queue.max_size,
                "Restored backlog exceeds queue capacity; new work will be refused until it drains"
            );
        } else {
            info!(queue = %queue.name, restored = restored, "Queue restored from store");
        }

        Ok(queue)
    }

    /// Admit a new item, refusing it when the queue is at capacity
    pub async fn enqueue(&self, payload: serde_json::Value, priority: i32) -> Result<Uuid> {
        let mut state = self.state.lock().await;

        if state.queued_count >= self.max_size {
            warn!(
                queue = %self.name,
                size = state.queued_count,
                max_size = self.max_size,
                priority = priority,
                "Queue full, rejecting item"
            );
            self.sink.record(
                metric_names::QUEUE_REJECTED_FULL,
                1.0,
                &metric_tags([(tag_keys::QUEUE, self.name.clone())]),
            );
            return Err(ResilienceError::QueueFull {
                queue: self.name.clone(),
                capacity: self.max_size,
            });
        }

        let item = QueueItem::new(payload, priority);
        let id = item.id;
        self.store.save(&item).await?;
        state.admit(item);
        let size = state.queued_count;
        drop(state);

        debug!(queue = %self.name, item_id = %id, priority = priority, size = size, "Item enqueued");
        self.sink.record(
            metric_names::QUEUE_ENQUEUED,
            size as f64,
            &metric_tags([
                (tag_keys::QUEUE, self.name.clone()),
                (tag_keys::PRIORITY, priority.to_string()),
            ]),
        );

        Ok(id)
    }

    /// Remove and return the next item, or `None` when the queue is empty.
    ///
    /// The item stays pending in the store, with its attempt count bumped,
    /// until it is marked completed or failed.
    pub async fn dequeue(&self) -> Result<Option<QueueItem>> {
        let mut state = self.state.lock().await;

        let Some(entry) = state.pop_live() else {
            return Ok(None);
        };

        let mut item = match state.pending.get(&entry.id) {
            Some(tracked) => tracked.item.clone(),
            None => return Ok(None),
        };
        item.attempts = item.attempts.saturating_add(1);
        item.updated_at = Utc::now();

        if let Err(err) = self.store.save(&item).await {
            state.heap.push(entry);
            return Err(err);
        }

        if let Some(tracked) = state.pending.get_mut(&item.id) {
            tracked.item = item.clone();
            tracked.queued = false;
        }
        state.queued_count -= 1;
        let size = state.queued_count;
        drop(state);

        debug!(
            queue = %self.name,
            item_id = %item.id,
            priority = item.priority,
            attempts = item.attempts,
            "Item dequeued"
        );
        self.sink.record(
            metric_names::QUEUE_DEQUEUED,
            size as f64,
            &metric_tags([
                (tag_keys::QUEUE, self.name.clone()),
                (tag_keys::PRIORITY, item.priority.to_string()),
            ]),
        );

        Ok(Some(item))
    }

    pub async fn mark_completed(&self, id: Uuid) -> Result<()> {
        self.finish(id, |item| item.completed()).await?;
        debug!(queue = %self.name, item_id = %id, "Item completed");
        self.sink.record(
            metric_names::QUEUE_COMPLETED,
            1.0,
            &metric_tags([(tag_keys::QUEUE, self.name.clone())]),
        );
        Ok(())
    }

    pub async fn mark_failed(&self, id: Uuid, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        self.finish(id, |item| item.failed(reason.clone())).await?;
        warn!(queue = %self.name, item_id = %id, reason = %reason, "Item failed");
        self.sink.record(
            metric_names::QUEUE_FAILED,
            1.0,
            &metric_tags([(tag_keys::QUEUE, self.name.clone())]),
        );
        Ok(())
    }

    /// Move a pending item to a terminal state, persisting before forgetting it
    async fn finish<F>(&self, id: Uuid, transition: F) -> Result<()>
    where
        F: FnOnce(QueueItem) -> QueueItem,
    {
        let mut state = self.state.lock().await;

        let (current, was_queued) = match state.pending.get(&id) {
            Some(tracked) => (tracked.item.clone(), tracked.queued),
            None => {
                drop(state);
                return Err(self.not_pending_error(id).await);
            }
        };

        self.store.save(&transition(current)).await?;

        state.pending.remove(&id);
        if was_queued {
            state.queued_count -= 1;
        }
        Ok(())
    }

    async fn not_pending_error(&self, id: Uuid) -> ResilienceError {
        match self.store.load(id).await {
            Ok(Some(item)) if item.status.is_terminal() => ResilienceError::invalid_state(format!(
                "queue item {id} is already {}",
                item.status
            )),
            Ok(Some(_)) => ResilienceError::invalid_state(format!(
                "queue item {id} is not tracked by queue '{}'",
                self.name
            )),
            Ok(None) => ResilienceError::invalid_state(format!("unknown queue item {id}")),
            Err(err) => err,
        }
    }

    /// Number of items waiting to be dequeued
    pub async fn size(&self) -> usize {
        self.state.lock().await.queued_count
    }

    pub async fn is_empty(&self) -> bool {
        self.size().await == 0
    }

    /// Items handed out by `dequeue` and not yet marked
    pub async fn in_flight(&self) -> usize {
        let state = self.state.lock().await;
        state.pending.len() - state.queued_count
    }

    /// Waiting items in the order they would be dequeued
    pub async fn snapshot(&self) -> Vec<QueueItem> {
        let state = self.state.lock().await;
        let mut entries: Vec<&QueueEntry> = state
            .heap
            .iter()
            .filter(|entry| {
                state
                    .pending
                    .get(&entry.id)
                    .is_some_and(|tracked| tracked.queued)
            })
            .collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries
            .into_iter()
            .filter_map(|entry| state.pending.get(&entry.id).map(|t| t.item.clone()))
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }
}
