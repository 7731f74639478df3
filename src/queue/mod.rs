//! # Deferred Work Queue
//!
//! Bounded priority queue holding work that could not be processed
//! synchronously, plus the persistence seam it writes through.

pub mod item;
pub mod priority_queue;
pub mod store;

pub use item::{QueueItem, QueueItemStatus};
pub use priority_queue::PriorityWorkQueue;
pub use store::{InMemoryQueueStore, QueueStore};
