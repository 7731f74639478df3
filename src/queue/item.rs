//! Deferred work item model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of a queue item. `Pending` moves to exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Completed,
    Failed,
}

impl QueueItemStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, QueueItemStatus::Pending)
    }
}

impl fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueItemStatus::Pending => write!(f, "pending"),
            QueueItemStatus::Completed => write!(f, "completed"),
            QueueItemStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A unit of deferred work, e.g. an order that could not be processed synchronously
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    /// Opaque work descriptor supplied by the caller
    pub payload: serde_json::Value,
    /// Higher is served first
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: QueueItemStatus,
    /// Set only when the item failed
    pub error_message: Option<String>,
    /// Number of times the item has been dequeued
    pub attempts: u32,
}

impl QueueItem {
    pub fn new(payload: serde_json::Value, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payload,
            priority,
            enqueued_at: now,
            updated_at: now,
            status: QueueItemStatus::Pending,
            error_message: None,
            attempts: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == QueueItemStatus::Pending
    }

    pub(crate) fn completed(mut self) -> Self {
        self.status = QueueItemStatus::Completed;
        self.updated_at = Utc::now();
        self
    }

    pub(crate) fn failed(mut self, reason: impl Into<String>) -> Self {
        self.status = QueueItemStatus::Failed;
        self.error_message = Some(reason.into());
        self.updated_at = Utc::now();
        self
    }
}
