//! Message queue for fan-out and crawl work
//!
//! This module defines the queue contract the crawl components rely on:
//! - at-least-once delivery of `WorkMessage`s
//! - a lease (visibility timeout) per delivery so only one worker holds a message at a time
//! - explicit acknowledgement after successful processing
//! - delayed release for messages that should be retried later
//!
//! `SqliteQueue` is the bundled driver; any broker with the same semantics fits
//! behind `MessageQueue`.

mod sqlite;

pub use sqlite::{QueueDepth, SqliteQueue};

use crate::model::{MessageError, WorkMessage};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Message encoding error: {0}")]
    Message(#[from] MessageError),

    #[error("Attribute encoding error: {0}")]
    Attributes(#[from] serde_json::Error),

    #[error("Lease {0} is no longer held")]
    LeaseLost(String),

    #[error("Queue lock poisoned")]
    LockPoisoned,
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Opaque receipt identifying one delivery of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseHandle(pub(crate) String);

impl LeaseHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A received message and the lease that must be acked or released
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: WorkMessage,
    pub lease: LeaseHandle,
    /// How many times this message has been received, including this delivery
    pub receive_count: u32,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueues a message; attributes are derived from the message itself
    async fn send(&self, message: &WorkMessage) -> QueueResult<()>;

    /// Takes the next visible message and leases it, or returns `None` when idle
    async fn receive(&self) -> QueueResult<Option<Delivery>>;

    /// Deletes a processed message
    async fn ack(&self, lease: &LeaseHandle) -> QueueResult<()>;

    /// Gives a message back, visible again after `delay`
    async fn release(&self, lease: &LeaseHandle, delay: Duration) -> QueueResult<()>;
}
