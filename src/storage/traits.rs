//! Storage traits and error types
//!
//! This module defines the trait interface for the crawl-state backend and
//! associated error types. All coordination state shared between workers
//! lives behind these traits.

use crate::model::{ResourceFlags, ResourceKind, Subject, SubjectId, Watermark};
use crate::storage::{CrawlLogEntry, CrawlStatus, WatermarkRecord};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Subject not found: {0}")]
    SubjectNotFound(SubjectId),

    #[error("Watermark shape '{shape}' does not fit resource {resource} of subject {subject}")]
    WatermarkShape {
        subject: SubjectId,
        resource: ResourceKind,
        shape: String,
    },

    #[error("Value out of range for storage: {0}")]
    ValueOutOfRange(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Keyed persistence of crawl watermarks
pub trait WatermarkStore: Send + Sync {
    /// Gets the watermark for a (subject, resource) pair
    ///
    /// Returns the zero-value watermark for the resource kind, not an error,
    /// when nothing has been stored yet.
    fn get_watermark(&self, subject: SubjectId, resource: ResourceKind)
        -> StorageResult<Watermark>;

    /// Stores a watermark, replacing any previous value
    ///
    /// Writing the same value twice is a no-op, so the write can be repeated
    /// safely when a crawl step is retried.
    fn put_watermark(
        &self,
        subject: SubjectId,
        resource: ResourceKind,
        watermark: &Watermark,
    ) -> StorageResult<()>;

    /// Stores a watermark and queues adjacency targets in one transaction
    ///
    /// The targets stay pending until `AdjacencyStore::record_adjacency`
    /// writes them, so a step that fails after this call can finish the
    /// record write on its next run.
    fn put_watermark_with_pending(
        &self,
        subject: SubjectId,
        resource: ResourceKind,
        watermark: &Watermark,
        pending: &[u64],
    ) -> StorageResult<()>;

    /// Lists every stored watermark
    fn list_watermarks(&self) -> StorageResult<Vec<WatermarkRecord>>;
}

/// Registry of subjects and their enabled resource kinds
pub trait SubjectRegistry: Send + Sync {
    /// Lists subjects with `resource` enabled, ordered by ID
    fn list_enabled(&self, resource: ResourceKind) -> StorageResult<Vec<Subject>>;

    /// Lists every registered subject, ordered by ID
    fn list_subjects(&self) -> StorageResult<Vec<Subject>>;

    fn get_subject(&self, subject: SubjectId) -> StorageResult<Option<Subject>>;

    /// Creates the subject or replaces its enabled resource kinds
    fn set_flags(&self, subject: SubjectId, flags: &ResourceFlags) -> StorageResult<()>;

    /// Removes a subject; returns false if it was not registered
    ///
    /// Watermarks are kept so re-adding the subject resumes where it left off.
    fn delete_subject(&self, subject: SubjectId) -> StorageResult<bool>;
}

/// Id-only adjacency records (who follows whom, who liked what)
pub trait AdjacencyStore: Send + Sync {
    /// Records edges from `subject` to each target; existing edges are ignored
    ///
    /// Returns the number of edges that were new. Recorded targets are
    /// removed from the pending set.
    fn record_adjacency(
        &self,
        subject: SubjectId,
        resource: ResourceKind,
        targets: &[u64],
    ) -> StorageResult<usize>;

    /// Targets queued by `put_watermark_with_pending` and not yet recorded
    fn pending_adjacency(&self, subject: SubjectId, resource: ResourceKind)
        -> StorageResult<Vec<u64>>;

    fn count_adjacency(&self, subject: SubjectId, resource: ResourceKind) -> StorageResult<u64>;

    /// Edge totals across all subjects, by resource kind
    fn adjacency_totals(&self) -> StorageResult<HashMap<ResourceKind, u64>>;
}

/// Append-only record of crawl step outcomes
pub trait CrawlLog: Send + Sync {
    fn record_crawl(&self, entry: &CrawlLogEntry) -> StorageResult<()>;

    /// Most recent entries for one (subject, resource) pair, newest first
    fn recent_crawls(
        &self,
        subject: SubjectId,
        resource: ResourceKind,
        limit: u32,
    ) -> StorageResult<Vec<CrawlLogEntry>>;

    fn crawl_outcome_counts(&self) -> StorageResult<HashMap<CrawlStatus, u64>>;
}

/// Everything the crawl needs from its state backend
pub trait Storage: WatermarkStore + SubjectRegistry + AdjacencyStore + CrawlLog {}

impl<T> Storage for T where T: WatermarkStore + SubjectRegistry + AdjacencyStore + CrawlLog {}
