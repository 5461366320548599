//! Storage module for persisting crawl state and archived content
//!
//! This module handles:
//! - SQLite-backed watermarks, subject flags, adjacency records and crawl log
//! - Blob storage for archived posts, profiles and media
//! - Hierarchical blob key construction

mod blob;
mod keys;
mod schema;
mod sqlite;
mod traits;

pub use blob::{BlobError, BlobResult, BlobStore, FsBlobStore};
pub use keys::{item_key, media_key, post_key, profile_key};
pub use sqlite::SqliteStorage;
pub use traits::{
    AdjacencyStore, CrawlLog, Storage, StorageError, StorageResult, SubjectRegistry,
    WatermarkStore,
};

use crate::model::{ResourceKind, SubjectId, Watermark};
use std::fmt;

/// A stored watermark with its key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkRecord {
    pub subject: SubjectId,
    pub resource: ResourceKind,
    pub watermark: Watermark,
    pub updated_at: String,
}

/// Outcome of one crawl step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CrawlStatus {
    /// The page had items and the watermark moved
    Advanced,
    /// The page was empty; the watermark was left alone
    NoProgress,
    /// The upstream throttled the request
    RateLimited,
    /// Any other failure
    Failed,
}

impl CrawlStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Advanced => "advanced",
            Self::NoProgress => "no-progress",
            Self::RateLimited => "rate-limited",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "advanced" => Some(Self::Advanced),
            "no-progress" => Some(Self::NoProgress),
            "rate-limited" => Some(Self::RateLimited),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn all() -> [Self; 4] {
        [
            Self::Advanced,
            Self::NoProgress,
            Self::RateLimited,
            Self::Failed,
        ]
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// One row of the crawl log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlLogEntry {
    pub subject: SubjectId,
    pub resource: ResourceKind,
    pub status: CrawlStatus,
    pub item_count: u32,
    /// The bounds or cursor that were requested
    pub request: String,
    pub error_message: Option<String>,
    pub recorded_at: String,
}

impl CrawlLogEntry {
    pub fn new(
        subject: SubjectId,
        resource: ResourceKind,
        status: CrawlStatus,
        request: impl Into<String>,
    ) -> Self {
        Self {
            subject,
            resource,
            status,
            item_count: 0,
            request: request.into(),
            error_message: None,
            recorded_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_items(mut self, count: usize) -> Self {
        self.item_count = u32::try_from(count).unwrap_or(u32::MAX);
        self
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error_message = Some(error.to_string());
        self
    }
}
