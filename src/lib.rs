//! Timeline Archiver: incremental archiving of a social account graph
//!
//! This crate archives a subject's posts, likes, followers and friends into
//! durable storage. Each (subject, resource kind) pair resumes from a persisted
//! watermark, and references discovered in fetched posts (retweets, quotes,
//! media) are fanned out onto a queue and resolved recursively by workers.

pub mod config;
pub mod crawler;
pub mod model;
pub mod output;
pub mod queue;
pub mod storage;

use std::time::Duration;
use thiserror::Error;

use crawler::FetchError;
use model::MessageError;
use queue::QueueError;
use storage::{BlobError, StorageError};

/// Main error type for archiver operations
///
/// Upstream failures are split by how they should be retried: transient ones
/// go back to the queue with a delay, fatal ones are surfaced for an operator.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transient upstream failure for {context}: {source}")]
    TransientUpstream { context: String, source: FetchError },

    #[error("Fatal upstream failure for {context}: {source}")]
    FatalUpstream { context: String, source: FetchError },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Blob storage error: {0}")]
    Blob(#[from] BlobError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timed out after {after:?} while {operation}")]
    Timeout { after: Duration, operation: String },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Returns true if retrying the same message later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientUpstream { .. } | Self::Timeout { .. })
    }

    /// Returns true for failures writing watermarks, blobs or queue messages
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Blob(_) | Self::Queue(_))
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required parameter: {0}")]
    MissingField(&'static str),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for archiver operations
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use model::{
    Item, ResourceFlags, ResourceKind, Subject, SubjectId, Watermark, WorkContext, WorkMessage,
};
