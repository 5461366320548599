use crate::model::{ResourceKind, WorkContext};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for the archiver
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl Config {
    /// Builds the immutable context copied into every work message
    pub fn work_context(&self) -> WorkContext {
        WorkContext {
            api_base_url: self.api.base_url.clone(),
            bearer_token: self.api.bearer_token.clone(),
            queue_url: self.queue.database_path.clone(),
            blob_root: self.storage.blob_root.clone(),
            database_path: self.storage.database_path.clone(),
        }
    }
}

/// Upstream API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the upstream API (e.g. "https://api.twitter.com/1.1")
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Bearer token sent with every request
    #[serde(rename = "bearer-token", default)]
    pub bearer_token: String,

    /// Items requested per page
    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: u32,

    /// Client-side request pacing
    #[serde(rename = "requests-per-minute", default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Timeout for a single upstream request (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Watermark database and blob storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database holding watermarks and subjects
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Root directory of the blob store
    #[serde(rename = "blob-root")]
    pub blob_root: String,

    /// Gzip blobs on disk
    #[serde(default)]
    pub compress: bool,
}

/// Message queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Path to the SQLite database backing the queue
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// How long a received message stays invisible to other consumers
    #[serde(rename = "visibility-timeout-secs", default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Deliveries after which a message is dead-lettered
    #[serde(rename = "max-receive-count", default = "default_max_receive_count")]
    pub max_receive_count: u32,

    /// Delay before a transiently failed message becomes visible again
    #[serde(rename = "retry-delay-secs", default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Queue consumer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Messages processed concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Deadline for processing one message; must be below the visibility timeout
    #[serde(rename = "message-timeout-secs", default = "default_message_timeout")]
    pub message_timeout_secs: u64,

    /// Largest media download accepted (bytes)
    #[serde(rename = "max-media-bytes", default = "default_max_media_bytes")]
    pub max_media_bytes: u64,

    /// In-place attempts for the adjacency record write
    #[serde(rename = "adjacency-write-attempts", default = "default_adjacency_attempts")]
    pub adjacency_write_attempts: u32,
}

impl WorkerConfig {
    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.message_timeout_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            message_timeout_secs: default_message_timeout(),
            max_media_bytes: default_max_media_bytes(),
            adjacency_write_attempts: default_adjacency_attempts(),
        }
    }
}

/// Periodic crawl dispatch configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Seconds between dispatch rounds
    #[serde(rename = "interval-secs", default = "default_runner_interval")]
    pub interval_secs: u64,

    /// Resource kinds dispatched each round
    #[serde(default = "default_runner_resources")]
    pub resources: Vec<ResourceKind>,
}

impl RunnerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_runner_interval(),
            resources: default_runner_resources(),
        }
    }
}

fn default_page_size() -> u32 {
    200
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

fn default_visibility_timeout() -> u64 {
    300
}

fn default_max_receive_count() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    60
}

fn default_concurrency() -> u32 {
    4
}

fn default_message_timeout() -> u64 {
    240
}

fn default_max_media_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_adjacency_attempts() -> u32 {
    3
}

fn default_runner_interval() -> u64 {
    3600
}

fn default_runner_resources() -> Vec<ResourceKind> {
    ResourceKind::all().to_vec()
}
