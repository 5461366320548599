//! Collaborators handed to every crawl step and resolution

use crate::config::Config;
use crate::crawler::{HttpPageFetcher, PageFetcher};
use crate::model::WorkContext;
use crate::queue::{MessageQueue, SqliteQueue};
use crate::storage::{BlobStore, FsBlobStore, SqliteStorage, Storage};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Tunables for one crawl step
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// Items requested per page
    pub page_size: u32,
    /// Largest media download accepted
    pub max_media_bytes: u64,
    /// In-place attempts for adjacency writes
    pub adjacency_write_attempts: u32,
    /// Delay before the first adjacency retry; doubles per attempt
    pub adjacency_retry_backoff: Duration,
}

impl CrawlSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.api.page_size,
            max_media_bytes: config.worker.max_media_bytes,
            adjacency_write_attempts: config.worker.adjacency_write_attempts,
            ..Self::default()
        }
    }
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            page_size: 200,
            max_media_bytes: 512 * 1024 * 1024,
            adjacency_write_attempts: 3,
            adjacency_retry_backoff: Duration::from_millis(250),
        }
    }
}

/// Immutable bundle of collaborators for processing work
///
/// Nothing in here is mutated per message; every invocation gets the same
/// handles and the `WorkContext` copied into the messages it emits.
#[derive(Clone)]
pub struct ArchiveContext {
    pub fetcher: Arc<dyn PageFetcher>,
    pub storage: Arc<dyn Storage>,
    pub blobs: Arc<dyn BlobStore>,
    pub queue: Arc<dyn MessageQueue>,
    pub work_context: WorkContext,
    pub settings: CrawlSettings,
}

impl ArchiveContext {
    /// Opens every collaborator described by a validated configuration
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let fetcher = HttpPageFetcher::new(&config.api)?;
        let storage = SqliteStorage::new(Path::new(&config.storage.database_path))?;
        let blobs = FsBlobStore::new(&config.storage.blob_root, config.storage.compress);
        let queue = SqliteQueue::new(
            Path::new(&config.queue.database_path),
            config.queue.visibility_timeout(),
            config.queue.max_receive_count,
        )?;

        Ok(Self {
            fetcher: Arc::new(fetcher),
            storage: Arc::new(storage),
            blobs: Arc::new(blobs),
            queue: Arc::new(queue),
            work_context: config.work_context(),
            settings: CrawlSettings::from_config(config),
        })
    }
}
