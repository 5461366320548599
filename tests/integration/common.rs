use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use timeline_archiver::config::ApiConfig;
use timeline_archiver::crawler::{ArchiveContext, CrawlSettings, HttpPageFetcher};
use timeline_archiver::model::WorkContext;
use timeline_archiver::queue::SqliteQueue;
use timeline_archiver::storage::{FsBlobStore, SqliteStorage};
use wiremock::MockServer;

pub const TOKEN: &str = "test-token";

/// A mock upstream plus fresh archive state
pub struct Harness {
    pub server: MockServer,
    pub storage: Arc<SqliteStorage>,
    pub blobs: Arc<FsBlobStore>,
    pub queue: Arc<SqliteQueue>,
    pub ctx: ArchiveContext,
    _blob_dir: TempDir,
}

impl Harness {
    pub async fn start() -> Self {
        Self::with_settings(CrawlSettings {
            adjacency_retry_backoff: Duration::from_millis(1),
            ..CrawlSettings::default()
        })
        .await
    }

    pub async fn with_settings(settings: CrawlSettings) -> Self {
        let server = MockServer::start().await;
        let blob_dir = TempDir::new().expect("Failed to create blob dir");

        let api = ApiConfig {
            base_url: server.uri(),
            bearer_token: TOKEN.to_string(),
            page_size: settings.page_size,
            requests_per_minute: 6000,
            request_timeout_secs: 5,
        };
        let fetcher = HttpPageFetcher::new(&api).expect("Failed to build fetcher");
        let storage = Arc::new(SqliteStorage::open_in_memory().expect("Failed to open storage"));
        let blobs = Arc::new(FsBlobStore::new(blob_dir.path(), false));
        let queue = Arc::new(
            SqliteQueue::open_in_memory(Duration::from_secs(60), 3).expect("Failed to open queue"),
        );

        let work_context = WorkContext {
            api_base_url: server.uri(),
            bearer_token: TOKEN.to_string(),
            queue_url: ":memory:".to_string(),
            blob_root: blob_dir.path().display().to_string(),
            database_path: ":memory:".to_string(),
        };

        let ctx = ArchiveContext {
            fetcher: Arc::new(fetcher),
            storage: storage.clone(),
            blobs: blobs.clone(),
            queue: queue.clone(),
            work_context,
            settings,
        };

        Self {
            server,
            storage,
            blobs,
            queue,
            ctx,
            _blob_dir: blob_dir,
        }
    }

    pub fn media_url(&self, name: &str) -> String {
        format!("{}/media/{}", self.server.uri(), name)
    }
}

/// A post with no references
pub fn plain_post(id: u64) -> Value {
    json!({
        "id": id,
        "id_str": id.to_string(),
        "full_text": format!("post {}", id),
        "user": {"id": 42, "screen_name": "subject"}
    })
}

/// A retweet of `original` carrying the given photo URLs
pub fn retweet_with_media(id: u64, original: u64, media_urls: &[String]) -> Value {
    let media: Vec<Value> = media_urls
        .iter()
        .map(|url| {
            json!({
                "type": "photo",
                "media_url": url.replace("http://", "http://plain."),
                "media_url_https": url,
            })
        })
        .collect();
    json!({
        "id": id,
        "user": {"id": 42, "screen_name": "subject"},
        "retweeted_status": {"id": original},
        "extended_entities": {"media": media}
    })
}

/// A post quoting `quoted`
pub fn quoting_post(id: u64, quoted: u64) -> Value {
    json!({
        "id": id,
        "user": {"id": 7, "screen_name": "other"},
        "quoted_status_id_str": quoted.to_string()
    })
}

pub fn user(id: u64) -> Value {
    json!({"id": id, "screen_name": format!("user{}", id)})
}
