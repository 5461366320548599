//! Crawl step tests against a mock upstream

use crate::common::{plain_post, quoting_post, retweet_with_media, user, Harness, TOKEN};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use timeline_archiver::crawler::{crawl_resource, CrawlOutcome, CrawlSettings};
use timeline_archiver::model::{
    ResourceFlags, ResourceKind, Subject, SubjectId, Watermark, WorkPayload,
};
use timeline_archiver::queue::MessageQueue;
use timeline_archiver::storage::{
    item_key, profile_key, AdjacencyStore, BlobStore, CrawlLog, CrawlLogEntry, CrawlStatus,
    SqliteStorage, StorageError, StorageResult, SubjectRegistry, WatermarkRecord, WatermarkStore,
};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

const SUBJECT: u64 = 42;

fn bounded(since_id: u64, max_id: u64) -> Watermark {
    Watermark::BoundedId {
        since_id,
        max_id,
        backfill_floor: None,
    }
}

#[tokio::test]
async fn test_timeline_crawl_archives_and_fans_out() {
    let harness = Harness::start().await;
    let media = [harness.media_url("a.jpg"), harness.media_url("b.png")];

    Mock::given(method("GET"))
        .and(path("/statuses/user_timeline.json"))
        .and(query_param("user_id", "42"))
        .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            plain_post(7),
            retweet_with_media(3, 100, &media),
            plain_post(9),
        ])))
        .expect(1)
        .mount(&harness.server)
        .await;

    let outcome = crawl_resource(&harness.ctx, SUBJECT, ResourceKind::Timeline)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        CrawlOutcome::Advanced {
            items: 3,
            watermark: bounded(3, 9),
            fanned_out: 3,
        }
    );
    assert_eq!(
        harness
            .storage
            .get_watermark(SUBJECT, ResourceKind::Timeline)
            .unwrap(),
        bounded(3, 9)
    );
    for id in [7, 3, 9] {
        let key = item_key(ResourceKind::Timeline, SUBJECT, id);
        assert!(harness.blobs.exists(&key).await.unwrap(), "missing {}", key);
    }

    // One resolve-post for the retweeted original, one fetch-media per photo
    let mut kinds = Vec::new();
    while let Some(delivery) = harness.queue.receive().await.unwrap() {
        assert_eq!(delivery.message.context, harness.ctx.work_context);
        kinds.push(delivery.message.payload.clone());
        harness.queue.ack(&delivery.lease).await.unwrap();
    }
    assert_eq!(kinds.len(), 3);
    assert!(kinds.contains(&WorkPayload::ResolvePost {
        post_id: 100,
        origin: Some(SUBJECT)
    }));
    assert!(kinds.contains(&WorkPayload::FetchMedia {
        url: media[0].clone(),
        destination_key: "media/a.jpg".to_string(),
        origin: Some(SUBJECT),
    }));

    let log = harness
        .storage
        .recent_crawls(SUBJECT, ResourceKind::Timeline, 5)
        .unwrap();
    assert_eq!(log[0].status, CrawlStatus::Advanced);
    assert_eq!(log[0].item_count, 3);
}

#[tokio::test]
async fn test_second_crawl_resumes_above_max_id() {
    let harness = Harness::start().await;

    Mock::given(method("GET"))
        .and(path("/favorites/list.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([plain_post(10), plain_post(20)])))
        .up_to_n_times(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/favorites/list.json"))
        .and(query_param("since_id", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([plain_post(25)])))
        .expect(1)
        .mount(&harness.server)
        .await;

    crawl_resource(&harness.ctx, SUBJECT, ResourceKind::Favorites)
        .await
        .unwrap();
    let outcome = crawl_resource(&harness.ctx, SUBJECT, ResourceKind::Favorites)
        .await
        .unwrap();

    assert!(matches!(outcome, CrawlOutcome::Advanced { items: 1, .. }));
    assert_eq!(
        harness
            .storage
            .get_watermark(SUBJECT, ResourceKind::Favorites)
            .unwrap(),
        bounded(25, 25)
    );
    // Likes are tracked as adjacency edges
    assert_eq!(
        harness
            .storage
            .count_adjacency(SUBJECT, ResourceKind::Favorites)
            .unwrap(),
        3
    );
}

#[tokio::test]
async fn test_max_id_never_decreases() {
    let harness = Harness::start().await;

    let pages = [
        json!([plain_post(10), plain_post(20)]),
        json!([plain_post(30), plain_post(25)]),
        json!([plain_post(22)]),
    ];
    for page in pages {
        Mock::given(method("GET"))
            .and(path("/statuses/user_timeline.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page))
            .up_to_n_times(1)
            .mount(&harness.server)
            .await;
    }

    let mut previous_max = 0;
    for _ in 0..3 {
        crawl_resource(&harness.ctx, SUBJECT, ResourceKind::Timeline)
            .await
            .unwrap();
        let Watermark::BoundedId { max_id, .. } = harness
            .storage
            .get_watermark(SUBJECT, ResourceKind::Timeline)
            .unwrap()
        else {
            panic!("wrong watermark shape");
        };
        assert!(max_id >= previous_max, "{} < {}", max_id, previous_max);
        previous_max = max_id;
    }
    assert_eq!(previous_max, 30);
}

#[tokio::test]
async fn test_empty_page_does_not_advance() {
    let harness = Harness::start().await;
    harness
        .storage
        .put_watermark(SUBJECT, ResourceKind::Timeline, &bounded(5, 10))
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/statuses/user_timeline.json"))
        .and(query_param("since_id", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&harness.server)
        .await;

    let outcome = crawl_resource(&harness.ctx, SUBJECT, ResourceKind::Timeline)
        .await
        .unwrap();

    assert_eq!(outcome, CrawlOutcome::NoProgress);
    assert_eq!(
        harness
            .storage
            .get_watermark(SUBJECT, ResourceKind::Timeline)
            .unwrap(),
        bounded(5, 10)
    );
    let log = harness
        .storage
        .recent_crawls(SUBJECT, ResourceKind::Timeline, 1)
        .unwrap();
    assert_eq!(log[0].status, CrawlStatus::NoProgress);
}

#[tokio::test]
async fn test_rate_limit_leaves_state_untouched() {
    let harness = Harness::start().await;
    harness
        .storage
        .put_watermark(SUBJECT, ResourceKind::Timeline, &bounded(5, 10))
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/statuses/user_timeline.json"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Rate limit exceeded"))
        .mount(&harness.server)
        .await;

    let err = crawl_resource(&harness.ctx, SUBJECT, ResourceKind::Timeline)
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(
        harness
            .storage
            .get_watermark(SUBJECT, ResourceKind::Timeline)
            .unwrap(),
        bounded(5, 10)
    );
    let depth = harness.queue.depth().unwrap();
    assert_eq!(depth.visible + depth.in_flight, 0);

    let log = harness
        .storage
        .recent_crawls(SUBJECT, ResourceKind::Timeline, 1)
        .unwrap();
    assert_eq!(log[0].status, CrawlStatus::RateLimited);
    assert!(log[0].request.contains("since_id=10"));
}

#[tokio::test]
async fn test_fatal_error_is_surfaced() {
    let harness = Harness::start().await;

    Mock::given(method("GET"))
        .and(path("/friends/list.json"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Not authorized"))
        .mount(&harness.server)
        .await;

    let err = crawl_resource(&harness.ctx, SUBJECT, ResourceKind::Friends)
        .await
        .unwrap_err();

    assert!(!err.is_transient());
    assert!(err.to_string().contains("401"));
    assert!(harness
        .storage
        .get_watermark(SUBJECT, ResourceKind::Friends)
        .unwrap()
        .is_zero());
    let log = harness
        .storage
        .recent_crawls(SUBJECT, ResourceKind::Friends, 1)
        .unwrap();
    assert_eq!(log[0].status, CrawlStatus::Failed);
}

#[tokio::test]
async fn test_malformed_response_is_fatal() {
    let harness = Harness::start().await;

    Mock::given(method("GET"))
        .and(path("/statuses/user_timeline.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errors": []})))
        .mount(&harness.server)
        .await;

    let err = crawl_resource(&harness.ctx, SUBJECT, ResourceKind::Timeline)
        .await
        .unwrap_err();
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_followers_cursor_wraparound() {
    let harness = Harness::start().await;

    Mock::given(method("GET"))
        .and(path("/followers/list.json"))
        .and(query_param("cursor", "-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "users": [user(1), user(2)],
            "next_cursor": 1_650_000,
            "previous_cursor": 0
        })))
        .up_to_n_times(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/followers/list.json"))
        .and(query_param("cursor", "1650000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "users": [user(3)],
            "next_cursor": 0,
            "previous_cursor": -1_650_000
        })))
        .expect(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/followers/list.json"))
        .and(query_param("cursor", "-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "users": [user(1)],
            "next_cursor": 1_650_000,
            "previous_cursor": 0
        })))
        .expect(1)
        .mount(&harness.server)
        .await;

    crawl_resource(&harness.ctx, SUBJECT, ResourceKind::Followers)
        .await
        .unwrap();
    crawl_resource(&harness.ctx, SUBJECT, ResourceKind::Followers)
        .await
        .unwrap();

    // End of list is stored verbatim
    assert_eq!(
        harness
            .storage
            .get_watermark(SUBJECT, ResourceKind::Followers)
            .unwrap(),
        Watermark::CursorPair {
            next_cursor: 0,
            previous_cursor: -1_650_000
        }
    );

    // The next crawl wraps around to the start of the list
    crawl_resource(&harness.ctx, SUBJECT, ResourceKind::Followers)
        .await
        .unwrap();
    assert_eq!(
        harness
            .storage
            .get_watermark(SUBJECT, ResourceKind::Followers)
            .unwrap(),
        Watermark::CursorPair {
            next_cursor: 1_650_000,
            previous_cursor: 0
        }
    );

    assert_eq!(
        harness
            .storage
            .count_adjacency(SUBJECT, ResourceKind::Followers)
            .unwrap(),
        3
    );
    assert!(harness
        .blobs
        .exists(&item_key(ResourceKind::Followers, SUBJECT, 3))
        .await
        .unwrap());
    // User lists produce no fan-out
    assert!(harness.queue.receive().await.unwrap().is_none());
}

#[tokio::test]
async fn test_profile_snapshot() {
    let harness = Harness::start().await;

    Mock::given(method("GET"))
        .and(path("/users/show.json"))
        .and(query_param("user_id", "42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user(SUBJECT)))
        .expect(1)
        .mount(&harness.server)
        .await;

    let outcome = crawl_resource(&harness.ctx, SUBJECT, ResourceKind::Profile)
        .await
        .unwrap();
    let CrawlOutcome::Advanced {
        watermark: Watermark::ProfileSnapshot { fetched_at },
        ..
    } = outcome
    else {
        panic!("unexpected outcome {:?}", outcome);
    };

    assert!(fetched_at > 0);
    let stored = harness
        .blobs
        .get(&profile_key(SUBJECT, fetched_at))
        .await
        .unwrap()
        .expect("profile snapshot stored");
    let value: serde_json::Value = serde_json::from_slice(&stored).unwrap();
    assert_eq!(value["screen_name"], "user42");
}

/// Storage whose adjacency writes fail a fixed number of times
struct FailingAdjacency {
    inner: Arc<SqliteStorage>,
    failures_left: AtomicUsize,
}

impl FailingAdjacency {
    fn new(inner: Arc<SqliteStorage>, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        }
    }
}

impl WatermarkStore for FailingAdjacency {
    fn get_watermark(&self, subject: SubjectId, resource: ResourceKind) -> StorageResult<Watermark> {
        self.inner.get_watermark(subject, resource)
    }

    fn put_watermark(
        &self,
        subject: SubjectId,
        resource: ResourceKind,
        watermark: &Watermark,
    ) -> StorageResult<()> {
        self.inner.put_watermark(subject, resource, watermark)
    }

    fn put_watermark_with_pending(
        &self,
        subject: SubjectId,
        resource: ResourceKind,
        watermark: &Watermark,
        pending: &[u64],
    ) -> StorageResult<()> {
        self.inner
            .put_watermark_with_pending(subject, resource, watermark, pending)
    }

    fn list_watermarks(&self) -> StorageResult<Vec<WatermarkRecord>> {
        self.inner.list_watermarks()
    }
}

impl SubjectRegistry for FailingAdjacency {
    fn list_enabled(&self, resource: ResourceKind) -> StorageResult<Vec<Subject>> {
        self.inner.list_enabled(resource)
    }

    fn list_subjects(&self) -> StorageResult<Vec<Subject>> {
        self.inner.list_subjects()
    }

    fn get_subject(&self, subject: SubjectId) -> StorageResult<Option<Subject>> {
        self.inner.get_subject(subject)
    }

    fn set_flags(&self, subject: SubjectId, flags: &ResourceFlags) -> StorageResult<()> {
        self.inner.set_flags(subject, flags)
    }

    fn delete_subject(&self, subject: SubjectId) -> StorageResult<bool> {
        self.inner.delete_subject(subject)
    }
}

impl AdjacencyStore for FailingAdjacency {
    fn record_adjacency(
        &self,
        subject: SubjectId,
        resource: ResourceKind,
        targets: &[u64],
    ) -> StorageResult<usize> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk I/O error",
            )));
        }
        self.inner.record_adjacency(subject, resource, targets)
    }

    fn pending_adjacency(&self, subject: SubjectId, resource: ResourceKind) -> StorageResult<Vec<u64>> {
        self.inner.pending_adjacency(subject, resource)
    }

    fn count_adjacency(&self, subject: SubjectId, resource: ResourceKind) -> StorageResult<u64> {
        self.inner.count_adjacency(subject, resource)
    }

    fn adjacency_totals(&self) -> StorageResult<HashMap<ResourceKind, u64>> {
        self.inner.adjacency_totals()
    }
}

impl CrawlLog for FailingAdjacency {
    fn record_crawl(&self, entry: &CrawlLogEntry) -> StorageResult<()> {
        self.inner.record_crawl(entry)
    }

    fn recent_crawls(
        &self,
        subject: SubjectId,
        resource: ResourceKind,
        limit: u32,
    ) -> StorageResult<Vec<CrawlLogEntry>> {
        self.inner.recent_crawls(subject, resource, limit)
    }

    fn crawl_outcome_counts(&self) -> StorageResult<HashMap<CrawlStatus, u64>> {
        self.inner.crawl_outcome_counts()
    }
}

#[tokio::test]
async fn test_failed_adjacency_write_finishes_on_redelivery() {
    let harness = Harness::start().await;

    Mock::given(method("GET"))
        .and(path("/favorites/list.json"))
        .and(query_param("since_id", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/favorites/list.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([quoting_post(10, 5), plain_post(20)])),
        )
        .up_to_n_times(1)
        .mount(&harness.server)
        .await;

    // Every in-place attempt of the first step fails
    let mut ctx = harness.ctx.clone();
    ctx.storage = Arc::new(FailingAdjacency::new(
        harness.storage.clone(),
        ctx.settings.adjacency_write_attempts as usize,
    ));

    let err = crawl_resource(&ctx, SUBJECT, ResourceKind::Favorites)
        .await
        .unwrap_err();
    assert!(err.is_persistence());

    // The watermark moved and the page's targets wait as pending records
    assert_eq!(
        harness
            .storage
            .get_watermark(SUBJECT, ResourceKind::Favorites)
            .unwrap(),
        bounded(10, 20)
    );
    assert_eq!(
        harness
            .storage
            .pending_adjacency(SUBJECT, ResourceKind::Favorites)
            .unwrap(),
        vec![10, 20]
    );
    assert_eq!(
        harness
            .storage
            .count_adjacency(SUBJECT, ResourceKind::Favorites)
            .unwrap(),
        0
    );
    // Fan-out still ran for the archived page
    assert_eq!(harness.queue.depth().unwrap().visible, 1);
    let log = harness
        .storage
        .recent_crawls(SUBJECT, ResourceKind::Favorites, 1)
        .unwrap();
    assert_eq!(log[0].status, CrawlStatus::Failed);

    // Redelivery writes the pending records before fetching again
    let outcome = crawl_resource(&ctx, SUBJECT, ResourceKind::Favorites)
        .await
        .unwrap();
    assert_eq!(outcome, CrawlOutcome::NoProgress);
    assert_eq!(
        harness
            .storage
            .count_adjacency(SUBJECT, ResourceKind::Favorites)
            .unwrap(),
        2
    );
    assert!(harness
        .storage
        .pending_adjacency(SUBJECT, ResourceKind::Favorites)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_adjacency_write_retried_in_place() {
    let harness = Harness::start().await;

    Mock::given(method("GET"))
        .and(path("/friends/list.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "users": [user(1), user(2)],
            "next_cursor": 0,
            "previous_cursor": 0
        })))
        .mount(&harness.server)
        .await;

    let mut ctx = harness.ctx.clone();
    ctx.storage = Arc::new(FailingAdjacency::new(harness.storage.clone(), 2));

    let outcome = crawl_resource(&ctx, SUBJECT, ResourceKind::Friends)
        .await
        .unwrap();
    assert!(matches!(outcome, CrawlOutcome::Advanced { items: 2, .. }));
    assert_eq!(
        harness
            .storage
            .count_adjacency(SUBJECT, ResourceKind::Friends)
            .unwrap(),
        2
    );
    assert!(harness
        .storage
        .pending_adjacency(SUBJECT, ResourceKind::Friends)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_burst_larger_than_a_page_is_backfilled() {
    let harness = Harness::with_settings(CrawlSettings {
        page_size: 2,
        adjacency_retry_backoff: Duration::from_millis(1),
        ..CrawlSettings::default()
    })
    .await;
    harness
        .storage
        .put_watermark(SUBJECT, ResourceKind::Timeline, &bounded(5, 10))
        .unwrap();

    // 11, 12 and 13 arrived since the last crawl; a page holds two
    Mock::given(method("GET"))
        .and(path("/statuses/user_timeline.json"))
        .and(query_param("since_id", "10"))
        .and(query_param("max_id", "11"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([plain_post(11)])))
        .expect(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/statuses/user_timeline.json"))
        .and(query_param("since_id", "10"))
        .and(query_param("count", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([plain_post(13), plain_post(12)])),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/statuses/user_timeline.json"))
        .and(query_param("since_id", "13"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&harness.server)
        .await;

    let first = crawl_resource(&harness.ctx, SUBJECT, ResourceKind::Timeline)
        .await
        .unwrap();
    assert_eq!(
        first,
        CrawlOutcome::Advanced {
            items: 2,
            watermark: Watermark::BoundedId {
                since_id: 12,
                max_id: 13,
                backfill_floor: Some(10),
            },
            fanned_out: 0,
        }
    );

    let second = crawl_resource(&harness.ctx, SUBJECT, ResourceKind::Timeline)
        .await
        .unwrap();
    assert!(matches!(second, CrawlOutcome::Advanced { items: 1, .. }));
    assert_eq!(
        harness
            .storage
            .get_watermark(SUBJECT, ResourceKind::Timeline)
            .unwrap(),
        bounded(11, 13)
    );

    let third = crawl_resource(&harness.ctx, SUBJECT, ResourceKind::Timeline)
        .await
        .unwrap();
    assert_eq!(third, CrawlOutcome::NoProgress);

    for id in [11, 12, 13] {
        let key = item_key(ResourceKind::Timeline, SUBJECT, id);
        assert!(harness.blobs.exists(&key).await.unwrap(), "missing {}", key);
    }
}

#[tokio::test]
async fn test_exactly_full_burst_closes_backfill_on_empty_page() {
    let harness = Harness::with_settings(CrawlSettings {
        page_size: 2,
        adjacency_retry_backoff: Duration::from_millis(1),
        ..CrawlSettings::default()
    })
    .await;
    harness
        .storage
        .put_watermark(SUBJECT, ResourceKind::Timeline, &bounded(5, 10))
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/statuses/user_timeline.json"))
        .and(query_param("max_id", "11"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/statuses/user_timeline.json"))
        .and(query_param("since_id", "10"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([plain_post(14), plain_post(12)])),
        )
        .up_to_n_times(1)
        .mount(&harness.server)
        .await;

    crawl_resource(&harness.ctx, SUBJECT, ResourceKind::Timeline)
        .await
        .unwrap();
    let outcome = crawl_resource(&harness.ctx, SUBJECT, ResourceKind::Timeline)
        .await
        .unwrap();

    assert_eq!(outcome, CrawlOutcome::NoProgress);
    assert_eq!(
        harness
            .storage
            .get_watermark(SUBJECT, ResourceKind::Timeline)
            .unwrap(),
        bounded(12, 14)
    );
}
