//! Resolution of referenced posts and media

use crate::common::{plain_post, quoting_post, retweet_with_media, Harness};
use timeline_archiver::crawler::{fetch_media, process_message, resolve_post, CrawlSettings, Resolution};
use timeline_archiver::model::{WorkMessage, WorkPayload};
use timeline_archiver::queue::MessageQueue;
use timeline_archiver::storage::{post_key, BlobStore};
use timeline_archiver::ArchiveError;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_resolve_post_is_idempotent() {
    let harness = Harness::start().await;
    let media = [harness.media_url("c.jpg")];

    Mock::given(method("GET"))
        .and(path("/statuses/show.json"))
        .and(query_param("id", "100"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(retweet_with_media(100, 99, &media)),
        )
        .expect(1)
        .mount(&harness.server)
        .await;

    let first = resolve_post(&harness.ctx, 100, Some(42)).await.unwrap();
    let second = resolve_post(&harness.ctx, 100, Some(42)).await.unwrap();

    assert_eq!(first, Resolution::Stored { fanned_out: 2 });
    assert_eq!(second, Resolution::AlreadyStored);
    assert!(harness.blobs.exists(&post_key(100)).await.unwrap());

    // The second delivery fans out nothing
    assert_eq!(harness.queue.depth().unwrap().visible, 2);
}

#[tokio::test]
async fn test_resolved_post_references_are_pruned() {
    let harness = Harness::start().await;
    harness
        .blobs
        .put(&post_key(5), b"{\"id\":5}".to_vec())
        .await
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/statuses/show.json"))
        .and(query_param("id", "6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(quoting_post(6, 5)))
        .mount(&harness.server)
        .await;

    let resolution = resolve_post(&harness.ctx, 6, None).await.unwrap();
    assert_eq!(resolution, Resolution::Stored { fanned_out: 0 });
    assert!(harness.queue.receive().await.unwrap().is_none());
}

#[tokio::test]
async fn test_resolve_missing_post_is_fatal() {
    let harness = Harness::start().await;

    Mock::given(method("GET"))
        .and(path("/statuses/show.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&harness.server)
        .await;

    let err = resolve_post(&harness.ctx, 404, None).await.unwrap_err();
    assert!(matches!(err, ArchiveError::FatalUpstream { .. }));
    assert!(!harness.blobs.exists(&post_key(404)).await.unwrap());
}

#[tokio::test]
async fn test_fetch_media_stores_bytes() {
    let harness = Harness::start().await;
    let bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];

    Mock::given(method("GET"))
        .and(path("/media/a.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.clone()))
        .expect(1)
        .mount(&harness.server)
        .await;

    let url = harness.media_url("a.jpg");
    let first = fetch_media(&harness.ctx, &url, "media/a.jpg").await.unwrap();
    let second = fetch_media(&harness.ctx, &url, "media/a.jpg").await.unwrap();

    assert_eq!(first, Resolution::Stored { fanned_out: 0 });
    assert_eq!(second, Resolution::AlreadyStored);
    assert_eq!(harness.blobs.get("media/a.jpg").await.unwrap(), Some(bytes));
}

#[tokio::test]
async fn test_oversized_media_is_rejected() {
    let harness = Harness::with_settings(CrawlSettings {
        max_media_bytes: 4,
        ..CrawlSettings::default()
    })
    .await;

    Mock::given(method("GET"))
        .and(path("/media/big.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
        .mount(&harness.server)
        .await;

    let err = fetch_media(&harness.ctx, &harness.media_url("big.mp4"), "media/big.mp4")
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::FatalUpstream { .. }));
    assert!(!harness.blobs.exists("media/big.mp4").await.unwrap());
}

#[tokio::test]
async fn test_process_message_dispatches_on_kind() {
    let harness = Harness::start().await;

    Mock::given(method("GET"))
        .and(path("/statuses/show.json"))
        .and(query_param("id", "77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(plain_post(77)))
        .mount(&harness.server)
        .await;

    let message = WorkMessage::resolve_post(77, None, &harness.ctx.work_context);
    assert!(matches!(message.payload, WorkPayload::ResolvePost { .. }));

    let resolution = process_message(&harness.ctx, &message).await.unwrap();
    assert_eq!(resolution, Resolution::Stored { fanned_out: 0 });
    assert!(harness.blobs.exists(&post_key(77)).await.unwrap());
}
