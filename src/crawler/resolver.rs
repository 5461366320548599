//! Crawl step and recursive resolution of queued work
//!
//! `process_message` is the consumer entry point. It dispatches on the message
//! kind:
//! - `crawl-resource`: one watermark-driven page fetch for a subject
//! - `resolve-post`: fetch and archive a referenced post, then fan out its own
//!   references
//! - `fetch-media`: download and archive a media file
//!
//! Returning `Ok` means the message is fully processed and may be acked.
//! Errors are surfaced unchanged; redelivery is the queue's job.

use crate::crawler::fanout::fan_out;
use crate::crawler::{reconcile, upstream_error, ArchiveContext, PageRequest};
use crate::model::{Item, ResourceKind, SubjectId, Watermark, WorkMessage, WorkPayload};
use crate::storage::{item_key, post_key, profile_key, CrawlLogEntry, CrawlStatus};
use crate::Result;
use chrono::Utc;

/// Result of one crawl step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// Items were archived and the watermark persisted
    Advanced {
        items: usize,
        watermark: Watermark,
        fanned_out: usize,
    },
    /// The page was empty; the stored watermark is untouched
    NoProgress,
}

/// Result of processing one work message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The target was fetched and stored
    Stored { fanned_out: usize },
    /// The target was already in blob storage; nothing was fetched
    AlreadyStored,
    /// A crawl step ran
    Crawled(CrawlOutcome),
}

/// Processes one message to completion
pub async fn process_message(ctx: &ArchiveContext, message: &WorkMessage) -> Result<Resolution> {
    match &message.payload {
        WorkPayload::CrawlResource {
            subject_id,
            resource,
        } => crawl_resource(ctx, *subject_id, *resource)
            .await
            .map(Resolution::Crawled),
        WorkPayload::ResolvePost { post_id, origin } => resolve_post(ctx, *post_id, *origin).await,
        WorkPayload::FetchMedia {
            url,
            destination_key,
            ..
        } => fetch_media(ctx, url, destination_key).await,
    }
}

fn blob_key(kind: ResourceKind, subject: SubjectId, item: &Item, fetched_at: i64) -> String {
    match kind {
        ResourceKind::Profile => profile_key(subject, fetched_at),
        _ => item_key(kind, subject, item.id()),
    }
}

/// Records a crawl log row; a failure here never masks the step's own result
fn log_crawl(ctx: &ArchiveContext, entry: CrawlLogEntry) {
    if let Err(e) = ctx.storage.record_crawl(&entry) {
        tracing::warn!(
            subject = entry.subject,
            resource = %entry.resource,
            "Failed to record crawl outcome: {}",
            e
        );
    }
}

/// Runs one crawl step for one resource kind of one subject
///
/// Order of effects: adjacency records left pending by an earlier step, item
/// blobs, watermark together with the page's pending adjacency targets,
/// fan-out, adjacency records, crawl log. A failed fetch leaves every stored
/// value untouched and emits nothing. An empty page is no progress, not a
/// failure.
pub async fn crawl_resource(
    ctx: &ArchiveContext,
    subject: SubjectId,
    kind: ResourceKind,
) -> Result<CrawlOutcome> {
    if kind.tracks_adjacency() {
        let pending = ctx.storage.pending_adjacency(subject, kind)?;
        if !pending.is_empty() {
            let added = record_adjacency(ctx, subject, kind, &pending).await?;
            tracing::info!(
                subject,
                resource = %kind,
                pending = pending.len(),
                "Recorded {} adjacency edges left by an earlier step",
                added
            );
        }
    }

    let existing = ctx.storage.get_watermark(subject, kind)?;
    let request = PageRequest::from_watermark(kind, &existing, ctx.settings.page_size);

    tracing::debug!(subject, resource = %kind, request = %request, "Fetching page");

    let page = match ctx.fetcher.fetch_page(subject, kind, &request).await {
        Ok(page) => page,
        Err(err) => {
            let status = if err.status() == Some(429) {
                CrawlStatus::RateLimited
            } else {
                CrawlStatus::Failed
            };
            tracing::warn!(
                subject,
                resource = %kind,
                request = %request,
                "Fetch failed: {}",
                err
            );
            log_crawl(
                ctx,
                CrawlLogEntry::new(subject, kind, status, request.to_string()).with_error(&err),
            );
            return Err(upstream_error(format!("{} of subject {}", kind, subject), err));
        }
    };

    // Archive first; the watermark must never point past unstored items
    let now = Utc::now().timestamp();
    for item in &page.items {
        let key = blob_key(kind, subject, item, now);
        ctx.blobs.put(&key, item.to_bytes()?).await?;
    }

    let result = reconcile(kind, &existing, &page, ctx.settings.page_size, now);
    if !result.advanced {
        if existing.is_backfilling() && !result.watermark.is_backfilling() {
            // Nothing older is left; since and max stay as they were
            ctx.storage.put_watermark(subject, kind, &result.watermark)?;
            tracing::info!(
                subject,
                resource = %kind,
                request = %request,
                "Backfill complete; watermark now {}",
                result.watermark
            );
        } else {
            tracing::info!(
                subject,
                resource = %kind,
                request = %request,
                "No progress; watermark stays at {}",
                existing
            );
        }
        log_crawl(
            ctx,
            CrawlLogEntry::new(subject, kind, CrawlStatus::NoProgress, request.to_string()),
        );
        return Ok(CrawlOutcome::NoProgress);
    }

    let targets: Vec<u64> = if kind.tracks_adjacency() {
        page.items.iter().map(Item::id).collect()
    } else {
        Vec::new()
    };
    ctx.storage
        .put_watermark_with_pending(subject, kind, &result.watermark, &targets)?;

    let fanned_out = if kind.yields_posts() {
        fan_out(
            ctx.queue.as_ref(),
            ctx.blobs.as_ref(),
            Some(subject),
            &ctx.work_context,
            &page.items,
        )
        .await
    } else {
        0
    };

    if !targets.is_empty() {
        match record_adjacency(ctx, subject, kind, &targets).await {
            Ok(added) => {
                tracing::debug!(subject, resource = %kind, "Recorded {} new adjacency edges", added)
            }
            Err(e) => {
                // The targets stay pending for the next run of this step
                log_crawl(
                    ctx,
                    CrawlLogEntry::new(subject, kind, CrawlStatus::Failed, request.to_string())
                        .with_items(page.items.len())
                        .with_error(&e),
                );
                return Err(e);
            }
        }
    }

    tracing::info!(
        subject,
        resource = %kind,
        request = %request,
        items = page.items.len(),
        fanned_out,
        "Advanced watermark to {}",
        result.watermark
    );
    log_crawl(
        ctx,
        CrawlLogEntry::new(subject, kind, CrawlStatus::Advanced, request.to_string())
            .with_items(page.items.len()),
    );

    Ok(CrawlOutcome::Advanced {
        items: page.items.len(),
        watermark: result.watermark,
        fanned_out,
    })
}

/// Writes adjacency records, retrying in place with exponential backoff
///
/// The watermark is already persisted at this point, so only this write is
/// repeated. Targets that still fail remain pending in storage.
async fn record_adjacency(
    ctx: &ArchiveContext,
    subject: SubjectId,
    kind: ResourceKind,
    targets: &[u64],
) -> Result<usize> {
    let attempts = ctx.settings.adjacency_write_attempts.max(1);
    let mut delay = ctx.settings.adjacency_retry_backoff;
    let mut attempt = 1;
    loop {
        match ctx.storage.record_adjacency(subject, kind, targets) {
            Ok(added) => return Ok(added),
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    subject,
                    resource = %kind,
                    attempt,
                    "Adjacency write failed, retrying in {:?}: {}",
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(subject, resource = %kind, "Adjacency write failed: {}", e);
                return Err(e.into());
            }
        }
    }
}

/// Fetches and archives a single referenced post, then fans out its references
///
/// A post already in blob storage is not fetched or expanded again.
pub async fn resolve_post(
    ctx: &ArchiveContext,
    post_id: u64,
    origin: Option<SubjectId>,
) -> Result<Resolution> {
    let key = post_key(post_id);
    if ctx.blobs.exists(&key).await? {
        tracing::debug!(post = post_id, "Post already archived");
        return Ok(Resolution::AlreadyStored);
    }

    let post = ctx
        .fetcher
        .fetch_post(post_id)
        .await
        .map_err(|e| upstream_error(format!("post {}", post_id), e))?;

    let item = Item::Post(post);
    ctx.blobs.put(&key, item.to_bytes()?).await?;

    let fanned_out = fan_out(
        ctx.queue.as_ref(),
        ctx.blobs.as_ref(),
        origin,
        &ctx.work_context,
        std::slice::from_ref(&item),
    )
    .await;

    tracing::info!(post = post_id, fanned_out, "Resolved post");
    Ok(Resolution::Stored { fanned_out })
}

/// Downloads a media URL into `destination_key`; no further fan-out
pub async fn fetch_media(ctx: &ArchiveContext, url: &str, destination_key: &str) -> Result<Resolution> {
    if ctx.blobs.exists(destination_key).await? {
        tracing::debug!("Media {} already archived", destination_key);
        return Ok(Resolution::AlreadyStored);
    }

    let bytes = ctx
        .fetcher
        .download(url, ctx.settings.max_media_bytes)
        .await
        .map_err(|e| upstream_error(format!("media {}", url), e))?;

    let size = bytes.len();
    ctx.blobs.put(destination_key, bytes).await?;

    tracing::info!(bytes = size, "Stored media {}", destination_key);
    Ok(Resolution::Stored { fanned_out: 0 })
}
