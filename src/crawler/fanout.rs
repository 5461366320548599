//! Fan-out of embedded references
//!
//! Each fetched post may reference other posts (the original of a retweet,
//! a quoted post) and media. Those become `resolve-post` and `fetch-media`
//! messages. Emission is best-effort: failures are logged and never fail the
//! crawl step that produced the item.

use crate::model::{Item, SubjectId, WorkContext, WorkMessage, WorkPayload};
use crate::queue::MessageQueue;
use crate::storage::{media_key, post_key, BlobStore};
use std::collections::HashSet;

/// Builds the work messages for one item's embedded references
///
/// User profiles carry no references. Within one item, duplicate post IDs and
/// duplicate media destinations are emitted once.
pub fn dispatch(origin: Option<SubjectId>, context: &WorkContext, item: &Item) -> Vec<WorkMessage> {
    let Some(post) = item.as_post() else {
        return Vec::new();
    };

    let mut messages = Vec::new();
    let mut posts = HashSet::new();
    let mut media = HashSet::new();

    if post.retweeted_id != 0 && posts.insert(post.retweeted_id) {
        messages.push(WorkMessage::resolve_post(post.retweeted_id, origin, context));
    }

    if !post.quoted_status_id.is_empty() {
        match post.quoted_status_id.parse::<u64>() {
            Ok(quoted) if quoted != 0 => {
                if posts.insert(quoted) {
                    messages.push(WorkMessage::resolve_post(quoted, origin, context));
                }
            }
            _ => tracing::warn!(
                post = post.id,
                "Ignoring unparseable quoted post ID '{}'",
                post.quoted_status_id
            ),
        }
    }

    for entity in &post.media {
        let urls = entity
            .preferred_url()
            .into_iter()
            .chain(entity.best_video_variant().map(|v| v.url.as_str()));

        for url in urls {
            match media_key(url) {
                Some(key) => {
                    if media.insert(key.clone()) {
                        messages.push(WorkMessage::fetch_media(url, key, origin, context));
                    }
                }
                None => tracing::warn!(post = post.id, "No usable file name in media URL {}", url),
            }
        }
    }

    messages
}

/// Drops messages whose target is already archived
///
/// This is the memoization that bounds recursive resolution: a stored post is
/// never expanded again. A failed existence check keeps the message.
pub async fn prune_stored(blobs: &dyn BlobStore, messages: Vec<WorkMessage>) -> Vec<WorkMessage> {
    let mut pending = Vec::with_capacity(messages.len());
    for message in messages {
        let key = match &message.payload {
            WorkPayload::ResolvePost { post_id, .. } => post_key(*post_id),
            WorkPayload::FetchMedia {
                destination_key, ..
            } => destination_key.clone(),
            WorkPayload::CrawlResource { .. } => {
                pending.push(message);
                continue;
            }
        };

        match blobs.exists(&key).await {
            Ok(true) => tracing::debug!("Skipping {}: already stored", key),
            Ok(false) => pending.push(message),
            Err(e) => {
                tracing::warn!("Existence check for {} failed, enqueueing anyway: {}", key, e);
                pending.push(message);
            }
        }
    }
    pending
}

/// Sends messages, logging failures; returns how many were sent
pub async fn emit(queue: &dyn MessageQueue, messages: &[WorkMessage]) -> usize {
    let mut sent = 0;
    for message in messages {
        match queue.send(message).await {
            Ok(()) => sent += 1,
            Err(e) => tracing::warn!("Failed to enqueue {} message: {}", message.kind(), e),
        }
    }
    sent
}

/// Dispatches, prunes and emits the references of every item
pub async fn fan_out(
    queue: &dyn MessageQueue,
    blobs: &dyn BlobStore,
    origin: Option<SubjectId>,
    context: &WorkContext,
    items: &[Item],
) -> usize {
    let messages: Vec<WorkMessage> = items
        .iter()
        .flat_map(|item| dispatch(origin, context, item))
        .collect();
    if messages.is_empty() {
        return 0;
    }

    let pending = prune_stored(blobs, messages).await;
    emit(queue, &pending).await
}
