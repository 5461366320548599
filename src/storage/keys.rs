/// Blob key construction
///
/// Crawled items live under `<resource>/<subject>/<item>`. Resolved posts and
/// media are content-addressed globally so that every subject referencing the
/// same post or file shares one blob.
use crate::model::{ResourceKind, SubjectId};
use url::Url;

/// Key for an item fetched while crawling a subject's resource
pub fn item_key(resource: ResourceKind, subject: SubjectId, item_id: u64) -> String {
    format!("{}/{}/{}", resource.as_str(), subject, item_id)
}

/// Key for a profile snapshot taken at `fetched_at` (unix seconds)
pub fn profile_key(subject: SubjectId, fetched_at: i64) -> String {
    format!("{}/{}/{}", ResourceKind::Profile.as_str(), subject, fetched_at)
}

/// Key for a post resolved by ID
pub fn post_key(post_id: u64) -> String {
    format!("statuses/{}", post_id)
}

/// Key for a media file: `media/<file name>` from the URL path
///
/// Returns `None` when the URL has no usable file name.
pub fn media_key(media_url: &str) -> Option<String> {
    let url = Url::parse(media_url).ok()?;
    let name = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        && !name.starts_with('.');
    if !valid {
        return None;
    }
    Some(format!("media/{}", name))
}
