//! Page fetching from the upstream API
//!
//! This module handles every upstream request the archiver makes:
//! - Turning a stored watermark into the next page request
//! - Paging timelines and likes by ID bounds, followers and friends by cursor
//! - Fetching single posts for the resolver
//! - Size-capped media downloads
//! - Client-side pacing with governor
//!
//! HTTP status is reported separately from transport failure so callers can
//! classify the error.

use crate::config::ApiConfig;
use crate::model::{
    Item, Post, ResourceKind, SubjectId, UserProfile, Watermark, CURSOR_END, CURSOR_START,
};
use crate::ConfigError;
use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Longest error body kept in a `FetchError::Status`
const MAX_ERROR_BODY: usize = 512;

/// Errors reported by a `PageFetcher`
#[derive(Debug, Error)]
pub enum FetchError {
    /// The upstream answered with a non-success status
    #[error("HTTP {status} from {endpoint}")]
    Status {
        status: u16,
        endpoint: String,
        body: String,
    },

    /// The request never produced a response
    #[error("Transport error calling {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("Request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("Malformed response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    #[error("Response from {endpoint} exceeds {limit} bytes")]
    TooLarge { endpoint: String, limit: u64 },

    #[error("Request {request} does not apply to resource {resource}")]
    InvalidRequest {
        resource: ResourceKind,
        request: String,
    },
}

impl FetchError {
    /// HTTP status of the response, if there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn from_reqwest(endpoint: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                endpoint: endpoint.to_string(),
            }
        } else if err.is_decode() {
            Self::Decode {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        } else {
            Self::Transport {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Bounds or cursor for one page fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRequest {
    /// Items with IDs above `since_id` (everything when `None`), and at or
    /// below `max_id` when set
    Bounded {
        since_id: Option<u64>,
        max_id: Option<u64>,
        count: u32,
    },

    /// The page at an opaque cursor
    Cursor { cursor: i64, count: u32 },

    /// The subject's current profile
    Profile,
}

impl PageRequest {
    /// Next request for `kind` given the stored watermark
    ///
    /// Bounded resources resume above the stored `maxId`. While a backfill is
    /// open they instead page down from just below `sinceId` towards the
    /// floor, so a burst larger than one page is not skipped. Cursor resources
    /// resume at the stored `nextCursor`; an end-of-list cursor wraps around
    /// to the start so the list is re-synced.
    pub fn from_watermark(kind: ResourceKind, watermark: &Watermark, count: u32) -> Self {
        let watermark = if watermark.matches_kind(kind) {
            *watermark
        } else {
            Watermark::zero_for(kind)
        };

        match watermark {
            Watermark::BoundedId {
                since_id,
                backfill_floor: Some(floor),
                ..
            } if since_id > floor.saturating_add(1) => Self::Bounded {
                since_id: (floor > 0).then_some(floor),
                max_id: Some(since_id - 1),
                count,
            },
            Watermark::BoundedId { max_id, .. } => Self::Bounded {
                since_id: (max_id > 0).then_some(max_id),
                max_id: None,
                count,
            },
            Watermark::CursorPair { next_cursor, .. } => Self::Cursor {
                cursor: if next_cursor == CURSOR_END {
                    CURSOR_START
                } else {
                    next_cursor
                },
                count,
            },
            Watermark::ProfileSnapshot { .. } => Self::Profile,
        }
    }
}

impl fmt::Display for PageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded {
                since_id,
                max_id,
                count,
            } => {
                match since_id {
                    Some(id) => write!(f, "since_id={}", id)?,
                    None => f.write_str("since_id=-")?,
                }
                if let Some(id) = max_id {
                    write!(f, " max_id={}", id)?;
                }
                write!(f, " count={}", count)
            }
            Self::Cursor { cursor, count } => write!(f, "cursor={} count={}", cursor, count),
            Self::Profile => f.write_str("profile"),
        }
    }
}

/// One page of results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    /// Cursors as returned by the upstream; `None` for non-cursor resources
    pub next_cursor: Option<i64>,
    pub previous_cursor: Option<i64>,
}

impl Page {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    pub fn with_cursors(items: Vec<Item>, next_cursor: i64, previous_cursor: i64) -> Self {
        Self {
            items,
            next_cursor: Some(next_cursor),
            previous_cursor: Some(previous_cursor),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The upstream API as seen by the crawl
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches one page of `kind` for `subject`
    async fn fetch_page(
        &self,
        subject: SubjectId,
        kind: ResourceKind,
        request: &PageRequest,
    ) -> Result<Page, FetchError>;

    /// Fetches a single post by ID
    async fn fetch_post(&self, post_id: u64) -> Result<Post, FetchError>;

    /// Downloads a media URL, failing once the body exceeds `max_bytes`
    async fn download(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>, FetchError>;
}

#[derive(Deserialize)]
struct CursoredUsers {
    #[serde(default)]
    users: Vec<Value>,
    #[serde(default)]
    next_cursor: i64,
    #[serde(default)]
    previous_cursor: i64,
}

/// reqwest-backed fetcher for the v1.1 REST API
pub struct HttpPageFetcher {
    client: Client,
    base_url: Url,
    bearer_token: String,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl HttpPageFetcher {
    /// Builds a fetcher from the API configuration
    pub fn new(config: &ApiConfig) -> crate::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("timeline-archiver/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()?;

        // Url::join replaces the last segment unless the base ends with '/'
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url =
            Url::parse(&base).map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", base, e)))?;

        let rate = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_minute(rate));

        Ok(Self {
            client,
            base_url,
            bearer_token: config.bearer_token.clone(),
            rate_limiter,
        })
    }

    fn endpoint_url(&self, endpoint: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(endpoint)
            .map_err(|e| FetchError::Transport {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })
    }

    async fn get_json(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        self.rate_limiter.until_ready().await;

        let url = self.endpoint_url(endpoint)?;
        let mut request = self.client.get(url).query(query);
        if !self.bearer_token.is_empty() {
            request = request.bearer_auth(&self.bearer_token);
        }

        tracing::debug!("GET {} {:?}", endpoint, query);
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(endpoint, e))?;
        let response = check_status(endpoint, response).await?;

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::from_reqwest(endpoint, e))
    }
}

async fn check_status(endpoint: &str, response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(FetchError::Status {
        status: status.as_u16(),
        endpoint: endpoint.to_string(),
        body,
    })
}

fn decode_error(endpoint: &str, err: impl fmt::Display) -> FetchError {
    FetchError::Decode {
        endpoint: endpoint.to_string(),
        message: err.to_string(),
    }
}

fn parse_posts(endpoint: &str, value: Value) -> Result<Vec<Item>, FetchError> {
    let Value::Array(entries) = value else {
        return Err(decode_error(endpoint, "expected an array of posts"));
    };
    entries
        .into_iter()
        .map(|raw| {
            Post::from_json(raw)
                .map(Item::Post)
                .map_err(|e| decode_error(endpoint, e))
        })
        .collect()
}

fn parse_users(endpoint: &str, value: Value) -> Result<Page, FetchError> {
    let listing = CursoredUsers::deserialize(value).map_err(|e| decode_error(endpoint, e))?;
    let items = listing
        .users
        .into_iter()
        .map(|raw| {
            UserProfile::from_json(raw)
                .map(Item::User)
                .map_err(|e| decode_error(endpoint, e))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page::with_cursors(
        items,
        listing.next_cursor,
        listing.previous_cursor,
    ))
}

fn endpoint_for(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Timeline => "statuses/user_timeline.json",
        ResourceKind::Favorites => "favorites/list.json",
        ResourceKind::Followers => "followers/list.json",
        ResourceKind::Friends => "friends/list.json",
        ResourceKind::Profile => "users/show.json",
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(
        &self,
        subject: SubjectId,
        kind: ResourceKind,
        request: &PageRequest,
    ) -> Result<Page, FetchError> {
        let endpoint = endpoint_for(kind);
        let mut query = vec![("user_id", subject.to_string())];

        match (kind, request) {
            (
                ResourceKind::Timeline | ResourceKind::Favorites,
                PageRequest::Bounded {
                    since_id,
                    max_id,
                    count,
                },
            ) => {
                query.push(("count", count.to_string()));
                query.push(("tweet_mode", "extended".to_string()));
                query.push(("include_entities", "true".to_string()));
                if kind == ResourceKind::Timeline {
                    query.push(("include_rts", "true".to_string()));
                }
                if let Some(id) = since_id {
                    query.push(("since_id", id.to_string()));
                }
                if let Some(id) = max_id {
                    query.push(("max_id", id.to_string()));
                }
                let value = self.get_json(endpoint, &query).await?;
                Ok(Page::new(parse_posts(endpoint, value)?))
            }
            (ResourceKind::Followers | ResourceKind::Friends, PageRequest::Cursor { cursor, count }) => {
                query.push(("count", count.to_string()));
                query.push(("cursor", cursor.to_string()));
                query.push(("skip_status", "true".to_string()));
                let value = self.get_json(endpoint, &query).await?;
                parse_users(endpoint, value)
            }
            (ResourceKind::Profile, PageRequest::Profile) => {
                let value = self.get_json(endpoint, &query).await?;
                let user = UserProfile::from_json(value).map_err(|e| decode_error(endpoint, e))?;
                Ok(Page::new(vec![Item::User(user)]))
            }
            _ => Err(FetchError::InvalidRequest {
                resource: kind,
                request: request.to_string(),
            }),
        }
    }

    async fn fetch_post(&self, post_id: u64) -> Result<Post, FetchError> {
        let endpoint = "statuses/show.json";
        let query = [
            ("id", post_id.to_string()),
            ("tweet_mode", "extended".to_string()),
            ("include_entities", "true".to_string()),
        ];
        let value = self.get_json(endpoint, &query).await?;
        Post::from_json(value).map_err(|e| decode_error(endpoint, e))
    }

    async fn download(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>, FetchError> {
        // Media hosts are not the API; no pacing and no credentials
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        response = check_status(url, response).await?;

        let too_large = || FetchError::TooLarge {
            endpoint: url.to_string(),
            limit: max_bytes,
        };
        if response.content_length().is_some_and(|len| len > max_bytes) {
            return Err(too_large());
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?
        {
            if (bytes.len() + chunk.len()) as u64 > max_bytes {
                return Err(too_large());
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}
