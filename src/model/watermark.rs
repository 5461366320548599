/// Persisted crawl watermarks
///
/// A watermark records how far the crawl of one (subject, resource kind) pair
/// has progressed. Its shape depends on how the resource is paginated.
use crate::model::ResourceKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cursor value the upstream uses for "start from the beginning"
pub const CURSOR_START: i64 = -1;

/// Cursor value the upstream uses for "no more pages"
pub const CURSOR_END: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "kebab-case")]
pub enum Watermark {
    /// Lowest and highest item ID seen on the last page that advanced
    ///
    /// `backfill_floor` is set while older items between the floor and
    /// `since_id` are still unfetched; `Some(0)` means back to the oldest item.
    BoundedId {
        since_id: u64,
        max_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backfill_floor: Option<u64>,
    },

    /// Cursors returned verbatim by the last page that advanced
    CursorPair {
        next_cursor: i64,
        previous_cursor: i64,
    },

    /// Unix timestamp of the last stored profile snapshot
    ProfileSnapshot { fetched_at: i64 },
}

impl Watermark {
    /// Zero-value watermark for a resource kind (what the store returns when absent)
    pub fn zero_for(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Favorites | ResourceKind::Timeline => Self::BoundedId {
                since_id: 0,
                max_id: 0,
                backfill_floor: None,
            },
            ResourceKind::Followers | ResourceKind::Friends => Self::CursorPair {
                next_cursor: CURSOR_END,
                previous_cursor: CURSOR_END,
            },
            ResourceKind::Profile => Self::ProfileSnapshot { fetched_at: 0 },
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Self::BoundedId {
                since_id,
                max_id,
                backfill_floor,
            } => *since_id == 0 && *max_id == 0 && backfill_floor.is_none(),
            Self::CursorPair {
                next_cursor,
                previous_cursor,
            } => *next_cursor == CURSOR_END && *previous_cursor == CURSOR_END,
            Self::ProfileSnapshot { fetched_at } => *fetched_at == 0,
        }
    }

    /// Returns true if this watermark has the shape used by `kind`
    pub fn matches_kind(&self, kind: ResourceKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(&Self::zero_for(kind))
    }

    /// Name of the shape, as stored in the database
    pub fn shape_name(&self) -> &'static str {
        match self {
            Self::BoundedId { .. } => "bounded-id",
            Self::CursorPair { .. } => "cursor-pair",
            Self::ProfileSnapshot { .. } => "profile-snapshot",
        }
    }

    /// True while a bounded-ID crawl is still paging back through a gap
    pub fn is_backfilling(&self) -> bool {
        matches!(
            self,
            Self::BoundedId {
                backfill_floor: Some(_),
                ..
            }
        )
    }

    /// Splits the watermark into the shape name and three integer columns
    ///
    /// Upstream IDs fit comfortably below `i64::MAX`; larger values are rejected
    /// rather than wrapped.
    pub fn to_columns(&self) -> Option<(&'static str, i64, i64, Option<i64>)> {
        match *self {
            Self::BoundedId {
                since_id,
                max_id,
                backfill_floor,
            } => Some((
                self.shape_name(),
                i64::try_from(since_id).ok()?,
                i64::try_from(max_id).ok()?,
                match backfill_floor {
                    Some(floor) => Some(i64::try_from(floor).ok()?),
                    None => None,
                },
            )),
            Self::CursorPair {
                next_cursor,
                previous_cursor,
            } => Some((self.shape_name(), next_cursor, previous_cursor, None)),
            Self::ProfileSnapshot { fetched_at } => Some((self.shape_name(), fetched_at, 0, None)),
        }
    }

    /// Rebuilds a watermark from its stored columns
    pub fn from_columns(shape: &str, first: i64, second: i64, third: Option<i64>) -> Option<Self> {
        match shape {
            "bounded-id" => Some(Self::BoundedId {
                since_id: u64::try_from(first).ok()?,
                max_id: u64::try_from(second).ok()?,
                backfill_floor: match third {
                    Some(floor) => Some(u64::try_from(floor).ok()?),
                    None => None,
                },
            }),
            "cursor-pair" => Some(Self::CursorPair {
                next_cursor: first,
                previous_cursor: second,
            }),
            "profile-snapshot" => Some(Self::ProfileSnapshot { fetched_at: first }),
            _ => None,
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BoundedId {
                since_id,
                max_id,
                backfill_floor: None,
            } => write!(f, "since={} max={}", since_id, max_id),
            Self::BoundedId {
                since_id,
                max_id,
                backfill_floor: Some(floor),
            } => write!(f, "since={} max={} backfill>{}", since_id, max_id, floor),
            Self::CursorPair {
                next_cursor,
                previous_cursor,
            } => write!(f, "next={} previous={}", next_cursor, previous_cursor),
            Self::ProfileSnapshot { fetched_at } => write!(f, "fetched_at={}", fetched_at),
        }
    }
}
