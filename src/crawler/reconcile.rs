//! Watermark reconciliation
//!
//! Computes the watermark to persist after a page fetch and whether the fetch
//! made progress. An empty page never produces a new watermark.

use crate::crawler::Page;
use crate::model::{ResourceKind, Watermark, CURSOR_END};

/// Result of reconciling one page against the stored watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub watermark: Watermark,
    /// True when `watermark` should be persisted
    pub advanced: bool,
}

impl Reconciliation {
    fn unchanged(watermark: Watermark) -> Self {
        Self {
            watermark,
            advanced: false,
        }
    }

    fn advanced(watermark: Watermark) -> Self {
        Self {
            watermark,
            advanced: true,
        }
    }
}

/// Lowest and highest positive ID, as `(lower, upper)`
///
/// `lower` is a true running minimum: the order of the IDs does not matter.
/// Zero IDs are ignored. Returns `None` when no positive ID is present.
pub fn id_bounds(ids: impl IntoIterator<Item = u64>) -> Option<(u64, u64)> {
    ids.into_iter()
        .filter(|&id| id > 0)
        .fold(None, |bounds, id| match bounds {
            None => Some((id, id)),
            Some((lower, upper)) => Some((lower.min(id), upper.max(id))),
        })
}

/// Reconciles a fetched page with the existing watermark for `kind`
///
/// - Bounded-ID resources store `{sinceId: lowest, maxId: highest}` of the
///   page, with `maxId` never falling below the stored value. A full page
///   (`page_size` items) may hide older unfetched items, so it opens a
///   backfill down to the previous `maxId`. Backfill pages only lower
///   `sinceId`; the first short page closes the backfill.
/// - Cursor-pair resources store the returned cursors verbatim, including an
///   end-of-list `nextCursor` of 0.
/// - Profiles store the snapshot time `now`.
///
/// An empty page never advances. The only change it can make is closing an
/// open backfill, leaving `sinceId` and `maxId` as they were.
///
/// A watermark of the wrong shape for `kind` is treated as absent.
pub fn reconcile(
    kind: ResourceKind,
    existing: &Watermark,
    page: &Page,
    page_size: u32,
    now: i64,
) -> Reconciliation {
    let existing = if existing.matches_kind(kind) {
        *existing
    } else {
        Watermark::zero_for(kind)
    };

    if page.items.is_empty() {
        return match existing {
            Watermark::BoundedId {
                since_id,
                max_id,
                backfill_floor: Some(_),
            } => Reconciliation::unchanged(Watermark::BoundedId {
                since_id,
                max_id,
                backfill_floor: None,
            }),
            _ => Reconciliation::unchanged(existing),
        };
    }

    let full = page_size > 0 && page.items.len() >= page_size as usize;

    match existing {
        Watermark::BoundedId {
            since_id: stored_since,
            max_id: stored_max,
            backfill_floor,
        } => match (backfill_floor, id_bounds(page.items.iter().map(|item| item.id()))) {
            (Some(floor), Some((lower, _))) => {
                let since_id = lower.min(stored_since);
                Reconciliation::advanced(Watermark::BoundedId {
                    since_id,
                    max_id: stored_max,
                    backfill_floor: open_gap(full, floor, since_id),
                })
            }
            (None, Some((lower, upper))) => Reconciliation::advanced(Watermark::BoundedId {
                since_id: lower,
                max_id: upper.max(stored_max),
                backfill_floor: open_gap(full, stored_max, lower),
            }),
            (_, None) => Reconciliation::unchanged(existing),
        },
        Watermark::CursorPair { .. } => Reconciliation::advanced(Watermark::CursorPair {
            next_cursor: page.next_cursor.unwrap_or(CURSOR_END),
            previous_cursor: page.previous_cursor.unwrap_or(CURSOR_END),
        }),
        Watermark::ProfileSnapshot { .. } => {
            Reconciliation::advanced(Watermark::ProfileSnapshot { fetched_at: now })
        }
    }
}

/// Floor of the backfill a page leaves open, if any
fn open_gap(full: bool, floor: u64, since_id: u64) -> Option<u64> {
    (full && since_id > floor.saturating_add(1)).then_some(floor)
}
