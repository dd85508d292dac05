//! Pagination planning: range clamping and scan-anchor selection.
//!
//! Given the total size of a filtered set, a requested inclusive range, and
//! optional cursors from a prior page, this module computes the cheapest
//! physical scan. Four candidate anchors are costed by the number of records
//! the backend would have to skip:
//!
//! - forward from the head of the ordering (`range_start` skips),
//! - reverse from the tail (`total - 1 - range_end` skips),
//! - forward from just past the prior page's `last_visible` cursor,
//! - reverse from just before the prior page's `first_visible` cursor.
//!
//! The minimum-skip candidate wins. Cursor-anchored candidates are only
//! hypotheses: the executor must re-resolve the cursor's id against the
//! current filtered result (a single point lookup) and fall back to the
//! next-cheapest plan when the id has vanished. Reverse plans scan in the
//! opposite physical order and the executor reverses the materialized page in
//! memory, so output order always matches the requested sort direction.

use crate::{
    error::{StoreError, StoreResult},
    types::{CursorEntry, PageInfo},
};

/// A requested range clamped into `[0, total - 1]`, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClampedRange {
    /// Clamped inclusive start.
    pub start: u64,
    /// Clamped inclusive end.
    pub end: u64,
}

impl ClampedRange {
    /// Number of records in the window.
    #[must_use]
    pub fn window(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Clamps a requested inclusive range against the filtered set size.
///
/// Returns `Ok(None)` when the set is empty (the caller returns an empty
/// page with `range_end = range_start - 1`).
///
/// # Errors
///
/// Returns [`StoreError::InvalidParameters`] when `start` is negative or
/// `end < start`.
pub fn clamp_range(total: u64, range: [i64; 2]) -> StoreResult<Option<ClampedRange>> {
    let [start, end] = range;
    if start < 0 {
        return Err(StoreError::invalid_parameters(format!(
            "range start must be >= 0, got {start}"
        )));
    }
    if end < start {
        return Err(StoreError::invalid_parameters(format!(
            "range end {end} precedes range start {start}"
        )));
    }
    if total == 0 {
        return Ok(None);
    }
    let max = total - 1;
    Ok(Some(ClampedRange {
        start: (start as u64).min(max),
        end: (end as u64).min(max),
    }))
}

/// Where a physical scan begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanAnchor {
    /// Head of the requested ordering.
    Head,
    /// Tail of the requested ordering (scan runs in reverse).
    Tail,
    /// Just past the prior page's last record, scanning forward.
    AfterLast(CursorEntry),
    /// Just before the prior page's first record, scanning in reverse.
    BeforeFirst(CursorEntry),
}

/// One candidate physical scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPlan {
    /// Where the scan starts.
    pub anchor: ScanAnchor,
    /// Whether the scan runs against the requested sort direction. The
    /// executor reverses the materialized page before returning.
    pub reverse: bool,
    /// Records the backend must skip after the anchor.
    pub skip: u64,
    /// Records to materialize (the window size).
    pub limit: u64,
}

impl ScanPlan {
    /// Whether this plan is anchored on a caller-supplied cursor and thus
    /// needs re-resolution before execution.
    #[must_use]
    pub fn is_cursor_anchored(&self) -> bool {
        matches!(self.anchor, ScanAnchor::AfterLast(_) | ScanAnchor::BeforeFirst(_))
    }
}

/// Computes all valid candidate plans, cheapest first.
///
/// Ties prefer cursor-free anchors (head, then tail), which need no
/// re-resolution lookup.
#[must_use]
pub fn candidate_plans(total: u64, range: ClampedRange, page_info: &PageInfo) -> Vec<ScanPlan> {
    let window = range.window();
    let mut plans = vec![
        ScanPlan { anchor: ScanAnchor::Head, reverse: false, skip: range.start, limit: window },
        ScanPlan {
            anchor: ScanAnchor::Tail,
            reverse: true,
            skip: total - 1 - range.end,
            limit: window,
        },
    ];

    // Cursor positions are untrusted caller input; checked arithmetic keeps
    // a hostile position from panicking the planner.
    if let Some(last) = &page_info.last_visible {
        if let Some(next) = last.position.checked_add(1) {
            if range.start >= next {
                plans.push(ScanPlan {
                    anchor: ScanAnchor::AfterLast(last.clone()),
                    reverse: false,
                    skip: range.start - next,
                    limit: window,
                });
            }
        }
    }
    if let Some(first) = &page_info.first_visible {
        if first.position >= 1 && range.end <= first.position - 1 {
            plans.push(ScanPlan {
                anchor: ScanAnchor::BeforeFirst(first.clone()),
                reverse: true,
                skip: first.position - 1 - range.end,
                limit: window,
            });
        }
    }

    // Stable: insertion order breaks ties in favor of cursor-free plans.
    plans.sort_by_key(|plan| plan.skip);
    plans
}
