//! Common types shared across store operations.
//!
//! This module defines the record shape, sort descriptors, pagination cursors,
//! query inputs and outputs, and the total order used to compare JSON values
//! during sorting and filtering.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{StoreError, StoreResult},
    filter::Filter,
};

/// A stored record: an exogenous id plus its value payload.
///
/// The id is never present inside the value payload; it is attached by the
/// store layer on read and stripped (rejected, in fact) before write.
///
/// # Examples
///
/// ```
/// use duostore_core::Record;
/// use serde_json::json;
///
/// let record = Record::new("user-1", json!({"name": "Alice"}));
/// assert_eq!(record.id, "user-1");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// The record identifier. Immutable post-creation.
    pub id: String,

    /// The value payload, excluding the id.
    pub value: Value,
}

impl Record {
    /// Creates a new record.
    pub fn new(id: impl Into<String>, value: Value) -> Self {
        Self { id: id.into(), value }
    }

    /// Creates a record with an empty object payload.
    ///
    /// Mutating operations return this shape as the pre-mutation snapshot
    /// when no record previously existed but the write was permitted.
    pub fn empty(id: impl Into<String>) -> Self {
        Self { id: id.into(), value: Value::Object(serde_json::Map::new()) }
    }
}

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    /// Ascending order.
    #[serde(rename = "ASC", alias = "asc")]
    Ascending,
    /// Descending order.
    #[serde(rename = "DESC", alias = "desc")]
    Descending,
}

/// Sort descriptor: a value field and a direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    /// The value field to order by.
    pub field: String,

    /// The requested output direction.
    #[serde(alias = "order")]
    pub direction: SortDirection,
}

impl Sort {
    /// Creates an ascending sort on the given field.
    #[must_use]
    pub fn ascending(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Ascending }
    }

    /// Creates a descending sort on the given field.
    #[must_use]
    pub fn descending(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Descending }
    }

    /// Whether the requested direction is descending.
    #[must_use]
    pub fn is_descending(&self) -> bool {
        self.direction == SortDirection::Descending
    }
}

/// A cursor marker from a previously returned page.
///
/// `position` is a 0-indexed offset into the previously computed
/// filtered+sorted result set; `id` is the record occupying that position
/// when the page was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorEntry {
    /// Offset into the prior filtered+sorted result set.
    pub position: u64,
    /// Id of the record at that offset.
    pub id: String,
}

/// Caller-held pagination cursors.
///
/// Cursors are opaque to the caller and only ever produced by echoing back
/// positions the caller itself requested; the store persists no cursor state.
/// Stale cursors (pointing at since-deleted records) are detected and
/// discarded during anchor selection, never trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageInfo {
    /// First record of the prior page.
    pub first_visible: Option<CursorEntry>,
    /// Last record of the prior page.
    pub last_visible: Option<CursorEntry>,
}

/// A complete query request: filter, sort, inclusive range, prior cursors.
#[derive(Debug, Clone, Default)]
pub struct RangeQuery {
    /// Filter clauses; empty matches everything.
    pub filter: Filter,
    /// Sort descriptor. Required; an empty sort field is `InvalidParameters`.
    pub sort: Option<Sort>,
    /// Inclusive `[start, end]` range into the filtered+sorted set.
    pub range: [i64; 2],
    /// Cursors from a prior page, if any.
    pub page_info: PageInfo,
}

impl RangeQuery {
    /// Creates a query with no cursors.
    #[must_use]
    pub fn new(filter: Filter, sort: Sort, range: [i64; 2]) -> Self {
        Self { filter, sort: Some(sort), range, page_info: PageInfo::default() }
    }

    /// Attaches cursors from a prior page.
    #[must_use]
    pub fn with_page_info(mut self, page_info: PageInfo) -> Self {
        self.page_info = page_info;
        self
    }

    /// Parses a query from the HTTP layer's opaque JSON strings.
    ///
    /// `filter` must be a JSON object of operator-suffixed keys, `sort` a
    /// JSON object `{"field": ..., "order": "ASC"|"DESC"}`, `range` a JSON
    /// array `[start, end]`, and `page_info` a JSON object (or an empty
    /// string for no cursors).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidParameters`] on any malformed part.
    pub fn from_json_parts(
        filter: &str,
        sort: &str,
        range: &str,
        page_info: &str,
    ) -> StoreResult<Self> {
        let filter = Filter::from_json(filter)?;
        let sort: Sort = serde_json::from_str(sort)
            .map_err(|e| StoreError::invalid_parameters(format!("malformed sort: {e}")))?;
        let range: [i64; 2] = serde_json::from_str(range)
            .map_err(|e| StoreError::invalid_parameters(format!("malformed range: {e}")))?;
        let page_info: PageInfo = if page_info.trim().is_empty() {
            PageInfo::default()
        } else {
            serde_json::from_str(page_info)
                .map_err(|e| StoreError::invalid_parameters(format!("malformed pageInfo: {e}")))?
        };
        let query = Self { filter, sort: Some(sort), range, page_info };
        query.validate()?;
        Ok(query)
    }

    /// Validates sort and range bounds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidParameters`] when the sort field is empty
    /// or missing, `start` is negative, or `end < start`.
    pub fn validate(&self) -> StoreResult<()> {
        match &self.sort {
            Some(sort) if !sort.field.is_empty() => {},
            _ => return Err(StoreError::invalid_parameters("sort field must be non-empty")),
        }
        if self.range[0] < 0 {
            return Err(StoreError::invalid_parameters(format!(
                "range start must be >= 0, got {}",
                self.range[0]
            )));
        }
        if self.range[1] < self.range[0] {
            return Err(StoreError::invalid_parameters(format!(
                "range end {} precedes range start {}",
                self.range[1], self.range[0]
            )));
        }
        Ok(())
    }

    /// The validated sort descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidParameters`] when absent or empty.
    pub fn sort(&self) -> StoreResult<&Sort> {
        self.validate()?;
        self.sort.as_ref().ok_or_else(|| StoreError::invalid_parameters("sort is required"))
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    /// Size of the full filtered set, before range clamping.
    pub total_count: u64,
    /// Clamped start of the returned window.
    pub range_start: i64,
    /// Clamped end of the returned window; `range_start - 1` when empty.
    pub range_end: i64,
    /// Records in the requested sort order.
    pub data: Vec<Record>,
}

/// Total order over JSON values used for sorting and range predicates.
///
/// Values of different types order by type rank: Null < Bool < Number <
/// String < Array < Object. Within a type, booleans, numbers and strings use
/// their natural order; arrays compare element-wise; objects compare equal
/// (they are not meaningfully orderable and never produced as sort keys by
/// well-formed callers).
#[must_use]
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NEG_INFINITY);
            let y = y.as_f64().unwrap_or(f64::NEG_INFINITY);
            x.total_cmp(&y)
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xe, ye) in x.iter().zip(y.iter()) {
                let ord = cmp_values(xe, ye);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        },
        (Value::Object(_), Value::Object(_)) => Ordering::Equal,
        _ => rank(a).cmp(&rank(b)),
    }
}
