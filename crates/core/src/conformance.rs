//! Conformance test suite for [`DataStore`] implementations.
//!
//! This module provides async test functions that validate whether a
//! [`DataStore`] implementation correctly satisfies the contract. Both
//! adapters run the same suite; backend capability differences are confined
//! to the operator combinations a query may use, so every function here
//! stays inside the envelope both backends support.
//!
//! # Usage
//!
//! Enable the `testutil` feature and call each function with a fresh store
//! configured as its documentation requires:
//!
//! ```no_run
//! use duostore_core::{conformance, testutil, DataStoreOptions};
//!
//! # async fn run() {
//! let store = testutil::document_store(DataStoreOptions::default());
//! conformance::crud_create_then_read_round_trips(&store).await;
//! # }
//! ```
//!
//! # Test Categories
//!
//! | Category | Contract aspect |
//! |----------|-----------------|
//! | CRUD | create/read/delete semantics and previous-value returns |
//! | Id policy | method gating and conflict resolution per `CreateIdOption` |
//! | Update | merge semantics, upsert, read-only fields, callbacks |
//! | Validation | null policy, value shape, reserved keys, id format |
//! | Query | counting, windowing, ordering, cursors, error classification |

use serde_json::json;

use crate::{
    assert_store_error,
    error::StoreError,
    filter::Filter,
    store::DataStore,
    testutil::seed_field_values,
    types::{CursorEntry, PageInfo, RangeQuery, Record, Sort},
};

// ============================================================================
// CRUD — create/read/delete semantics
// ============================================================================

/// `create` then `read` round-trips the record. Requires `AutoGeneratedId`.
pub async fn crud_create_then_read_round_trips<S: DataStore>(store: &S) {
    let created = store.create(json!({"name": "alice"})).await.expect("create");
    assert!(!created.id.is_empty(), "generated id must be non-empty");
    let read = store.read(&created.id).await.expect("read");
    assert_eq!(read, created);
}

/// `read` on an absent id is `RecordNotFound`.
pub async fn crud_read_missing_is_not_found<S: DataStore>(store: &S) {
    assert_store_error!(store.read("ghost").await, "RECORD_NOT_FOUND");
}

/// `create_with_id` then `read` round-trips. Requires a manual id policy.
pub async fn crud_create_with_id_then_read<S: DataStore>(store: &S) {
    let created = store.create_with_id("r1", json!({"n": 1}), None).await.expect("create");
    assert_eq!(created.id, "r1");
    assert_eq!(store.read("r1").await.expect("read"), created);
}

/// `delete` returns the pre-deletion snapshot and removes the record.
/// Requires a manual id policy.
pub async fn crud_delete_returns_previous_and_removes<S: DataStore>(store: &S) {
    store.create_with_id("r1", json!({"n": 1}), None).await.expect("create");
    let previous = store.delete("r1").await.expect("delete");
    assert_eq!(previous.value, json!({"n": 1}));
    assert_store_error!(store.read("r1").await, "RECORD_NOT_FOUND");
}

/// `delete` on an absent id is `RecordNotFound`, not a silent no-op.
pub async fn crud_delete_missing_is_not_found<S: DataStore>(store: &S) {
    assert_store_error!(store.delete("ghost").await, "RECORD_NOT_FOUND");
}

// ============================================================================
// Id policy — method gating and conflict resolution
// ============================================================================

/// `create_with_id` under `AutoGeneratedId` is `InvalidMethod`.
pub async fn idpolicy_auto_rejects_manual_create<S: DataStore>(store: &S) {
    assert_store_error!(
        store.create_with_id("r1", json!({"n": 1}), None).await,
        "INVALID_METHOD"
    );
}

/// `create` under a manual policy is `InvalidMethod`.
pub async fn idpolicy_manual_rejects_auto_create<S: DataStore>(store: &S) {
    assert_store_error!(store.create(json!({"n": 1})).await, "INVALID_METHOD");
}

/// Under `ManualRejectIdConflicts`, the second claim of an id fails without
/// touching the existing record.
pub async fn idpolicy_reject_conflicts_fails_fast<S: DataStore>(store: &S) {
    store.create_with_id("r1", json!({"n": 1}), None).await.expect("first create");
    assert_store_error!(
        store.create_with_id("r1", json!({"n": 2}), None).await,
        "RECORD_CREATE_FAILED"
    );
    assert_eq!(store.read("r1").await.expect("read").value, json!({"n": 1}));
}

/// Under `ManualAllowIdConflicts`, occupied slots fall through to suffixed
/// ids `base-2`, `base-3`, ...
pub async fn idpolicy_allow_conflicts_suffixes<S: DataStore>(store: &S) {
    let first = store.create_with_id("base", json!({"n": 1}), None).await.expect("first");
    assert_eq!(first.id, "base");
    let second = store.create_with_id("base", json!({"n": 2}), None).await.expect("second");
    assert_eq!(second.id, "base-2");
    let third = store.create_with_id("base", json!({"n": 3}), None).await.expect("third");
    assert_eq!(third.id, "base-3");
}

/// Under `ManualAllowIdConflicts`, once `base` and every suffix slot
/// `base-2`..`base-100` are taken, the 101st claim fails with
/// `RecordCreateFailed`.
pub async fn idpolicy_suffix_exhaustion_fails<S: DataStore>(store: &S) {
    for n in 0..100 {
        let created =
            store.create_with_id("base", json!({"n": n}), None).await.expect("claim a slot");
        if n == 99 {
            assert_eq!(created.id, "base-100");
        }
    }
    assert_store_error!(
        store.create_with_id("base", json!({"n": 100}), None).await,
        "RECORD_CREATE_FAILED"
    );
}

/// Malformed ids fail with `InvalidParameters` before any backend call.
pub async fn idpolicy_invalid_id_is_invalid_parameters<S: DataStore>(store: &S) {
    for bad in ["", "a/b", "dotted.name", "hash#tag", "br[ack]et"] {
        assert_store_error!(
            store.create_with_id(bad, json!({"n": 1}), None).await,
            "INVALID_PARAMETERS"
        );
    }
}

/// A failing creation callback rolls the claim back entirely.
pub async fn idpolicy_callback_failure_rolls_back_claim<S: DataStore>(store: &S) {
    let result = store
        .create_with_id(
            "r1",
            json!({"n": 1}),
            Some(Box::new(|_| Err(StoreError::invalid_data("side effect failed")))),
        )
        .await;
    assert_store_error!(result, "RECORD_CREATE_FAILED");
    assert_store_error!(store.read("r1").await, "RECORD_NOT_FOUND");
}

/// The creation callback observes the record being claimed.
pub async fn idpolicy_callback_sees_claimed_record<S: DataStore>(store: &S) {
    store
        .create_with_id(
            "r1",
            json!({"n": 1}),
            Some(Box::new(|record: &Record| {
                assert_eq!(record.id, "r1");
                assert_eq!(record.value, json!({"n": 1}));
                Ok(())
            })),
        )
        .await
        .expect("create with callback");
}

// ============================================================================
// Update — merge semantics, upsert, read-only fields, callbacks
// ============================================================================

/// `update` shallow-merges objects and returns the pre-update snapshot.
/// Requires a manual id policy with `require_transaction = false`.
pub async fn update_merges_and_returns_previous<S: DataStore>(store: &S) {
    store.create_with_id("r1", json!({"a": 1, "b": 2}), None).await.expect("create");
    let previous = store.update("r1", json!({"b": 3, "c": 4})).await.expect("update");
    assert_eq!(previous.value, json!({"a": 1, "b": 2}));
    assert_eq!(store.read("r1").await.expect("read").value, json!({"a": 1, "b": 3, "c": 4}));
}

/// `update` on an absent record is `RecordNotFound` without upsert.
pub async fn update_missing_is_not_found<S: DataStore>(store: &S) {
    assert_store_error!(store.update("ghost", json!({"n": 1})).await, "RECORD_NOT_FOUND");
}

/// With `create_if_not_exists`, `update` on an absent record creates it and
/// returns an empty-object snapshot.
pub async fn update_upserts_when_configured<S: DataStore>(store: &S) {
    let previous = store.update("fresh", json!({"n": 1})).await.expect("upsert");
    assert_eq!(previous, Record::empty("fresh"));
    assert_eq!(store.read("fresh").await.expect("read").value, json!({"n": 1}));
}

/// Changing a declared read-only field is `InvalidData`; echoing its current
/// value back is permitted. Requires `read_only_fields = ["owner"]` and a
/// manual id policy.
pub async fn update_read_only_field_is_invalid_data<S: DataStore>(store: &S) {
    store
        .create_with_id("r1", json!({"owner": "alice", "note": "x"}), None)
        .await
        .expect("create");
    assert_store_error!(store.update("r1", json!({"owner": "bob"})).await, "INVALID_DATA");
    store.update("r1", json!({"owner": "alice", "note": "y"})).await.expect("echo is fine");
}

/// `update` under `require_transaction = true` is `InvalidMethod`.
pub async fn update_rejected_under_transactional_config<S: DataStore>(store: &S) {
    assert_store_error!(store.update("r1", json!({"n": 1})).await, "INVALID_METHOD");
}

/// `transactional_update` under `require_transaction = false` is
/// `InvalidMethod`.
pub async fn transactional_update_rejected_under_plain_config<S: DataStore>(store: &S) {
    assert_store_error!(
        store.transactional_update("r1", json!({"n": 1}), None).await,
        "INVALID_METHOD"
    );
}

/// `transactional_update` merges and returns the pre-update snapshot.
/// Requires a manual id policy with `require_transaction = true` — seed via
/// `create_with_id` is unavailable here (it is gated by the id policy, not
/// the transaction policy), so this uses upsert-style seeding and requires
/// `create_if_not_exists` as well.
pub async fn transactional_update_merges<S: DataStore>(store: &S) {
    store.transactional_update("r1", json!({"a": 1, "b": 2}), None).await.expect("seed");
    let previous =
        store.transactional_update("r1", json!({"b": 3}), None).await.expect("update");
    assert_eq!(previous.value, json!({"a": 1, "b": 2}));
    assert_eq!(store.read("r1").await.expect("read").value, json!({"a": 1, "b": 3}));
}

/// A failing update callback rolls the change back and surfaces its own
/// error code, identically on both backends. Same configuration as
/// [`transactional_update_merges`].
pub async fn transactional_callback_failure_rolls_back<S: DataStore>(store: &S) {
    store.transactional_update("r1", json!({"n": 1}), None).await.expect("seed");
    let result = store
        .transactional_update(
            "r1",
            json!({"n": 2}),
            Some(Box::new(|_| Err(StoreError::invalid_data("nope")))),
        )
        .await;
    assert_store_error!(result, "INVALID_DATA");
    assert_eq!(store.read("r1").await.expect("read").value, json!({"n": 1}));
}

// ============================================================================
// Validation — null policy, value shape, reserved keys
// ============================================================================

/// A null payload is `InvalidData` by default. Requires `AutoGeneratedId`.
pub async fn validation_null_rejected_by_default<S: DataStore>(store: &S) {
    assert_store_error!(store.create(json!(null)).await, "INVALID_DATA");
}

/// A payload containing the reserved `id` key is `InvalidData`.
pub async fn validation_reserved_id_key_rejected<S: DataStore>(store: &S) {
    assert_store_error!(store.create(json!({"id": "x", "n": 1})).await, "INVALID_DATA");
}

/// A payload violating the declared object shape is `InvalidData`.
pub async fn validation_shape_mismatch_rejected<S: DataStore>(store: &S) {
    assert_store_error!(store.create(json!([1, 2, 3])).await, "INVALID_DATA");
}

// ============================================================================
// Query — counting, windowing, ordering, cursors
// ============================================================================

fn ascending(range: [i64; 2]) -> RangeQuery {
    RangeQuery::new(Filter::default(), Sort::ascending("field"), range)
}

/// The canonical windowing scenario: field values `[3, 1, 4, 1, 5]`,
/// ascending, range `[1, 3]` yields values `[1, 3, 4]` with a total of 5.
/// Requires a manual id policy.
pub async fn query_counts_and_windows<S: DataStore>(store: &S) {
    seed_field_values(store, &[3, 1, 4, 1, 5]).await;
    let page = store.query(ascending([1, 3])).await.expect("query");
    assert_eq!(page.total_count, 5);
    assert_eq!(page.range_start, 1);
    assert_eq!(page.range_end, 3);
    let values: Vec<i64> =
        page.data.iter().map(|r| r.value["field"].as_i64().expect("field")).collect();
    assert_eq!(values, vec![1, 3, 4]);
}

/// Descending output is the exact reverse of ascending output.
pub async fn query_descending_reverses_ascending<S: DataStore>(store: &S) {
    seed_field_values(store, &[3, 1, 4, 1, 5]).await;
    let asc = store.query(ascending([0, 4])).await.expect("ascending");
    let desc = store
        .query(RangeQuery::new(Filter::default(), Sort::descending("field"), [0, 4]))
        .await
        .expect("descending");
    let mut reversed = asc.data.clone();
    reversed.reverse();
    assert_eq!(desc.data, reversed);
    assert_eq!(desc.total_count, asc.total_count);
}

/// A full-range query equals the concatenation of its sub-windows.
pub async fn query_windows_concatenate<S: DataStore>(store: &S) {
    seed_field_values(store, &[9, 2, 7, 2, 5, 1, 8, 3]).await;
    let full = store.query(ascending([0, 7])).await.expect("full");
    let mut stitched = Vec::new();
    for range in [[0, 2], [3, 5], [6, 7]] {
        stitched.extend(store.query(ascending(range)).await.expect("window").data);
    }
    assert_eq!(stitched, full.data);
}

/// An equality filter on the sort field (the one filter both backends can
/// express) narrows the count and the window.
pub async fn query_equality_filter_on_sort_field<S: DataStore>(store: &S) {
    seed_field_values(store, &[3, 1, 4, 1, 5]).await;
    let filter = Filter::from_json(r#"{"field": 1}"#).expect("filter");
    let page = store
        .query(RangeQuery::new(filter, Sort::ascending("field"), [0, 9]))
        .await
        .expect("query");
    assert_eq!(page.total_count, 2);
    assert!(page.data.iter().all(|r| r.value["field"] == json!(1)));
}

/// A range filter (`_gte`) on the sort field narrows the result on both
/// backends.
pub async fn query_range_filter_on_sort_field<S: DataStore>(store: &S) {
    seed_field_values(store, &[3, 1, 4, 1, 5]).await;
    let filter = Filter::from_json(r#"{"field_gte": 3}"#).expect("filter");
    let page = store
        .query(RangeQuery::new(filter, Sort::ascending("field"), [0, 9]))
        .await
        .expect("query");
    assert_eq!(page.total_count, 3);
    let values: Vec<i64> =
        page.data.iter().map(|r| r.value["field"].as_i64().expect("field")).collect();
    assert_eq!(values, vec![3, 4, 5]);
}

/// Cursors from the previous page never change the result, only the cost.
pub async fn query_cursor_continuation_is_consistent<S: DataStore>(store: &S) {
    seed_field_values(store, &[9, 2, 7, 2, 5, 1, 8, 3]).await;
    let first = store.query(ascending([0, 2])).await.expect("first page");

    let page_info = PageInfo {
        first_visible: Some(CursorEntry { position: 0, id: first.data[0].id.clone() }),
        last_visible: Some(CursorEntry { position: 2, id: first.data[2].id.clone() }),
    };
    let with_cursor =
        store.query(ascending([3, 5]).with_page_info(page_info)).await.expect("cursor page");
    let without_cursor = store.query(ascending([3, 5])).await.expect("plain page");
    assert_eq!(with_cursor, without_cursor);
}

/// A stale cursor (its record was deleted) is discarded, not trusted: the
/// next page is still correct against the current data.
pub async fn query_stale_cursor_is_discarded<S: DataStore>(store: &S) {
    seed_field_values(store, &[9, 2, 7, 2, 5, 1, 8, 3]).await;
    let first = store.query(ascending([0, 2])).await.expect("first page");
    let anchor_id = first.data[2].id.clone();

    let page_info = PageInfo {
        first_visible: Some(CursorEntry { position: 0, id: first.data[0].id.clone() }),
        last_visible: Some(CursorEntry { position: 2, id: anchor_id.clone() }),
    };
    store.delete(&anchor_id).await.expect("delete anchor");

    let stale = store
        .query(ascending([3, 5]).with_page_info(page_info))
        .await
        .expect("stale cursor page");
    let fresh = store.query(ascending([3, 5])).await.expect("fresh page");
    assert_eq!(stale, fresh);
    assert_eq!(stale.total_count, 7);
}

/// Ranges beyond the data clamp onto the final record.
pub async fn query_range_clamps_to_total<S: DataStore>(store: &S) {
    seed_field_values(store, &[1, 2, 3]).await;
    let page = store.query(ascending([10, 20])).await.expect("query");
    assert_eq!(page.total_count, 3);
    assert_eq!(page.range_start, 2);
    assert_eq!(page.range_end, 2);
    assert_eq!(page.data.len(), 1);
}

/// An empty filtered set echoes the degenerate range
/// `[range_start, range_start - 1]`.
pub async fn query_empty_set_echoes_degenerate_range<S: DataStore>(store: &S) {
    let page = store.query(ascending([10, 20])).await.expect("query");
    assert_eq!(page.total_count, 0);
    assert_eq!(page.range_start, 10);
    assert_eq!(page.range_end, 9);
    assert!(page.data.is_empty());
}

/// Cursor positions are caller input: an absurd `u64::MAX` position must
/// neither panic nor change the result.
pub async fn query_hostile_cursor_positions_are_tolerated<S: DataStore>(store: &S) {
    seed_field_values(store, &[3, 1, 4, 1, 5]).await;
    let page_info = PageInfo {
        first_visible: Some(CursorEntry { position: u64::MAX, id: "ghost".into() }),
        last_visible: Some(CursorEntry { position: u64::MAX, id: "ghost".into() }),
    };
    let hostile = store
        .query(ascending([1, 3]).with_page_info(page_info))
        .await
        .expect("hostile cursors must be tolerated");
    let plain = store.query(ascending([1, 3])).await.expect("plain query");
    assert_eq!(hostile, plain);
}

/// Malformed ranges and missing sorts are `InvalidParameters`.
pub async fn query_malformed_inputs_are_invalid_parameters<S: DataStore>(store: &S) {
    assert_store_error!(store.query(ascending([-1, 3])).await, "INVALID_PARAMETERS");
    assert_store_error!(store.query(ascending([5, 2])).await, "INVALID_PARAMETERS");

    let no_sort = RangeQuery { sort: None, ..Default::default() };
    assert_store_error!(store.query(no_sort).await, "INVALID_PARAMETERS");

    let empty_field =
        RangeQuery::new(Filter::default(), Sort::ascending(""), [0, 9]);
    assert_store_error!(store.query(empty_field).await, "INVALID_PARAMETERS");
}
