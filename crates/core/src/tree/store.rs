//! [`DataStore`] adapter over the tree engine.
//!
//! The tree backend cannot express most of the query surface natively: it has
//! no inequality, set-membership or substring operators, no descending scans,
//! and no aggregate counts. This adapter therefore accepts at most a single
//! range/equality clause on the sort field, materializes the full filtered
//! child set, counts and windows it in memory, and reverses once for
//! descending sorts. Everything outside that envelope fails fast with
//! `InvalidParameters` rather than silently scanning the world.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace};

use crate::{
    codec::{IdentityCodec, ValueCodec},
    error::{BackendError, StoreError, StoreResult},
    filter::{FilterClause, FilterOp},
    options::{CreateIdOption, DataStoreOptions},
    page,
    retry::RetryConfig,
    store::{candidate_ids, check_read_only_fields, merge_tree_values, DataStore, TxnCallback},
    tree::engine::{ChildQuery, TreeEngine, TreePath, TxnError},
    types::{cmp_values, QueryPage, RangeQuery, Record},
    validate,
};

/// Tree-backed [`DataStore`] bound to one parent path.
pub struct TreeStore {
    engine: TreeEngine,
    path: TreePath,
    options: DataStoreOptions,
    codec: Arc<dyn ValueCodec>,
    retry: RetryConfig,
}

impl TreeStore {
    /// Creates a store over the given engine and parent path with the
    /// passthrough codec.
    #[must_use]
    pub fn new(engine: TreeEngine, path: TreePath, options: DataStoreOptions) -> Self {
        Self::with_codec(engine, path, options, Arc::new(IdentityCodec))
    }

    /// Creates a store with a path-specific codec.
    #[must_use]
    pub fn with_codec(
        engine: TreeEngine,
        path: TreePath,
        options: DataStoreOptions,
        codec: Arc<dyn ValueCodec>,
    ) -> Self {
        Self { engine, path, options, codec, retry: RetryConfig::default() }
    }

    /// Overrides the conflict-retry policy for transactional updates.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn decode(&self, id: &str, stored: Value) -> StoreResult<Record> {
        let value = self.codec.from_store(stored)?;
        validate::validate_stored_value(&value, &self.options)?;
        Ok(Record::new(id, value))
    }

    /// Claims a child key if currently absent. `Ok(false)` means occupied.
    async fn try_claim(&self, id: &str, stored: &Value) -> StoreResult<bool> {
        match self.engine.compare_and_swap(&self.path.child(id), None, Some(stored.clone())).await
        {
            Ok(()) => Ok(true),
            Err(BackendError::Conflict) => Ok(false),
            Err(e) => Err(StoreError::create_failed_with_source("backend write failed", e)),
        }
    }

    /// Runs the creation callback for a freshly claimed key, deleting the
    /// claim again if the callback fails.
    async fn run_create_callback(
        &self,
        record: &Record,
        callback: Option<TxnCallback>,
    ) -> StoreResult<()> {
        let Some(cb) = callback else { return Ok(()) };
        if let Err(err) = cb(record) {
            self.engine
                .remove(&self.path.child(&record.id))
                .await
                .map_err(|e| StoreError::create_failed_with_source("claim rollback failed", e))?;
            return Err(StoreError::create_failed_with_source(
                "creation callback failed; claim rolled back",
                err,
            ));
        }
        Ok(())
    }

    /// Translates the single permitted filter clause into native inclusive
    /// bounds, plus a strict post-filter for `Lt`/`Gt`.
    fn native_bounds(
        clause: Option<&FilterClause>,
        order_by: &str,
    ) -> (ChildQuery, Option<FilterClause>) {
        let mut native = ChildQuery { order_by: order_by.to_owned(), ..Default::default() };
        let Some(clause) = clause else { return (native, None) };
        let strict = match clause.op {
            FilterOp::Eq => {
                native.equal_to = Some(clause.value.clone());
                None
            },
            FilterOp::Lte => {
                native.end_at = Some(clause.value.clone());
                None
            },
            FilterOp::Gte => {
                native.start_at = Some(clause.value.clone());
                None
            },
            // The engine only has inclusive bounds; trim the boundary value
            // after materialization.
            FilterOp::Lt => {
                native.end_at = Some(clause.value.clone());
                Some(clause.clone())
            },
            FilterOp::Gt => {
                native.start_at = Some(clause.value.clone());
                Some(clause.clone())
            },
            // Unreachable past the capability check.
            _ => Some(clause.clone()),
        };
        (native, strict)
    }
}

#[async_trait]
impl DataStore for TreeStore {
    async fn create(&self, value: Value) -> StoreResult<Record> {
        if self.options.create_id_option != CreateIdOption::AutoGeneratedId {
            return Err(StoreError::invalid_method(
                "create requires the AutoGeneratedId policy; use create_with_id",
            ));
        }
        validate::validate_value(&value, &self.options)?;
        let stored = self.codec.to_store(value.clone())?;
        let id = self.engine.generate_key();
        if !self.try_claim(&id, &stored).await? {
            // Generated keys are unique; a collision means clock trouble.
            return Err(StoreError::create_failed(format!(
                "generated key '{id}' collided"
            )));
        }
        debug!(path = %self.path, id = %id, "record created");
        Ok(Record::new(id, value))
    }

    async fn create_with_id(
        &self,
        id: &str,
        value: Value,
        callback: Option<TxnCallback>,
    ) -> StoreResult<Record> {
        if self.options.create_id_option == CreateIdOption::AutoGeneratedId {
            return Err(StoreError::invalid_method(
                "create_with_id is disallowed under the AutoGeneratedId policy",
            ));
        }
        validate::validate_id(id)?;
        validate::validate_value(&value, &self.options)?;
        let stored = self.codec.to_store(value.clone())?;

        let candidates: Vec<String> = match self.options.create_id_option {
            CreateIdOption::ManualRejectIdConflicts => vec![id.to_owned()],
            _ => candidate_ids(id).collect(),
        };

        for candidate in &candidates {
            if self.try_claim(candidate, &stored).await? {
                let record = Record::new(candidate.clone(), value.clone());
                self.run_create_callback(&record, callback).await?;
                debug!(path = %self.path, id = %candidate, "record created");
                return Ok(record);
            }
            trace!(path = %self.path, id = %candidate, "id occupied");
        }

        Err(StoreError::create_failed(
            if self.options.create_id_option == CreateIdOption::ManualRejectIdConflicts {
                format!("record '{id}' already exists")
            } else {
                format!("exhausted {} id attempts for '{id}'", candidates.len())
            },
        ))
    }

    async fn update(&self, id: &str, value: Value) -> StoreResult<Record> {
        if self.options.require_transaction {
            return Err(StoreError::invalid_method(
                "this path requires transactional_update",
            ));
        }
        validate::validate_value(&value, &self.options)?;
        let stored_incoming = self.codec.to_store(value.clone())?;
        let child = self.path.child(id);

        let current = self
            .engine
            .get(&child)
            .await
            .map_err(|e| StoreError::update_failed_with_source("backend read failed", e))?;

        let (previous, merged) = match current {
            None if !self.options.create_if_not_exists => {
                return Err(StoreError::record_not_found(id));
            },
            None => (Record::empty(id), stored_incoming),
            Some(current_stored) => {
                let previous = self.decode(id, current_stored.clone())?;
                check_read_only_fields(&previous.value, &value, &self.options)?;
                (previous, merge_tree_values(current_stored, stored_incoming)?)
            },
        };

        self.engine
            .set(&child, merged)
            .await
            .map_err(|e| StoreError::update_failed_with_source("backend write failed", e))?;
        debug!(path = %self.path, id = %id, "record updated");
        Ok(previous)
    }

    async fn transactional_update(
        &self,
        id: &str,
        value: Value,
        callback: Option<TxnCallback>,
    ) -> StoreResult<Record> {
        if !self.options.require_transaction {
            return Err(StoreError::invalid_method(
                "this path does not use transactions; use update",
            ));
        }
        validate::validate_value(&value, &self.options)?;
        let stored_incoming = self.codec.to_store(value.clone())?;
        let child = self.path.child(id);

        let (previous, previous_stored, merged) = self
            .engine
            .run_transaction(&child, &self.retry, |current| {
                let (previous, merged) = match current.clone() {
                    None if !self.options.create_if_not_exists => {
                        return Err(StoreError::record_not_found(id));
                    },
                    None => (Record::empty(id), stored_incoming.clone()),
                    Some(current_stored) => {
                        let previous = self.decode(id, current_stored.clone())?;
                        check_read_only_fields(&previous.value, &value, &self.options)?;
                        (previous, merge_tree_values(current_stored, stored_incoming.clone())?)
                    },
                };
                Ok((Some(merged.clone()), (previous, current, merged)))
            })
            .await
            .map_err(|e| match e {
                TxnError::Aborted(err) => err,
                TxnError::Backend(BackendError::Conflict) => {
                    StoreError::update_failed("conflict retries exhausted")
                },
                TxnError::Backend(err) => {
                    StoreError::update_failed_with_source("backend transaction failed", err)
                },
            })?;

        if let Some(cb) = callback {
            let updated = self.decode(id, merged)?;
            if let Err(err) = cb(&updated) {
                // Put the previous value back before surfacing the failure.
                let restore = match previous_stored {
                    Some(stored) => self.engine.set(&child, stored).await,
                    None => self.engine.remove(&child).await,
                };
                restore.map_err(|e| {
                    StoreError::update_failed_with_source("update rollback failed", e)
                })?;
                // The callback's own error propagates unwrapped, exactly as
                // it does when the callback runs inside a real transaction.
                return Err(err);
            }
        }
        debug!(path = %self.path, id = %id, "record updated transactionally");
        Ok(previous)
    }

    async fn read(&self, id: &str) -> StoreResult<Record> {
        let stored = self
            .engine
            .get(&self.path.child(id))
            .await
            .map_err(|e| StoreError::read_failed_with_source("backend read failed", e))?
            .ok_or_else(|| StoreError::record_not_found(id))?;
        self.decode(id, stored)
    }

    async fn query(&self, query: RangeQuery) -> StoreResult<QueryPage> {
        let sort = query.sort()?.clone();

        let clause = match query.filter.clauses.as_slice() {
            [] => None,
            [clause] if clause.field != sort.field => {
                return Err(StoreError::invalid_parameters(format!(
                    "tree queries can only filter on the sort field '{}', got '{}'",
                    sort.field, clause.field
                )));
            },
            [clause] if !clause.op.is_range_or_equality() => {
                return Err(StoreError::invalid_parameters(
                    "tree queries support only equality and range operators",
                ));
            },
            [clause] => Some(clause),
            _ => {
                return Err(StoreError::invalid_parameters(
                    "tree queries support at most one filter clause",
                ));
            },
        };

        let (native, strict) = Self::native_bounds(clause, &sort.field);
        trace!(path = %self.path, order_by = %sort.field, "materializing child query");
        let mut rows = self
            .engine
            .query_children(&self.path, &native)
            .await
            .map_err(|e| StoreError::query_failed_with_source("backend query failed", e))?;

        // Inclusive native bounds over-fetch for strict operators.
        if let Some(strict) = strict {
            rows.retain(|(_, v)| {
                let field = v.get(&strict.field).unwrap_or(&Value::Null);
                match strict.op {
                    FilterOp::Lt => cmp_values(field, &strict.value).is_lt(),
                    FilterOp::Gt => cmp_values(field, &strict.value).is_gt(),
                    _ => true,
                }
            });
        }

        let total = rows.len() as u64;
        let Some(range) = page::clamp_range(total, query.range)? else {
            return Ok(QueryPage {
                total_count: 0,
                range_start: query.range[0],
                range_end: query.range[0] - 1,
                data: Vec::new(),
            });
        };

        // One reversal, before windowing, so positions are absolute in the
        // requested output order.
        if sort.is_descending() {
            rows.reverse();
        }

        let data = rows
            .into_iter()
            .skip(range.start as usize)
            .take(range.window() as usize)
            .map(|(id, stored)| self.decode(&id, stored))
            .collect::<StoreResult<Vec<Record>>>()?;

        Ok(QueryPage {
            total_count: total,
            range_start: range.start as i64,
            range_end: range.end as i64,
            data,
        })
    }

    async fn delete(&self, id: &str) -> StoreResult<Record> {
        let child = self.path.child(id);
        let stored = self
            .engine
            .get(&child)
            .await
            .map_err(|e| StoreError::delete_failed_with_source("backend read failed", e))?
            .ok_or_else(|| StoreError::record_not_found(id))?;
        let previous = self.decode(id, stored)?;
        self.engine
            .remove(&child)
            .await
            .map_err(|e| StoreError::delete_failed_with_source("backend delete failed", e))?;
        debug!(path = %self.path, id = %id, "record deleted");
        Ok(previous)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use crate::{filter::Filter, types::Sort};

    use super::*;

    fn store(options: DataStoreOptions) -> TreeStore {
        let path = TreePath::parse("/app/things").unwrap();
        TreeStore::new(TreeEngine::new(), path, options)
    }

    fn manual() -> DataStoreOptions {
        DataStoreOptions::builder()
            .create_id_option(CreateIdOption::ManualRejectIdConflicts)
            .build()
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let store = store(DataStoreOptions::default());
        let created = store.create(json!({"name": "alice"})).await.unwrap();
        assert_eq!(store.read(&created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn create_with_id_rejects_duplicates() {
        let store = store(manual());
        store.create_with_id("r", json!({"n": 1}), None).await.unwrap();
        let err = store.create_with_id("r", json!({"n": 2}), None).await.unwrap_err();
        assert_eq!(err.code(), "RECORD_CREATE_FAILED");
    }

    #[tokio::test]
    async fn suffix_retry_claims_next_free_slot() {
        let store = store(
            DataStoreOptions::builder()
                .create_id_option(CreateIdOption::ManualAllowIdConflicts)
                .build(),
        );
        store.create_with_id("base", json!({"n": 1}), None).await.unwrap();
        let second = store.create_with_id("base", json!({"n": 2}), None).await.unwrap();
        assert_eq!(second.id, "base-2");
    }

    #[tokio::test]
    async fn callback_error_rolls_back_the_claim() {
        let store = store(manual());
        let err = store
            .create_with_id(
                "claimed",
                json!({"a": 1}),
                Some(Box::new(|_| Err(StoreError::invalid_data("side effect failed")))),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RECORD_CREATE_FAILED");
        assert_eq!(store.read("claimed").await.unwrap_err().code(), "RECORD_NOT_FOUND");
    }

    #[tokio::test]
    async fn update_merges_objects_and_returns_previous() {
        let store = store(manual());
        store.create_with_id("r", json!({"a": 1, "b": 2}), None).await.unwrap();

        let previous = store.update("r", json!({"b": 3, "c": 4})).await.unwrap();
        assert_eq!(previous.value, json!({"a": 1, "b": 2}));
        assert_eq!(store.read("r").await.unwrap().value, json!({"a": 1, "b": 3, "c": 4}));
    }

    #[tokio::test]
    async fn transactional_update_surfaces_stored_shape_drift() {
        let engine = TreeEngine::new();
        let path = TreePath::parse("/app/things").unwrap();
        engine.set(&path.child("r"), json!({"a": 1})).await.unwrap();
        let store = TreeStore::new(
            engine,
            path,
            DataStoreOptions::builder()
                .require_transaction(true)
                .value_shape(crate::options::ValueShape::Scalar)
                .build(),
        );

        let err = store.transactional_update("r", json!(7), None).await.unwrap_err();
        assert_eq!(err.code(), "DATABASE_CONSISTENCY");
    }

    #[tokio::test]
    async fn transactional_callback_failure_restores_previous_value() {
        let engine = TreeEngine::new();
        let path = TreePath::parse("/app/things").unwrap();
        engine.set(&path.child("r"), json!({"n": 1})).await.unwrap();
        let store = TreeStore::new(
            engine,
            path,
            DataStoreOptions::builder().require_transaction(true).build(),
        );

        let err = store
            .transactional_update(
                "r",
                json!({"n": 2}),
                Some(Box::new(|_| Err(StoreError::invalid_data("nope")))),
            )
            .await
            .unwrap_err();
        // The callback's error surfaces unwrapped, same as the document
        // adapter, so callers can branch on one code across backends.
        assert_eq!(err.code(), "INVALID_DATA");
        assert_eq!(store.read("r").await.unwrap().value, json!({"n": 1}));
    }

    #[tokio::test]
    async fn query_rejects_unsupported_filters() {
        let store = store(manual());
        let sort = Sort::ascending("age");

        // Clause on a non-sort field.
        let filter = Filter::from_json(r#"{"name": "alice"}"#).unwrap();
        let err = store.query(RangeQuery::new(filter, sort.clone(), [0, 9])).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETERS");

        // Operator outside the range/equality set.
        let filter = Filter::from_json(r#"{"age_neq": 3}"#).unwrap();
        let err = store.query(RangeQuery::new(filter, sort.clone(), [0, 9])).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETERS");

        // More than one clause.
        let filter = Filter::from_json(r#"{"age_gte": 1, "age_lte": 9}"#).unwrap();
        let err = store.query(RangeQuery::new(filter, sort, [0, 9])).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETERS");
    }

    #[tokio::test]
    async fn query_windows_ascending_results() {
        let store = store(manual());
        for (id, v) in [("r1", 3), ("r2", 1), ("r3", 4), ("r4", 1), ("r5", 5)] {
            store.create_with_id(id, json!({"field": v}), None).await.unwrap();
        }

        let page = store
            .query(RangeQuery::new(Filter::default(), Sort::ascending("field"), [1, 3]))
            .await
            .unwrap();
        assert_eq!(page.total_count, 5);
        assert_eq!(page.range_start, 1);
        assert_eq!(page.range_end, 3);
        let values: Vec<i64> =
            page.data.iter().map(|r| r.value["field"].as_i64().unwrap()).collect();
        assert_eq!(values, vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn query_reverses_once_for_descending() {
        let store = store(manual());
        for i in 0..5 {
            store.create_with_id(&format!("r{i}"), json!({"n": i}), None).await.unwrap();
        }

        let page = store
            .query(RangeQuery::new(Filter::default(), Sort::descending("n"), [1, 2]))
            .await
            .unwrap();
        let ns: Vec<i64> = page.data.iter().map(|r| r.value["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![3, 2]);
    }

    #[tokio::test]
    async fn strict_bounds_trim_the_boundary() {
        let store = store(manual());
        for i in 1..=5 {
            store.create_with_id(&format!("r{i}"), json!({"n": i}), None).await.unwrap();
        }

        let filter = Filter::from_json(r#"{"n_lt": 3}"#).unwrap();
        let page = store
            .query(RangeQuery::new(filter, Sort::ascending("n"), [0, 9]))
            .await
            .unwrap();
        assert_eq!(page.total_count, 2);

        let filter = Filter::from_json(r#"{"n_gt": 3}"#).unwrap();
        let page = store
            .query(RangeQuery::new(filter, Sort::ascending("n"), [0, 9]))
            .await
            .unwrap();
        let ns: Vec<i64> = page.data.iter().map(|r| r.value["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![4, 5]);
    }

    #[tokio::test]
    async fn empty_result_echoes_degenerate_range() {
        let store = store(manual());
        let page = store
            .query(RangeQuery::new(Filter::default(), Sort::ascending("f"), [10, 20]))
            .await
            .unwrap();
        assert_eq!(page.total_count, 0);
        assert_eq!(page.range_start, 10);
        assert_eq!(page.range_end, 9);
        assert!(page.data.is_empty());
    }

    #[tokio::test]
    async fn stores_on_the_same_engine_share_the_tree() {
        let engine = TreeEngine::new();
        let path = TreePath::parse("/app/things").unwrap();
        let a = TreeStore::new(engine.clone(), path.clone(), manual());
        let b = TreeStore::new(engine, path, manual());

        a.create_with_id("r", json!({"n": 1}), None).await.unwrap();
        assert_eq!(b.read("r").await.unwrap().value, json!({"n": 1}));
    }
}
