//! [`DataStore`] adapter over the document engine.
//!
//! The document backend supports the full filter operator set, arbitrary
//! multi-field clauses, native aggregate counts, descending scans, and
//! multi-document transactions, so this adapter is the contract's reference
//! implementation: every query runs the pagination planner and executes the
//! cheapest physical scan, falling back past stale cursor anchors.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace};

use crate::{
    codec::{IdentityCodec, ValueCodec},
    document::engine::{DocumentEngine, ScanOptions},
    error::{BackendError, StoreError, StoreResult},
    options::{CreateIdOption, DataStoreOptions},
    page::{self, ScanAnchor},
    store::{candidate_ids, check_read_only_fields, merge_values, DataStore, TxnCallback},
    types::{QueryPage, RangeQuery, Record},
    validate,
};

/// Why an id claim attempt did not commit.
enum ClaimError {
    /// The candidate id is occupied; try the next one.
    Occupied,
    /// The caller's callback failed; the claim rolled back.
    Callback(StoreError),
}

/// Document-backed [`DataStore`] bound to one collection.
pub struct DocumentStore {
    engine: DocumentEngine,
    collection: String,
    options: DataStoreOptions,
    codec: Arc<dyn ValueCodec>,
}

impl DocumentStore {
    /// Creates a store over the given engine and collection with the
    /// passthrough codec.
    #[must_use]
    pub fn new(
        engine: DocumentEngine,
        collection: impl Into<String>,
        options: DataStoreOptions,
    ) -> Self {
        Self::with_codec(engine, collection, options, Arc::new(IdentityCodec))
    }

    /// Creates a store with a collection-specific codec.
    #[must_use]
    pub fn with_codec(
        engine: DocumentEngine,
        collection: impl Into<String>,
        options: DataStoreOptions,
        codec: Arc<dyn ValueCodec>,
    ) -> Self {
        Self { engine, collection: collection.into(), options, codec }
    }

    /// Decodes a stored value into an application-shaped record, running
    /// read-side validation.
    fn decode(&self, id: &str, stored: Value) -> StoreResult<Record> {
        let value = self.codec.from_store(stored)?;
        validate::validate_stored_value(&value, &self.options)?;
        Ok(Record::new(id, value))
    }
}

#[async_trait]
impl DataStore for DocumentStore {
    async fn create(&self, value: Value) -> StoreResult<Record> {
        if self.options.create_id_option != CreateIdOption::AutoGeneratedId {
            return Err(StoreError::invalid_method(
                "create requires the AutoGeneratedId policy; use create_with_id",
            ));
        }
        validate::validate_value(&value, &self.options)?;
        let stored = self.codec.to_store(value.clone())?;
        let id = self.engine.generate_id();
        self.engine
            .set(&self.collection, &id, stored)
            .await
            .map_err(|e| StoreError::create_failed_with_source("backend write failed", e))?;
        debug!(collection = %self.collection, id = %id, "record created");
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

        let mut callback = callback;
        for candidate in &candidates {
            let claim = self
                .engine
                .run_transaction(|txn| {
                    if txn.get(&self.collection, candidate).is_some() {
                        return Err(ClaimError::Occupied);
                    }
                    txn.set(&self.collection, candidate, stored.clone());
                    if let Some(cb) = callback.take() {
                        cb(&Record::new(candidate.clone(), value.clone()))
                            .map_err(ClaimError::Callback)?;
                    }
                    Ok(())
                })
                .await;
            match claim {
                Ok(()) => {
                    debug!(collection = %self.collection, id = %candidate, "record created");
                    return Ok(Record::new(candidate.clone(), value.clone()));
                },
                Err(ClaimError::Occupied) => {
                    trace!(collection = %self.collection, id = %candidate, "id occupied");
                },
                Err(ClaimError::Callback(err)) => {
                    return Err(StoreError::create_failed_with_source(
                        "creation callback failed; claim rolled back",
                        err,
                    ));
                },
            }
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
                "this collection requires transactional_update",
            ));
        }
        validate::validate_value(&value, &self.options)?;
        let stored_incoming = self.codec.to_store(value.clone())?;

        let current = self
            .engine
            .get(&self.collection, id)
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
                (previous, merge_values(current_stored, stored_incoming))
            },
        };

        self.engine
            .set(&self.collection, id, merged)
            .await
            .map_err(|e| StoreError::update_failed_with_source("backend write failed", e))?;
        debug!(collection = %self.collection, id = %id, "record updated");
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
                "this collection does not use transactions; use update",
            ));
        }
        validate::validate_value(&value, &self.options)?;
        let stored_incoming = self.codec.to_store(value.clone())?;

        let mut callback = callback;
        let previous = self
            .engine
            .run_transaction(|txn| {
                let (previous, merged) = match txn.get(&self.collection, id) {
                    None if !self.options.create_if_not_exists => {
                        return Err(StoreError::record_not_found(id));
                    },
                    None => (Record::empty(id), stored_incoming.clone()),
                    Some(current_stored) => {
                        let previous = self.decode(id, current_stored.clone())?;
                        check_read_only_fields(&previous.value, &value, &self.options)?;
                        (previous, merge_values(current_stored, stored_incoming.clone()))
                    },
                };
                txn.set(&self.collection, id, merged.clone());
                if let Some(cb) = callback.take() {
                    let updated = self.decode(id, merged)?;
                    cb(&updated)?;
                }
                Ok(previous)
            })
            .await?;
        debug!(collection = %self.collection, id = %id, "record updated transactionally");
        Ok(previous)
    }

    async fn read(&self, id: &str) -> StoreResult<Record> {
        let stored = self
            .engine
            .get(&self.collection, id)
            .await
            .map_err(|e| StoreError::read_failed_with_source("backend read failed", e))?
            .ok_or_else(|| StoreError::record_not_found(id))?;
        self.decode(id, stored)
    }

    async fn query(&self, query: RangeQuery) -> StoreResult<QueryPage> {
        let sort = query.sort()?.clone();

        let total = self
            .engine
            .count(&self.collection, &query.filter)
            .await
            .map_err(|e| StoreError::query_failed_with_source("backend count failed", e))?;

        let Some(range) = page::clamp_range(total, query.range)? else {
            return Ok(QueryPage {
                total_count: 0,
                range_start: query.range[0],
                range_end: query.range[0] - 1,
                data: Vec::new(),
            });
        };

        for plan in page::candidate_plans(total, range, &query.page_info) {
            let scan = ScanOptions {
                descending: sort.is_descending() != plan.reverse,
                start_after: match &plan.anchor {
                    ScanAnchor::AfterLast(cursor) | ScanAnchor::BeforeFirst(cursor) => {
                        Some(cursor.id.clone())
                    },
                    _ => None,
                },
                offset: plan.skip,
                limit: plan.limit,
            };
            trace!(
                collection = %self.collection,
                anchor = ?plan.anchor,
                skip = plan.skip,
                reverse = plan.reverse,
                "executing scan plan"
            );
            match self.engine.scan(&self.collection, &query.filter, &sort.field, &scan).await {
                Ok(rows) => {
                    let mut data = rows
                        .into_iter()
                        .map(|(id, stored)| self.decode(&id, stored))
                        .collect::<StoreResult<Vec<Record>>>()?;
                    if plan.reverse {
                        data.reverse();
                    }
                    return Ok(QueryPage {
                        total_count: total,
                        range_start: range.start as i64,
                        range_end: range.end as i64,
                        data,
                    });
                },
                Err(BackendError::Conflict) if plan.is_cursor_anchored() => {
                    debug!(
                        collection = %self.collection,
                        anchor = ?plan.anchor,
                        "cursor anchor vanished; falling back to next plan"
                    );
                },
                Err(e) => {
                    return Err(StoreError::query_failed_with_source("backend scan failed", e));
                },
            }
        }

        // The head plan carries no anchor and cannot conflict.
        Err(StoreError::RecordQueryFailed {
            message: "no executable scan plan".to_owned(),
            source: None,
        })
    }

    async fn delete(&self, id: &str) -> StoreResult<Record> {
        let stored = self
            .engine
            .get(&self.collection, id)
            .await
            .map_err(|e| StoreError::delete_failed_with_source("backend read failed", e))?
            .ok_or_else(|| StoreError::record_not_found(id))?;
        let previous = self.decode(id, stored)?;
        self.engine
            .delete(&self.collection, id)
            .await
            .map_err(|e| StoreError::delete_failed_with_source("backend delete failed", e))?;
        debug!(collection = %self.collection, id = %id, "record deleted");
        Ok(previous)
    }
}
