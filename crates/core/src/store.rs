//! The `DataStore` contract and update-path helpers shared by both adapters.
//!
//! [`DataStore`] is the single CRUD-plus-query interface exposed over both
//! backing engines. Every call runs validation → codec transform → backend
//! operation → inverse codec transform, returning application-shaped
//! [`Record`]s. Mutating operations return the **pre-mutation** snapshot so
//! callers can diff-and-audit.
//!
//! # Method / policy matrix
//!
//! | Method | Allowed when |
//! |--------|--------------|
//! | [`create`](DataStore::create) | `create_id_option == AutoGeneratedId` |
//! | [`create_with_id`](DataStore::create_with_id) | a manual id policy is configured |
//! | [`update`](DataStore::update) | `require_transaction == false` |
//! | [`transactional_update`](DataStore::transactional_update) | `require_transaction == true` |
//!
//! Using the wrong variant fails with [`StoreError::InvalidMethod`].

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error::{StoreError, StoreResult},
    options::DataStoreOptions,
    types::{QueryPage, RangeQuery, Record},
};

/// Side-effect callback executed inside the transaction that claims an id or
/// applies an update. Receives the post-write record; an error rolls back the
/// entire transaction, including the record write.
pub type TxnCallback = Box<dyn FnOnce(&Record) -> StoreResult<()> + Send>;

/// The polymorphic persistence contract.
///
/// Implemented by [`DocumentStore`](crate::DocumentStore) and
/// [`TreeStore`](crate::TreeStore); one instance is bound to one collection
/// path and one immutable [`DataStoreOptions`].
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Creates a record with a backend-generated id.
    ///
    /// # Errors
    ///
    /// `InvalidMethod` under a manual id policy; `InvalidData` on validation
    /// failure; `RecordCreateFailed` on backend failure.
    async fn create(&self, value: Value) -> StoreResult<Record>;

    /// Creates a record with a caller-supplied id, resolved under the
    /// configured conflict policy. The optional callback runs inside the
    /// claiming transaction; its error rolls the claim back.
    ///
    /// # Errors
    ///
    /// `InvalidMethod` under `AutoGeneratedId`; `InvalidParameters` on a bad
    /// id; `InvalidData` on validation failure; `RecordCreateFailed` on
    /// conflict exhaustion, callback rollback, or backend failure.
    async fn create_with_id(
        &self,
        id: &str,
        value: Value,
        callback: Option<TxnCallback>,
    ) -> StoreResult<Record>;

    /// Merges `value` into the record, non-transactionally. Returns the
    /// pre-update snapshot.
    ///
    /// # Errors
    ///
    /// `InvalidMethod` when transactions are required; `RecordNotFound`
    /// unless `create_if_not_exists`; `InvalidData` on a read-only-field
    /// violation; `RecordUpdateFailed` on backend failure.
    async fn update(&self, id: &str, value: Value) -> StoreResult<Record>;

    /// Merges `value` into the record inside a backend transaction, retried
    /// transparently on conflict. Returns the pre-update snapshot. The
    /// optional callback runs inside the transaction.
    ///
    /// # Errors
    ///
    /// As [`update`](DataStore::update), plus `DatabaseConsistency` on a
    /// current/incoming type mismatch and `RecordUpdateFailed` when conflict
    /// retries are exhausted.
    async fn transactional_update(
        &self,
        id: &str,
        value: Value,
        callback: Option<TxnCallback>,
    ) -> StoreResult<Record>;

    /// Reads a record by id.
    ///
    /// # Errors
    ///
    /// `RecordNotFound`; `RecordReadFailed`; `DatabaseConsistency` when the
    /// stored value fails read-side validation.
    async fn read(&self, id: &str) -> StoreResult<Record>;

    /// Runs a filtered, sorted, range-paginated query.
    ///
    /// # Errors
    ///
    /// `InvalidParameters` on malformed filter/sort/range or a
    /// backend-unsupported operator combination; `RecordQueryFailed` on
    /// backend failure.
    async fn query(&self, query: RangeQuery) -> StoreResult<QueryPage>;

    /// Deletes a record, returning the pre-deletion snapshot.
    ///
    /// # Errors
    ///
    /// `RecordNotFound`; `RecordDeleteFailed`.
    async fn delete(&self, id: &str) -> StoreResult<Record>;
}

/// Enforces read-only-field equality between the current and incoming
/// application-shaped values.
///
/// A declared read-only field present in the incoming payload whose value
/// differs from the currently stored value (missing counts as `Null`) fails
/// with `InvalidData`. Vacuous when the record did not previously exist.
pub(crate) fn check_read_only_fields(
    current: &Value,
    incoming: &Value,
    options: &DataStoreOptions,
) -> StoreResult<()> {
    let Some(incoming_map) = incoming.as_object() else {
        return Ok(());
    };
    for field in &options.read_only_fields {
        let Some(new_value) = incoming_map.get(field) else { continue };
        let current_value = current.get(field).unwrap_or(&Value::Null);
        if new_value != current_value {
            return Err(StoreError::invalid_data(format!(
                "field '{field}' is read-only and cannot be changed"
            )));
        }
    }
    Ok(())
}

/// Document-backend merge: shallow-merges two objects (incoming fields win,
/// non-overlapping existing fields survive); any other combination is a full
/// replacement.
pub(crate) fn merge_values(current: Value, incoming: Value) -> Value {
    match (current, incoming) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                base.insert(key, value);
            }
            Value::Object(base)
        },
        (_, incoming) => incoming,
    }
}

/// Tree-backend merge: shallow-merges only when both sides are objects; both
/// scalars is a replacement; a type mismatch between current and incoming is
/// a consistency error.
pub(crate) fn merge_tree_values(current: Value, incoming: Value) -> StoreResult<Value> {
    match (current, incoming) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                base.insert(key, value);
            }
            Ok(Value::Object(base))
        },
        (current @ Value::Object(_), incoming) | (current, incoming @ Value::Object(_)) => {
            Err(StoreError::consistency(format!(
                "cannot merge {} into {}",
                type_name(&incoming),
                type_name(&current)
            )))
        },
        (_, incoming) => Ok(incoming),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Candidate ids tried under `ManualAllowIdConflicts`: the base id, then
/// `base-2` through `base-100` (100 attempts in total).
pub(crate) fn candidate_ids(base: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(base.to_owned()).chain((2..=100).map(move |n| format!("{base}-{n}")))
}
