//! In-process document engine.
//!
//! [`DocumentEngine`] is the injected backend handle for the document-store
//! side of the contract: flat collections of id-keyed documents with
//! arbitrary multi-field filtering, native aggregate counts, ordered scans
//! with offset/limit in either direction, backend-generated unique ids, and
//! closure-based multi-document transactions.
//!
//! # Cloning
//!
//! `DocumentEngine` is cheaply cloneable via [`Arc`]; all clones share the
//! same underlying collections.
//!
//! # Transactions
//!
//! [`run_transaction`](DocumentEngine::run_transaction) serializes writers:
//! the closure sees a consistent snapshot, buffers its writes in a
//! [`DocumentTxn`] with read-your-writes semantics, and either commits all of
//! them atomically or rolls back on any error.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::{error::BackendError, filter::Filter, types::cmp_values};

type Collection = BTreeMap<String, Value>;
type Collections = HashMap<String, Collection>;

/// Physical scan parameters for [`DocumentEngine::scan`].
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Scan in descending order of the sort key.
    pub descending: bool,
    /// Begin strictly after the record with this id (a cursor anchor).
    pub start_after: Option<String>,
    /// Records to skip after the anchor.
    pub offset: u64,
    /// Maximum records to return.
    pub limit: u64,
}

/// In-process document engine over [`BTreeMap`] collections.
#[derive(Debug, Clone, Default)]
pub struct DocumentEngine {
    collections: Arc<RwLock<Collections>>,
}

impl DocumentEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a unique document id.
    #[must_use]
    pub fn generate_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Reads a document by id.
    pub async fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Value>, BackendError> {
        let collections = self.collections.read();
        Ok(collections.get(collection).and_then(|c| c.get(id)).cloned())
    }

    /// Writes a document, overwriting any existing value.
    pub async fn set(
        &self,
        collection: &str,
        id: &str,
        value: Value,
    ) -> Result<(), BackendError> {
        let mut collections = self.collections.write();
        collections.entry(collection.to_owned()).or_default().insert(id.to_owned(), value);
        Ok(())
    }

    /// Removes a document. Removing an absent document is a no-op.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError> {
        let mut collections = self.collections.write();
        if let Some(c) = collections.get_mut(collection) {
            c.remove(id);
        }
        Ok(())
    }

    /// Native aggregate count of documents matching the filter.
    pub async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, BackendError> {
        let collections = self.collections.read();
        let count = collections
            .get(collection)
            .map(|c| c.values().filter(|v| filter.matches(v)).count() as u64)
            .unwrap_or(0);
        Ok(count)
    }

    /// Filtered, ordered scan with anchor/offset/limit.
    ///
    /// Documents are ordered by `order_by` under the JSON total order, with
    /// the id as tiebreak, reversed when `descending`. When `start_after` is
    /// set, the scan begins strictly after that document in scan order.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Conflict`] when `start_after` names a document
    /// no longer present in the filtered ordering (the anchor vanished
    /// between planning and execution).
    pub async fn scan(
        &self,
        collection: &str,
        filter: &Filter,
        order_by: &str,
        options: &ScanOptions,
    ) -> Result<Vec<(String, Value)>, BackendError> {
        let collections = self.collections.read();
        let mut rows: Vec<(String, Value)> = collections
            .get(collection)
            .map(|c| {
                c.iter()
                    .filter(|(_, v)| filter.matches(v))
                    .map(|(id, v)| (id.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|(a_id, a), (b_id, b)| order_key(a, a_id, b, b_id, order_by));
        if options.descending {
            rows.reverse();
        }

        let from = match &options.start_after {
            Some(anchor_id) => {
                let position = rows
                    .iter()
                    .position(|(id, _)| id == anchor_id)
                    .ok_or(BackendError::Conflict)?;
                position + 1
            },
            None => 0,
        };

        Ok(rows
            .into_iter()
            .skip(from + options.offset as usize)
            .take(options.limit as usize)
            .collect())
    }

    /// Runs a closure as an atomic multi-document transaction.
    ///
    /// Writers are serialized; the closure's buffered writes commit only when
    /// it returns `Ok`, and are discarded entirely on `Err`.
    pub async fn run_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut DocumentTxn<'_>) -> Result<T, E>,
    {
        let mut collections = self.collections.write();
        let (out, pending) = {
            let mut txn = DocumentTxn { base: &*collections, pending: BTreeMap::new() };
            let out = f(&mut txn)?;
            (out, txn.pending)
        };
        for ((collection, id), value) in pending {
            match value {
                Some(v) => {
                    collections.entry(collection).or_default().insert(id, v);
                },
                None => {
                    if let Some(c) = collections.get_mut(&collection) {
                        c.remove(&id);
                    }
                },
            }
        }
        Ok(out)
    }
}

fn order_key(a: &Value, a_id: &str, b: &Value, b_id: &str, field: &str) -> Ordering {
    let a_key = a.get(field).unwrap_or(&Value::Null);
    let b_key = b.get(field).unwrap_or(&Value::Null);
    cmp_values(a_key, b_key).then_with(|| a_id.cmp(b_id))
}

/// Buffered transaction handle with read-your-writes semantics.
pub struct DocumentTxn<'a> {
    base: &'a Collections,
    pending: BTreeMap<(String, String), Option<Value>>,
}

impl DocumentTxn<'_> {
    /// Reads a document, seeing this transaction's pending writes first.
    #[must_use]
    pub fn get(&self, collection: &str, id: &str) -> Option<Value> {
        if let Some(pending) = self.pending.get(&(collection.to_owned(), id.to_owned())) {
            return pending.clone();
        }
        self.base.get(collection).and_then(|c| c.get(id)).cloned()
    }

    /// Buffers a write.
    pub fn set(&mut self, collection: &str, id: &str, value: Value) {
        self.pending.insert((collection.to_owned(), id.to_owned()), Some(value));
    }

    /// Buffers a delete.
    pub fn delete(&mut self, collection: &str, id: &str) {
        self.pending.insert((collection.to_owned(), id.to_owned()), None);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let engine = DocumentEngine::new();
        engine.set("users", "u1", json!({"name": "alice"})).await.unwrap();
        assert_eq!(engine.get("users", "u1").await.unwrap(), Some(json!({"name": "alice"})));

        engine.delete("users", "u1").await.unwrap();
        assert_eq!(engine.get("users", "u1").await.unwrap(), None);

        // Deleting again is a no-op.
        engine.delete("users", "u1").await.unwrap();
    }

    #[tokio::test]
    async fn clones_share_collections() {
        let engine = DocumentEngine::new();
        let clone = engine.clone();
        engine.set("c", "a", json!({"n": 1})).await.unwrap();
        assert!(clone.get("c", "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn count_applies_filter() {
        let engine = DocumentEngine::new();
        for (id, age) in [("a", 20), ("b", 30), ("c", 40)] {
            engine.set("users", id, json!({"age": age})).await.unwrap();
        }
        let filter = Filter::from_json(r#"{"age_gte": 30}"#).unwrap();
        assert_eq!(engine.count("users", &filter).await.unwrap(), 2);
        assert_eq!(engine.count("empty", &filter).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn scan_orders_by_field_then_id() {
        let engine = DocumentEngine::new();
        for (id, v) in [("r1", 3), ("r2", 1), ("r3", 4), ("r4", 1), ("r5", 5)] {
            engine.set("c", id, json!({"field": v})).await.unwrap();
        }
        let rows = engine
            .scan("c", &Filter::default(), "field", &ScanOptions { limit: 10, ..Default::default() })
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r4", "r1", "r3", "r5"]);
    }

    #[tokio::test]
    async fn scan_descending_with_offset_and_limit() {
        let engine = DocumentEngine::new();
        for i in 0..10 {
            engine.set("c", &format!("r{i}"), json!({"n": i})).await.unwrap();
        }
        let rows = engine
            .scan(
                "c",
                &Filter::default(),
                "n",
                &ScanOptions { descending: true, start_after: None, offset: 2, limit: 3 },
            )
            .await
            .unwrap();
        let ns: Vec<i64> = rows.iter().map(|(_, v)| v["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![7, 6, 5]);
    }

    #[tokio::test]
    async fn scan_anchor_vanished_is_conflict() {
        let engine = DocumentEngine::new();
        engine.set("c", "a", json!({"n": 1})).await.unwrap();
        let err = engine
            .scan(
                "c",
                &Filter::default(),
                "n",
                &ScanOptions { start_after: Some("ghost".into()), limit: 5, ..Default::default() },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Conflict));
    }

    #[tokio::test]
    async fn scan_starts_after_anchor() {
        let engine = DocumentEngine::new();
        for i in 0..5 {
            engine.set("c", &format!("r{i}"), json!({"n": i})).await.unwrap();
        }
        let rows = engine
            .scan(
                "c",
                &Filter::default(),
                "n",
                &ScanOptions { start_after: Some("r1".into()), limit: 2, ..Default::default() },
            )
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r3"]);
    }

    #[tokio::test]
    async fn transaction_commits_atomically() {
        let engine = DocumentEngine::new();
        engine.set("c", "a", json!({"n": 1})).await.unwrap();

        engine
            .run_transaction::<_, BackendError, _>(|txn| {
                assert_eq!(txn.get("c", "a"), Some(json!({"n": 1})));
                txn.set("c", "a", json!({"n": 2}));
                // Read-your-writes.
                assert_eq!(txn.get("c", "a"), Some(json!({"n": 2})));
                txn.set("c", "b", json!({"n": 3}));
                txn.delete("c", "missing");
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(engine.get("c", "a").await.unwrap(), Some(json!({"n": 2})));
        assert_eq!(engine.get("c", "b").await.unwrap(), Some(json!({"n": 3})));
    }

    #[tokio::test]
    async fn transaction_error_rolls_back_all_writes() {
        let engine = DocumentEngine::new();
        let result: Result<(), BackendError> = engine
            .run_transaction(|txn| {
                txn.set("c", "a", json!({"n": 1}));
                Err(BackendError::corrupt("boom"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(engine.get("c", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn generated_ids_are_unique() {
        let engine = DocumentEngine::new();
        let a = engine.generate_id();
        let b = engine.generate_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }
}
