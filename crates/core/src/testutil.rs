//! Shared test utilities for store testing.
//!
//! This module provides factories for fresh adapter instances over in-process
//! engines, seeding helpers, and an assertion macro for error codes. It is
//! feature-gated behind `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! duostore-core = { path = "../core", features = ["testutil"] }
//! ```

use serde_json::json;

use crate::{
    document::{DocumentEngine, DocumentStore},
    options::DataStoreOptions,
    store::DataStore,
    tree::{TreeEngine, TreePath, TreeStore},
};

/// Create a fresh document store over its own engine, bound to a `records`
/// collection.
#[must_use]
pub fn document_store(options: DataStoreOptions) -> DocumentStore {
    DocumentStore::new(DocumentEngine::new(), "records", options)
}

/// Create a fresh tree store over its own engine, bound to `/records`.
///
/// # Panics
///
/// Never panics; the path literal is valid.
#[must_use]
pub fn tree_store(options: DataStoreOptions) -> TreeStore {
    let path = TreePath::parse("/records").expect("valid path literal");
    TreeStore::new(TreeEngine::new(), path, options)
}

/// Seed a store with records `r1..rN` whose `field` values are taken from
/// `values`, via `create_with_id`.
///
/// The store must be configured with a manual id policy.
///
/// # Panics
///
/// Panics when any create fails.
pub async fn seed_field_values<S: DataStore>(store: &S, values: &[i64]) {
    for (i, v) in values.iter().enumerate() {
        store
            .create_with_id(&format!("r{}", i + 1), json!({ "field": v }), None)
            .await
            .expect("seed create failed");
    }
}

/// Assert that a [`StoreResult`](crate::StoreResult) is an error with the
/// given stable code.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use duostore_core::{assert_store_error, StoreError, StoreResult};
///
/// let result: StoreResult<()> = Err(StoreError::record_not_found("x"));
/// assert_store_error!(result, "RECORD_NOT_FOUND");
/// ```
#[macro_export]
macro_rules! assert_store_error {
    ($result:expr, $code:expr) => {
        match &$result {
            Err(err) => assert_eq!(
                err.code(),
                $code,
                "expected error code {}, got {:?}",
                $code,
                err,
            ),
            Ok(ok) => panic!("expected error code {}, got Ok({ok:?})", $code),
        }
    };
}
