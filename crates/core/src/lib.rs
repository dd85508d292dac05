//! Polymorphic persistence layer over two storage engines.
//!
//! This crate provides the [`DataStore`] trait — a single CRUD-plus-query
//! contract — and two adapters implementing it over engines with very
//! different native capabilities: a flat, transactional document engine and a
//! hierarchical, path-addressed tree engine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Caller Layer                           │
//! │        (repositories, API handlers, advisory locks)         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                       DataStore trait                       │
//! │   create / create_with_id / update / transactional_update   │
//! │              read / query / delete                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │   validation │ codec transform │ pagination planning        │
//! ├──────────────────────┬──────────────────────────────────────┤
//! │    DocumentStore     │             TreeStore                │
//! │  multi-field filters │   single-clause filters only         │
//! │  native counts/scans │   materialize, count, window         │
//! │  atomic transactions │   single-key CAS with retries        │
//! ├──────────────────────┼──────────────────────────────────────┤
//! │    DocumentEngine    │             TreeEngine               │
//! └──────────────────────┴──────────────────────────────────────┘
//! ```
//!
//! Callers hold a `dyn DataStore` (or a generic) and never learn which engine
//! is underneath; capability gaps surface as `InvalidParameters` at query
//! time, never as silently different results.
//!
//! # Quick Start
//!
//! ```
//! use duostore_core::{DataStore, DataStoreOptions, DocumentEngine, DocumentStore};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = DocumentEngine::new();
//!     let store = DocumentStore::new(engine, "users", DataStoreOptions::default());
//!
//!     let created = store.create(json!({"name": "Alice"})).await?;
//!     let read = store.read(&created.id).await?;
//!     assert_eq!(read.value["name"], "Alice");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! All operations return [`StoreResult<T>`], which wraps the [`StoreError`]
//! taxonomy. Adapters map their engine's internal failures to these
//! standardized variants at the boundary; callers branch on the stable
//! [`code`](StoreError::code) rather than matching variants.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (store factories, seeding
//!   helpers, assertion macros) and the `conformance` suite of contract tests
//!   that any [`DataStore`] implementation can run. Enable this in
//!   `[dev-dependencies]` for integration tests.

#![deny(unsafe_code)]

pub mod codec;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod conformance;
pub mod document;
pub mod error;
pub mod filter;
pub mod options;
pub mod page;
pub mod retry;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod tree;
pub mod types;
pub mod validate;

// Re-export primary types at crate root for convenience
pub use codec::{IdentityCodec, KeyedListCodec, TimestampFieldCodec, ValueCodec};
pub use document::{DocumentEngine, DocumentStore};
pub use error::{BackendError, BoxError, StoreError, StoreResult};
pub use filter::{Filter, FilterClause, FilterOp};
pub use options::{CreateIdOption, DataStoreOptions, ValueShape};
pub use retry::RetryConfig;
pub use store::{DataStore, TxnCallback};
pub use tree::{TreeEngine, TreePath, TreeStore};
pub use types::{
    CursorEntry, PageInfo, QueryPage, RangeQuery, Record, Sort, SortDirection,
};
