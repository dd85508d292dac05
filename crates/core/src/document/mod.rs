//! Document-store backend: a flat, transactional engine and its
//! [`DataStore`](crate::DataStore) adapter.

mod engine;
mod store;

pub use engine::{DocumentEngine, DocumentTxn, ScanOptions};
pub use store::DocumentStore;
