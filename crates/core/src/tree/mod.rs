//! Tree-store backend: a hierarchical, path-addressed engine and its
//! [`DataStore`](crate::DataStore) adapter.

mod engine;
mod store;

pub use engine::{ChildLimit, ChildQuery, TreeEngine, TreePath, TxnError};
pub use store::TreeStore;
