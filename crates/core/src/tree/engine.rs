//! In-process tree engine.
//!
//! [`TreeEngine`] is the injected backend handle for the tree-store side of
//! the contract: one JSON tree addressed by slash-separated paths. Its
//! capability surface is deliberately narrow compared to the document engine:
//!
//! - no multi-field filtering: child queries order by a single field and
//!   accept only inclusive start/end/equal bounds on it,
//! - no descending scans and no native aggregate counts,
//! - transactions cover a single path via compare-and-swap, retried with
//!   backoff on conflict rather than serialized.
//!
//! Adapters built on this engine must express everything else (strict bounds,
//! reversal, counting, windowing) in memory.

use std::{fmt, sync::Arc};

use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    error::{BackendError, StoreResult},
    retry::{compute_backoff, RetryConfig},
    types::cmp_values,
    validate,
};

/// A slash-separated path into the tree, e.g. `/app/users`.
///
/// Each segment obeys the same character rules as record ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreePath {
    segments: Vec<String>,
}

impl TreePath {
    /// The tree root.
    #[must_use]
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    /// Parses a path, validating every segment.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidParameters`] when any segment is empty,
    /// oversized, or contains a reserved character.
    ///
    /// [`StoreError::InvalidParameters`]: crate::error::StoreError::InvalidParameters
    pub fn parse(path: &str) -> StoreResult<Self> {
        let mut segments = Vec::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            validate::validate_id(segment)?;
            segments.push(segment.to_owned());
        }
        Ok(Self { segments })
    }

    /// Appends a child key. The key must already be validated.
    #[must_use]
    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(key.to_owned());
        Self { segments }
    }

    fn iter(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// How many ordered children to keep from a child query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildLimit {
    /// The first `n` children in ascending order.
    First(u64),
    /// The last `n` children in ascending order.
    Last(u64),
}

/// A native child query: single order-by field, inclusive bounds only.
#[derive(Debug, Clone, Default)]
pub struct ChildQuery {
    /// Child field to order by (and to which all bounds apply).
    pub order_by: String,
    /// Inclusive lower bound on the order-by field.
    pub start_at: Option<Value>,
    /// Inclusive upper bound on the order-by field.
    pub end_at: Option<Value>,
    /// Exact match on the order-by field.
    pub equal_to: Option<Value>,
    /// Optional head/tail truncation.
    pub limit: Option<ChildLimit>,
}

/// Why a conflict-retried transaction did not commit.
#[derive(Debug, Error)]
pub enum TxnError<E> {
    /// The engine gave up: conflict retries exhausted or corrupt state.
    #[error(transparent)]
    Backend(BackendError),
    /// The caller's closure aborted the transaction.
    #[error("transaction aborted")]
    Aborted(#[source] E),
}

// Key alphabet for generated child keys; ordered so that generated keys sort
// lexicographically by creation time.
const PUSH_CHARS: &[u8] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// In-process tree engine over a single JSON root.
#[derive(Debug, Clone)]
pub struct TreeEngine {
    root: Arc<RwLock<Value>>,
}

impl Default for TreeEngine {
    fn default() -> Self {
        Self { root: Arc::new(RwLock::new(Value::Object(Map::new()))) }
    }
}

impl TreeEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a time-ordered child key: 8 characters of millisecond
    /// timestamp followed by 12 random characters.
    #[must_use]
    pub fn generate_key(&self) -> String {
        let mut millis = Utc::now().timestamp_millis().max(0) as u64;
        let mut key = [0u8; 20];
        for slot in key[..8].iter_mut().rev() {
            *slot = PUSH_CHARS[(millis % 64) as usize];
            millis /= 64;
        }
        let mut rng = rand::thread_rng();
        for slot in &mut key[8..] {
            *slot = PUSH_CHARS[rng.gen_range(0..64)];
        }
        // The alphabet is ASCII.
        String::from_utf8_lossy(&key).into_owned()
    }

    /// Reads the value at a path. Absent paths read as `None`.
    pub async fn get(&self, path: &TreePath) -> Result<Option<Value>, BackendError> {
        let root = self.root.read();
        Ok(node_at(&root, path).cloned())
    }

    /// Writes a value at a path, creating intermediate objects as needed.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Corrupt`] when an intermediate node exists but
    /// is not an object.
    pub async fn set(&self, path: &TreePath, value: Value) -> Result<(), BackendError> {
        let mut root = self.root.write();
        write_at(&mut root, path, Some(value))
    }

    /// Removes the value at a path, pruning emptied intermediate objects.
    /// Removing an absent path is a no-op.
    pub async fn remove(&self, path: &TreePath) -> Result<(), BackendError> {
        let mut root = self.root.write();
        write_at(&mut root, path, None)
    }

    /// Atomically replaces the value at a path if it currently equals
    /// `expected`. `None` on either side means absence.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Conflict`] when the current value differs from
    /// `expected`.
    pub async fn compare_and_swap(
        &self,
        path: &TreePath,
        expected: Option<&Value>,
        new: Option<Value>,
    ) -> Result<(), BackendError> {
        let mut root = self.root.write();
        if node_at(&root, path) != expected {
            return Err(BackendError::Conflict);
        }
        write_at(&mut root, path, new)
    }

    /// Runs a single-path transaction: the closure maps the current value to
    /// a replacement (or `None` to delete) plus an output, and the swap is
    /// committed only if the path is unchanged in the meantime. Conflicts are
    /// retried with backoff per `retry`; a closure error aborts immediately.
    ///
    /// # Errors
    ///
    /// [`TxnError::Aborted`] when the closure errors;
    /// [`TxnError::Backend`] on retry exhaustion or corrupt state.
    #[tracing::instrument(skip_all, fields(path = %path))]
    pub async fn run_transaction<T, E, F>(
        &self,
        path: &TreePath,
        retry: &RetryConfig,
        mut f: F,
    ) -> Result<T, TxnError<E>>
    where
        F: FnMut(Option<Value>) -> Result<(Option<Value>, T), E>,
    {
        for attempt in 0..=retry.max_retries {
            let current = { node_at(&self.root.read(), path).cloned() };
            let (next, out) = f(current.clone()).map_err(TxnError::Aborted)?;
            match self.compare_and_swap(path, current.as_ref(), next).await {
                Ok(()) => return Ok(out),
                Err(BackendError::Conflict) if attempt < retry.max_retries => {
                    tokio::time::sleep(compute_backoff(retry, attempt)).await;
                },
                Err(e) => return Err(TxnError::Backend(e)),
            }
        }
        Err(TxnError::Backend(BackendError::Conflict))
    }

    /// Native child query: the children of `path`, ordered ascending by the
    /// `order_by` field (key as tiebreak), bounded inclusively, then
    /// truncated per the limit. Always ascending; callers needing descending
    /// output reverse in memory.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Corrupt`] when the node exists but is not an
    /// object.
    pub async fn query_children(
        &self,
        path: &TreePath,
        query: &ChildQuery,
    ) -> Result<Vec<(String, Value)>, BackendError> {
        let root = self.root.read();
        let node = match node_at(&root, path) {
            None => return Ok(Vec::new()),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(BackendError::corrupt(format!(
                    "node at '{path}' is not an object: {other}"
                )));
            },
        };

        let key_of = |v: &Value| v.get(&query.order_by).cloned().unwrap_or(Value::Null);
        let mut rows: Vec<(String, Value)> = node
            .iter()
            .filter(|(_, v)| {
                let field = key_of(v);
                if let Some(eq) = &query.equal_to {
                    return cmp_values(&field, eq).is_eq();
                }
                if let Some(start) = &query.start_at {
                    if cmp_values(&field, start).is_lt() {
                        return false;
                    }
                }
                if let Some(end) = &query.end_at {
                    if cmp_values(&field, end).is_gt() {
                        return false;
                    }
                }
                true
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        rows.sort_by(|(a_key, a), (b_key, b)| {
            cmp_values(&key_of(a), &key_of(b)).then_with(|| a_key.cmp(b_key))
        });

        match query.limit {
            Some(ChildLimit::First(n)) => rows.truncate(n as usize),
            Some(ChildLimit::Last(n)) => {
                let n = n as usize;
                if rows.len() > n {
                    rows.drain(..rows.len() - n);
                }
            },
            None => {},
        }
        Ok(rows)
    }
}

fn node_at<'v>(root: &'v Value, path: &TreePath) -> Option<&'v Value> {
    let mut node = root;
    for segment in path.iter() {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

/// Writes `value` at `path` (`None` removes), creating intermediate objects
/// on write and pruning emptied ones on removal.
fn write_at(root: &mut Value, path: &TreePath, value: Option<Value>) -> Result<(), BackendError> {
    fn recurse(
        node: &mut Value,
        segments: &[String],
        value: Option<Value>,
    ) -> Result<(), BackendError> {
        let Some((head, rest)) = segments.split_first() else {
            *node = value.unwrap_or(Value::Object(Map::new()));
            return Ok(());
        };
        let map = match node {
            Value::Object(map) => map,
            other => {
                if value.is_none() {
                    // Nothing to remove below a leaf.
                    return Ok(());
                }
                return Err(BackendError::corrupt(format!(
                    "cannot descend into non-object node: {other}"
                )));
            },
        };
        match value {
            Some(_) => {
                let child = map.entry(head.clone()).or_insert_with(|| Value::Object(Map::new()));
                recurse(child, rest, value)
            },
            None => {
                if rest.is_empty() {
                    map.remove(head);
                    return Ok(());
                }
                if let Some(child) = map.get_mut(head) {
                    recurse(child, rest, None)?;
                    if child.as_object().is_some_and(Map::is_empty) {
                        map.remove(head);
                    }
                }
                Ok(())
            },
        }
    }

    if path.segments.is_empty() {
        *root = value.unwrap_or(Value::Object(Map::new()));
        return Ok(());
    }
    recurse(root, &path.segments, value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn path(s: &str) -> TreePath {
        TreePath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn set_get_remove_round_trip() {
        let engine = TreeEngine::new();
        engine.set(&path("/app/users/u1"), json!({"name": "alice"})).await.unwrap();
        assert_eq!(
            engine.get(&path("/app/users/u1")).await.unwrap(),
            Some(json!({"name": "alice"}))
        );

        engine.remove(&path("/app/users/u1")).await.unwrap();
        assert_eq!(engine.get(&path("/app/users/u1")).await.unwrap(), None);
        // Emptied intermediates are pruned.
        assert_eq!(engine.get(&path("/app/users")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_creates_intermediate_objects() {
        let engine = TreeEngine::new();
        engine.set(&path("/a/b/c"), json!(1)).await.unwrap();
        assert_eq!(engine.get(&path("/a")).await.unwrap(), Some(json!({"b": {"c": 1}})));
    }

    #[tokio::test]
    async fn set_through_a_scalar_is_corrupt() {
        let engine = TreeEngine::new();
        engine.set(&path("/a"), json!(7)).await.unwrap();
        let err = engine.set(&path("/a/b"), json!(1)).await.unwrap_err();
        assert!(matches!(err, BackendError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn path_parsing_validates_segments() {
        assert!(TreePath::parse("/ok/also-ok").is_ok());
        assert!(TreePath::parse("/bad.segment").is_err());
        assert_eq!(path("/a/b").to_string(), "/a/b");
        assert_eq!(TreePath::root().to_string(), "/");
        assert_eq!(path("/a").child("b"), path("/a/b"));
    }

    #[tokio::test]
    async fn compare_and_swap_detects_conflicts() {
        let engine = TreeEngine::new();
        let p = path("/slot");

        // Claim when absent.
        engine.compare_and_swap(&p, None, Some(json!(1))).await.unwrap();
        // Second absent-claim conflicts.
        let err = engine.compare_and_swap(&p, None, Some(json!(2))).await.unwrap_err();
        assert!(matches!(err, BackendError::Conflict));
        // Swap with correct expectation succeeds, including deletion.
        engine.compare_and_swap(&p, Some(&json!(1)), None).await.unwrap();
        assert_eq!(engine.get(&p).await.unwrap(), None);
    }

    #[tokio::test]
    async fn transaction_commits_closure_output() {
        let engine = TreeEngine::new();
        let p = path("/counter");
        engine.set(&p, json!(1)).await.unwrap();

        let previous: Option<Value> = engine
            .run_transaction::<_, BackendError, _>(&p, &RetryConfig::default(), |current| {
                let n = current.as_ref().and_then(Value::as_i64).unwrap_or(0);
                Ok((Some(json!(n + 1)), current))
            })
            .await
            .unwrap();
        assert_eq!(previous, Some(json!(1)));
        assert_eq!(engine.get(&p).await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn transaction_abort_leaves_value_untouched() {
        let engine = TreeEngine::new();
        let p = path("/slot");
        engine.set(&p, json!(1)).await.unwrap();

        let result: Result<(), TxnError<&str>> = engine
            .run_transaction(&p, &RetryConfig::default(), |_| Err("nope"))
            .await;
        assert!(matches!(result, Err(TxnError::Aborted("nope"))));
        assert_eq!(engine.get(&p).await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn query_children_orders_and_bounds() {
        let engine = TreeEngine::new();
        let users = path("/users");
        for (key, age) in [("u1", 30), ("u2", 20), ("u3", 40), ("u4", 20)] {
            engine.set(&users.child(key), json!({"age": age})).await.unwrap();
        }

        let query = ChildQuery { order_by: "age".into(), ..Default::default() };
        let rows = engine.query_children(&users, &query).await.unwrap();
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["u2", "u4", "u1", "u3"]);

        let bounded = ChildQuery {
            order_by: "age".into(),
            start_at: Some(json!(20)),
            end_at: Some(json!(30)),
            ..Default::default()
        };
        let rows = engine.query_children(&users, &bounded).await.unwrap();
        assert_eq!(rows.len(), 3);

        let equal = ChildQuery {
            order_by: "age".into(),
            equal_to: Some(json!(20)),
            ..Default::default()
        };
        let rows = engine.query_children(&users, &equal).await.unwrap();
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["u2", "u4"]);
    }

    #[tokio::test]
    async fn query_children_limits_head_and_tail() {
        let engine = TreeEngine::new();
        let p = path("/c");
        for i in 0..5 {
            engine.set(&p.child(&format!("k{i}")), json!({"n": i})).await.unwrap();
        }

        let first = ChildQuery {
            order_by: "n".into(),
            limit: Some(ChildLimit::First(2)),
            ..Default::default()
        };
        let rows = engine.query_children(&p, &first).await.unwrap();
        assert_eq!(rows.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(), vec!["k0", "k1"]);

        let last = ChildQuery {
            order_by: "n".into(),
            limit: Some(ChildLimit::Last(2)),
            ..Default::default()
        };
        let rows = engine.query_children(&p, &last).await.unwrap();
        // Still ascending.
        assert_eq!(rows.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(), vec!["k3", "k4"]);
    }

    #[tokio::test]
    async fn query_children_of_scalar_is_corrupt() {
        let engine = TreeEngine::new();
        engine.set(&path("/leaf"), json!(7)).await.unwrap();
        let err = engine
            .query_children(&path("/leaf"), &ChildQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn query_children_of_absent_path_is_empty() {
        let engine = TreeEngine::new();
        let rows = engine
            .query_children(&path("/nothing"), &ChildQuery::default())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn generated_keys_are_time_ordered() {
        let engine = TreeEngine::new();
        let a = engine.generate_key();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = engine.generate_key();
        assert_eq!(a.len(), 20);
        assert!(a < b);
    }
}
