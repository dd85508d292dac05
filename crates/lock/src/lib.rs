//! Distributed advisory lock over a tree-engine slot.
//!
//! [`DistributedLock`] serializes multi-step workflows that must appear
//! atomic even though they span independent stores: each named resource maps
//! to a single well-known tree path, and holding the lock means owning the
//! value at that path.
//!
//! # Protocol
//!
//! - **Acquire**: poll-claim the slot with a compare-and-swap that expects
//!   absence, until the configured window elapses. A slot whose holder
//!   timestamp has aged past the window is considered abandoned and taken
//!   over with a compare-and-swap against the observed value.
//! - **Release**: compare-and-swap delete against the exact held value, so a
//!   holder can never delete a lock it lost to a takeover.
//! - **Scoped use**: [`perform_operation`](DistributedLock::perform_operation)
//!   acquires, runs the critical section, and releases on every exit path.
//!
//! The lock is advisory: it guards workflows that agree to use it, not the
//! stores themselves.
//!
//! # Quick Start
//!
//! ```
//! use duostore_core::{TreeEngine, TreePath};
//! use duostore_lock::DistributedLock;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = TreeEngine::new();
//!     let path = TreePath::parse("/locks")?;
//!     let lock = DistributedLock::new(engine, path, "billing-run")?;
//!
//!     let total = lock
//!         .perform_operation(|| async {
//!             // Critical section: reads and writes across stores.
//!             Ok(42)
//!         })
//!         .await?;
//!     assert_eq!(total, 42);
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

use std::{future::Future, time::Duration};

use chrono::{DateTime, Utc};
use duostore_core::{
    error::BackendError, validate, StoreError, StoreResult, TreeEngine, TreePath,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// Acquisition policy for a [`DistributedLock`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// How long to keep trying to claim the slot. A held slot older than
    /// this is treated as abandoned.
    pub duration: Duration,
    /// Delay between claim attempts.
    pub check_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { duration: Duration::from_secs(5), check_interval: Duration::from_millis(50) }
    }
}

/// Proof of a held lock, required to release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    /// The locked resource.
    pub resource_key: String,
    /// The holder's unique claim token.
    pub token: String,
    /// When the claim committed.
    pub acquired_at: DateTime<Utc>,
}

/// The slot value stored at the lock path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockSlot {
    token: String,
    acquired_at: DateTime<Utc>,
}

impl LockSlot {
    fn to_value(&self) -> StoreResult<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| StoreError::consistency(format!("unserializable lock slot: {e}")))
    }
}

/// Named advisory lock backed by one tree path per resource key.
///
/// Clones share nothing; instances coordinating on the same resource must
/// share the same engine, parent path, and resource key.
#[derive(Debug, Clone)]
pub struct DistributedLock {
    engine: TreeEngine,
    path: TreePath,
    resource_key: String,
    config: LockConfig,
}

impl DistributedLock {
    /// Creates a lock for `resource_key` under the given parent path, with
    /// the default acquisition policy.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidParameters`] when the resource key is not
    /// a valid path segment.
    pub fn new(
        engine: TreeEngine,
        path: TreePath,
        resource_key: impl Into<String>,
    ) -> StoreResult<Self> {
        let resource_key = resource_key.into();
        validate::validate_id(&resource_key)?;
        Ok(Self { engine, path, resource_key, config: LockConfig::default() })
    }

    /// Overrides the acquisition policy.
    #[must_use]
    pub fn with_config(mut self, config: LockConfig) -> Self {
        self.config = config;
        self
    }

    fn slot_path(&self) -> TreePath {
        self.path.child(&self.resource_key)
    }

    /// Claims the lock, retrying every `check_interval` until `duration`
    /// elapses.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockAcquisitionFailed`] when the window elapses
    /// without a successful claim, and [`StoreError::DatabaseConsistency`]
    /// when the slot holds a value this crate could not have written.
    #[tracing::instrument(skip(self), fields(resource_key = %self.resource_key))]
    pub async fn acquire(&self) -> StoreResult<LockHandle> {
        let slot_path = self.slot_path();
        let deadline = tokio::time::Instant::now() + self.config.duration;

        loop {
            let slot = LockSlot { token: Uuid::new_v4().to_string(), acquired_at: Utc::now() };
            let current = self
                .engine
                .get(&slot_path)
                .await
                .map_err(|e| StoreError::consistency(format!("lock slot read failed: {e}")))?;

            let claim = match &current {
                None => {
                    self.engine.compare_and_swap(&slot_path, None, Some(slot.to_value()?)).await
                },
                Some(held_value) => {
                    let held: LockSlot =
                        serde_json::from_value(held_value.clone()).map_err(|e| {
                            StoreError::consistency(format!("unreadable lock slot: {e}"))
                        })?;
                    let age = Utc::now().signed_duration_since(held.acquired_at);
                    if age.to_std().unwrap_or(Duration::ZERO) <= self.config.duration {
                        // Genuinely held; wait our turn.
                        Err(BackendError::Conflict)
                    } else {
                        warn!(
                            resource_key = %self.resource_key,
                            held_token = %held.token,
                            "taking over abandoned lock"
                        );
                        self.engine
                            .compare_and_swap(
                                &slot_path,
                                Some(held_value),
                                Some(slot.to_value()?),
                            )
                            .await
                    }
                },
            };

            match claim {
                Ok(()) => {
                    debug!(resource_key = %self.resource_key, "lock acquired");
                    return Ok(LockHandle {
                        resource_key: self.resource_key.clone(),
                        token: slot.token,
                        acquired_at: slot.acquired_at,
                    });
                },
                Err(BackendError::Conflict) => {},
                Err(e) => {
                    return Err(StoreError::consistency(format!("lock slot claim failed: {e}")));
                },
            }

            if tokio::time::Instant::now() + self.config.check_interval > deadline {
                return Err(StoreError::lock_acquisition_failed(self.resource_key.clone()));
            }
            tokio::time::sleep(self.config.check_interval).await;
        }
    }

    /// Releases a held lock, verifying the handle still owns the slot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseConsistency`] when the slot is no longer
    /// held by this handle's token (e.g. it was taken over as abandoned).
    pub async fn release(&self, handle: LockHandle) -> StoreResult<()> {
        let held =
            LockSlot { token: handle.token, acquired_at: handle.acquired_at }.to_value()?;
        match self.engine.compare_and_swap(&self.slot_path(), Some(&held), None).await {
            Ok(()) => {
                debug!(resource_key = %self.resource_key, "lock released");
                Ok(())
            },
            Err(BackendError::Conflict) => {
                warn!(resource_key = %self.resource_key, "lock no longer held at release");
                Err(StoreError::consistency(format!(
                    "lock '{}' was not held by this handle at release",
                    self.resource_key
                )))
            },
            Err(e) => Err(StoreError::consistency(format!("lock slot release failed: {e}"))),
        }
    }

    /// Runs a critical section under the lock: acquires, awaits `f`, and
    /// releases on every exit path. The section's error wins over a release
    /// failure.
    ///
    /// # Errors
    ///
    /// Acquisition and release errors as [`acquire`](Self::acquire) and
    /// [`release`](Self::release), plus whatever `f` returns.
    pub async fn perform_operation<T, F, Fut>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let handle = self.acquire().await?;
        let outcome = f().await;
        let released = self.release(handle).await;
        match (outcome, released) {
            (Err(section_err), _) => Err(section_err),
            (Ok(_), Err(release_err)) => Err(release_err),
            (Ok(out), Ok(())) => Ok(out),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn lock_for(engine: &TreeEngine, key: &str) -> DistributedLock {
        let path = TreePath::parse("/locks").unwrap();
        DistributedLock::new(engine.clone(), path, key).unwrap()
    }

    fn fast() -> LockConfig {
        LockConfig {
            duration: Duration::from_millis(100),
            check_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn lock_is_debug_and_cloneable() {
        let engine = TreeEngine::new();
        let lock = lock_for(&engine, "res");
        let copy = lock.clone();
        assert!(format!("{copy:?}").contains("res"));
    }

    #[tokio::test]
    async fn acquire_then_release_round_trips() {
        let engine = TreeEngine::new();
        let lock = lock_for(&engine, "res");

        let handle = lock.acquire().await.unwrap();
        assert_eq!(handle.resource_key, "res");
        lock.release(handle).await.unwrap();

        // The slot is free again.
        let handle = lock.acquire().await.unwrap();
        lock.release(handle).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_resource_key_is_rejected() {
        let engine = TreeEngine::new();
        let path = TreePath::parse("/locks").unwrap();
        let err = DistributedLock::new(engine, path, "a/b").unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETERS");
    }

    #[tokio::test]
    async fn contended_acquire_times_out() {
        let engine = TreeEngine::new();
        let holder = lock_for(&engine, "res");
        let contender = lock_for(&engine, "res").with_config(fast());

        let handle = holder.acquire().await.unwrap();
        let err = contender.acquire().await.unwrap_err();
        assert_eq!(err.code(), "LOCK_ACQUISITION_FAILED");
        holder.release(handle).await.unwrap();
    }

    #[tokio::test]
    async fn independent_resources_do_not_contend() {
        let engine = TreeEngine::new();
        let a = lock_for(&engine, "res-a");
        let b = lock_for(&engine, "res-b");

        let handle_a = a.acquire().await.unwrap();
        let handle_b = b.acquire().await.unwrap();
        a.release(handle_a).await.unwrap();
        b.release(handle_b).await.unwrap();
    }

    #[tokio::test]
    async fn abandoned_lock_is_taken_over() {
        let engine = TreeEngine::new();
        let crashed = lock_for(&engine, "res").with_config(fast());
        let successor = lock_for(&engine, "res").with_config(fast());

        // The holder "crashes" without releasing.
        let dead_handle = crashed.acquire().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let handle = successor.acquire().await.unwrap();
        assert_ne!(handle.token, dead_handle.token);

        // The crashed holder can no longer release what it lost.
        let err = crashed.release(dead_handle).await.unwrap_err();
        assert_eq!(err.code(), "DATABASE_CONSISTENCY");
        successor.release(handle).await.unwrap();
    }

    #[tokio::test]
    async fn perform_operation_releases_on_success_and_error() {
        let engine = TreeEngine::new();
        let lock = lock_for(&engine, "res").with_config(fast());

        let out = lock.perform_operation(|| async { Ok(7) }).await.unwrap();
        assert_eq!(out, 7);

        let err = lock
            .perform_operation::<(), _, _>(|| async {
                Err(StoreError::invalid_data("section failed"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_DATA");

        // Both paths released: a fresh acquire succeeds immediately.
        let handle = lock.acquire().await.unwrap();
        lock.release(handle).await.unwrap();
    }
}
