//! Store error types and result alias.
//!
//! This module defines the error taxonomy shared by every [`DataStore`]
//! implementation. Adapters map their engine's internal failures to these
//! standardized variants at the boundary; callers map the stable
//! [`code`](StoreError::code) of each variant to transport-level responses.
//!
//! # Error Classes
//!
//! - [`StoreError::InvalidParameters`] - Malformed caller input (id format, range, filter syntax)
//! - [`StoreError::InvalidData`] - Value fails structural validation or a read-only-field invariant
//! - [`StoreError::InvalidMethod`] - Wrong CRUD variant for the configured id/transaction policy
//! - [`StoreError::RecordNotFound`] - Record does not exist
//! - `RecordCreateFailed` / `RecordUpdateFailed` / `RecordDeleteFailed` /
//!   `RecordReadFailed` / `RecordQueryFailed` - Operation-level backend failures
//! - [`StoreError::DatabaseConsistency`] - Backend returned data violating the store's invariants
//! - [`StoreError::LockAcquisitionFailed`] - Advisory lock could not be claimed in time
//!
//! # Propagation Policy
//!
//! Validation and policy errors are raised immediately and never retried.
//! Backend transaction conflicts are retried internally by the engine up to
//! its configured limit, then surfaced as the corresponding `RecordXFailed`.
//! No error is silently swallowed inside the store layer.
//!
//! # Example
//!
//! ```
//! use duostore_core::{StoreError, StoreResult};
//!
//! fn lookup(id: &str) -> StoreResult<Vec<u8>> {
//!     Err(StoreError::record_not_found(id))
//! }
//!
//! let err = lookup("user-1").unwrap_err();
//! assert_eq!(err.code(), "RECORD_NOT_FOUND");
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
///
/// This enum represents the canonical set of errors that any [`DataStore`]
/// implementation can produce. Backend failures preserve their source chain
/// via the `#[source]` attribute.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]` — new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
///
/// [`DataStore`]: crate::DataStore
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Malformed caller input: id format, range bounds, filter or sort syntax.
    #[error("Invalid parameters: {message}")]
    InvalidParameters {
        /// Description of what was malformed.
        message: String,
    },

    /// The value payload failed structural validation, or an update attempted
    /// to change a declared read-only field.
    #[error("Invalid data: {message}")]
    InvalidData {
        /// Description of the violated invariant.
        message: String,
    },

    /// The caller used the wrong CRUD variant for the configured id or
    /// transaction policy (e.g. `create_with_id` under `AutoGeneratedId`).
    #[error("Invalid method: {message}")]
    InvalidMethod {
        /// Description of the policy violation.
        message: String,
    },

    /// The requested record does not exist.
    #[error("Record not found: {id}")]
    RecordNotFound {
        /// The id that was not found.
        id: String,
    },

    /// Record creation failed: id conflict exhaustion, callback rollback, or
    /// a backend write failure.
    #[error("Record create failed: {message}")]
    RecordCreateFailed {
        /// Description of the failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// Record update failed after internal conflict retries were exhausted,
    /// or the backend rejected the write.
    #[error("Record update failed: {message}")]
    RecordUpdateFailed {
        /// Description of the failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// Record deletion failed at the backend.
    #[error("Record delete failed: {message}")]
    RecordDeleteFailed {
        /// Description of the failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// Record read failed at the backend.
    #[error("Record read failed: {message}")]
    RecordReadFailed {
        /// Description of the failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// Query execution failed at the backend.
    #[error("Record query failed: {message}")]
    RecordQueryFailed {
        /// Description of the failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The backend returned data violating the store's own invariants, e.g.
    /// a type mismatch between current and incoming merge values, or a stored
    /// value that fails read-side validation.
    #[error("Database consistency error: {message}")]
    DatabaseConsistency {
        /// Description of the inconsistency.
        message: String,
    },

    /// The advisory lock could not be acquired within the configured window.
    #[error("Failed to acquire lock: {resource_key}")]
    LockAcquisitionFailed {
        /// The contended resource key.
        resource_key: String,
    },
}

impl StoreError {
    /// Creates a new `InvalidParameters` error.
    #[must_use]
    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::InvalidParameters { message: message.into() }
    }

    /// Creates a new `InvalidData` error.
    #[must_use]
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData { message: message.into() }
    }

    /// Creates a new `InvalidMethod` error.
    #[must_use]
    pub fn invalid_method(message: impl Into<String>) -> Self {
        Self::InvalidMethod { message: message.into() }
    }

    /// Creates a new `RecordNotFound` error for the given id.
    #[must_use]
    pub fn record_not_found(id: impl Into<String>) -> Self {
        Self::RecordNotFound { id: id.into() }
    }

    /// Creates a new `RecordCreateFailed` error with the given message.
    #[must_use]
    pub fn create_failed(message: impl Into<String>) -> Self {
        Self::RecordCreateFailed { message: message.into(), source: None }
    }

    /// Creates a new `RecordCreateFailed` error with a message and source error.
    #[must_use]
    pub fn create_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::RecordCreateFailed { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `RecordUpdateFailed` error with the given message.
    #[must_use]
    pub fn update_failed(message: impl Into<String>) -> Self {
        Self::RecordUpdateFailed { message: message.into(), source: None }
    }

    /// Creates a new `RecordUpdateFailed` error with a message and source error.
    #[must_use]
    pub fn update_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::RecordUpdateFailed { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `RecordDeleteFailed` error with a message and source error.
    #[must_use]
    pub fn delete_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::RecordDeleteFailed { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `RecordReadFailed` error with a message and source error.
    #[must_use]
    pub fn read_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::RecordReadFailed { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `RecordQueryFailed` error with a message and source error.
    #[must_use]
    pub fn query_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::RecordQueryFailed { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `DatabaseConsistency` error.
    #[must_use]
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::DatabaseConsistency { message: message.into() }
    }

    /// Creates a new `LockAcquisitionFailed` error for the given resource key.
    #[must_use]
    pub fn lock_acquisition_failed(resource_key: impl Into<String>) -> Self {
        Self::LockAcquisitionFailed { resource_key: resource_key.into() }
    }

    /// Returns the stable machine-readable code for this error.
    ///
    /// Codes never change across releases; callers use them to map errors to
    /// transport-level responses without matching on variants.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParameters { .. } => "INVALID_PARAMETERS",
            Self::InvalidData { .. } => "INVALID_DATA",
            Self::InvalidMethod { .. } => "INVALID_METHOD",
            Self::RecordNotFound { .. } => "RECORD_NOT_FOUND",
            Self::RecordCreateFailed { .. } => "RECORD_CREATE_FAILED",
            Self::RecordUpdateFailed { .. } => "RECORD_UPDATE_FAILED",
            Self::RecordDeleteFailed { .. } => "RECORD_DELETE_FAILED",
            Self::RecordReadFailed { .. } => "RECORD_READ_FAILED",
            Self::RecordQueryFailed { .. } => "RECORD_QUERY_FAILED",
            Self::DatabaseConsistency { .. } => "DATABASE_CONSISTENCY",
            Self::LockAcquisitionFailed { .. } => "LOCK_ACQUISITION_FAILED",
        }
    }
}

/// Errors produced by the storage engines themselves.
///
/// Engines have a deliberately narrow failure surface; adapters map these to
/// the corresponding [`StoreError`] variant for the operation in flight.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Optimistic-concurrency conflict: a compare-and-swap expectation did not
    /// hold, or a scan anchor vanished between planning and execution.
    #[error("backend conflict")]
    Conflict,

    /// The engine holds data it cannot interpret for this operation, e.g. a
    /// non-object node where children were expected.
    #[error("corrupt backend state: {message}")]
    Corrupt {
        /// Description of the corrupt state.
        message: String,
    },

    /// The engine could not reach its backing service. The in-process
    /// reference engines never produce this; remote engine implementations
    /// map their transport failures here.
    #[error("backend unavailable: {message}")]
    Unavailable {
        /// Description of the outage.
        message: String,
    },
}

impl BackendError {
    /// Creates a new `Corrupt` error.
    #[must_use]
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt { message: message.into() }
    }

    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into() }
    }
}
