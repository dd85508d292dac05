//! Per-collection store configuration.
//!
//! [`DataStoreOptions`] is constructed once per [`DataStore`] instance via the
//! builder and owned exclusively by it; it never changes afterwards.
//!
//! # Example
//!
//! ```
//! use duostore_core::{CreateIdOption, DataStoreOptions};
//!
//! let options = DataStoreOptions::builder()
//!     .create_id_option(CreateIdOption::ManualRejectIdConflicts)
//!     .require_transaction(true)
//!     .read_only_fields(["email"])
//!     .build();
//! assert!(options.require_transaction);
//! ```
//!
//! [`DataStore`]: crate::DataStore

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Id allocation policy for `create` / `create_with_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateIdOption {
    /// Ids are generated by the backend; `create_with_id` is disallowed.
    AutoGeneratedId,
    /// The caller supplies the id; an occupied id fails immediately.
    ManualRejectIdConflicts,
    /// The caller supplies a base id; occupied slots retry with `-2`..`-100`
    /// suffixes before failing.
    ManualAllowIdConflicts,
}

/// Declared JSON shape of a collection's value payloads.
///
/// A closed set checked exhaustively at the validator boundary; there is no
/// open-ended duck typing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueShape {
    /// A single scalar (null under the null policy, bool, number, string).
    Scalar,
    /// A JSON object.
    #[default]
    Object,
    /// A JSON array.
    Array,
}

/// Immutable per-collection configuration for a [`DataStore`] instance.
///
/// [`DataStore`]: crate::DataStore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataStoreOptions {
    /// How `create` / `create_with_id` allocate identifiers.
    pub create_id_option: CreateIdOption,

    /// When true, `update` is disallowed and callers must use
    /// `transactional_update` (and vice versa when false).
    pub require_transaction: bool,

    /// When true, `update` / `transactional_update` on an absent record
    /// create it instead of failing with `RecordNotFound`.
    pub create_if_not_exists: bool,

    /// Value fields that must not change after creation.
    pub read_only_fields: BTreeSet<String>,

    /// When true, a `null` value payload passes validation.
    pub allow_null: bool,

    /// Declared shape of value payloads in this collection.
    pub value_shape: ValueShape,
}

impl Default for DataStoreOptions {
    fn default() -> Self {
        Self {
            create_id_option: CreateIdOption::AutoGeneratedId,
            require_transaction: false,
            create_if_not_exists: false,
            read_only_fields: BTreeSet::new(),
            allow_null: false,
            value_shape: ValueShape::Object,
        }
    }
}

impl DataStoreOptions {
    /// Starts building a set of options from the defaults.
    #[must_use]
    pub fn builder() -> DataStoreOptionsBuilder {
        DataStoreOptionsBuilder { options: Self::default() }
    }
}

/// Builder for [`DataStoreOptions`].
#[derive(Debug, Clone)]
pub struct DataStoreOptionsBuilder {
    options: DataStoreOptions,
}

impl DataStoreOptionsBuilder {
    /// Sets the id allocation policy.
    #[must_use]
    pub fn create_id_option(mut self, option: CreateIdOption) -> Self {
        self.options.create_id_option = option;
        self
    }

    /// Forces `transactional_update` over `update`.
    #[must_use]
    pub fn require_transaction(mut self, require: bool) -> Self {
        self.options.require_transaction = require;
        self
    }

    /// Enables upsert semantics on the update path.
    #[must_use]
    pub fn create_if_not_exists(mut self, create: bool) -> Self {
        self.options.create_if_not_exists = create;
        self
    }

    /// Declares fields immutable after creation.
    #[must_use]
    pub fn read_only_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.read_only_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Permits `null` value payloads.
    #[must_use]
    pub fn allow_null(mut self, allow: bool) -> Self {
        self.options.allow_null = allow;
        self
    }

    /// Declares the value shape of this collection.
    #[must_use]
    pub fn value_shape(mut self, shape: ValueShape) -> Self {
        self.options.value_shape = shape;
        self
    }

    /// Finalizes the options.
    #[must_use]
    pub fn build(self) -> DataStoreOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_auto_id_object_shape() {
        let options = DataStoreOptions::default();
        assert_eq!(options.create_id_option, CreateIdOption::AutoGeneratedId);
        assert_eq!(options.value_shape, ValueShape::Object);
        assert!(!options.require_transaction);
        assert!(!options.allow_null);
    }

    #[test]
    fn builder_collects_read_only_fields() {
        let options = DataStoreOptions::builder().read_only_fields(["a", "b", "a"]).build();
        assert_eq!(options.read_only_fields.len(), 2);
        assert!(options.read_only_fields.contains("a"));
    }
}
