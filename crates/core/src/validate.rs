//! Structural validation common to both backends.
//!
//! Validation runs before the codec transform on every write, and after the
//! inverse transform on every read. The same checks apply in both directions,
//! but a read-side failure means the backend holds data the store itself
//! could never have written, so it surfaces as
//! [`StoreError::DatabaseConsistency`] rather than
//! [`StoreError::InvalidData`].

use serde_json::Value;

use crate::{
    error::{StoreError, StoreResult},
    options::{DataStoreOptions, ValueShape},
};

/// Ids longer than this are rejected.
const MAX_ID_BYTES: usize = 768;

/// Characters forbidden in ids: path separators and the tree backend's
/// reserved key characters. The document backend inherits the same rule so
/// ids stay portable across backends.
const RESERVED_ID_CHARS: &[char] = &['/', '.', '#', '$', '[', ']'];

/// Validates a caller-supplied record id.
///
/// # Errors
///
/// Returns [`StoreError::InvalidParameters`] when the id is empty, exceeds
/// [`MAX_ID_BYTES`], or contains reserved or control characters.
pub fn validate_id(id: &str) -> StoreResult<()> {
    if id.is_empty() {
        return Err(StoreError::invalid_parameters("id must be non-empty"));
    }
    if id.len() > MAX_ID_BYTES {
        return Err(StoreError::invalid_parameters(format!(
            "id exceeds {MAX_ID_BYTES} bytes"
        )));
    }
    if let Some(bad) = id.chars().find(|c| RESERVED_ID_CHARS.contains(c) || c.is_control()) {
        return Err(StoreError::invalid_parameters(format!(
            "id contains reserved character {bad:?}"
        )));
    }
    Ok(())
}

/// Validates a value payload against the collection's declared options.
///
/// Checks, in order: the null policy, the declared [`ValueShape`], and the
/// reserved `id` key (the id is exogenous and must never appear inside the
/// payload).
///
/// # Errors
///
/// Returns [`StoreError::InvalidData`] describing the first violated
/// invariant.
pub fn validate_value(value: &Value, options: &DataStoreOptions) -> StoreResult<()> {
    if value.is_null() {
        if options.allow_null {
            return Ok(());
        }
        return Err(StoreError::invalid_data("value must not be null"));
    }

    match (options.value_shape, value) {
        (ValueShape::Object, Value::Object(_))
        | (ValueShape::Array, Value::Array(_))
        | (ValueShape::Scalar, Value::Bool(_) | Value::Number(_) | Value::String(_)) => {},
        (shape, other) => {
            return Err(StoreError::invalid_data(format!(
                "value does not match declared shape {shape:?}: got {}",
                json_type_name(other)
            )));
        },
    }

    if let Value::Object(map) = value {
        if map.contains_key("id") {
            return Err(StoreError::invalid_data(
                "value must not contain the reserved 'id' key",
            ));
        }
    }

    Ok(())
}

/// Read-side validation: same checks as [`validate_value`], but a failure is
/// a [`StoreError::DatabaseConsistency`] because the stored data itself is at
/// fault, not the caller.
pub fn validate_stored_value(value: &Value, options: &DataStoreOptions) -> StoreResult<()> {
    validate_value(value, options).map_err(|err| match err {
        StoreError::InvalidData { message } => StoreError::consistency(message),
        other => other,
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use crate::options::DataStoreOptions;

    use super::*;

    #[test]
    fn null_rejected_unless_allowed() {
        let strict = DataStoreOptions::default();
        assert_eq!(validate_value(&json!(null), &strict).unwrap_err().code(), "INVALID_DATA");

        let lenient = DataStoreOptions::builder().allow_null(true).build();
        validate_value(&json!(null), &lenient).unwrap();
    }

    #[test]
    fn shape_mismatch_rejected() {
        let object_shape = DataStoreOptions::default();
        assert!(validate_value(&json!([1, 2]), &object_shape).is_err());
        assert!(validate_value(&json!("scalar"), &object_shape).is_err());
        validate_value(&json!({"a": 1}), &object_shape).unwrap();

        let scalar_shape = DataStoreOptions::builder().value_shape(ValueShape::Scalar).build();
        validate_value(&json!(42), &scalar_shape).unwrap();
        assert!(validate_value(&json!({"a": 1}), &scalar_shape).is_err());
    }

    #[test]
    fn reserved_id_key_rejected() {
        let options = DataStoreOptions::default();
        let err = validate_value(&json!({"id": "x", "name": "y"}), &options).unwrap_err();
        assert_eq!(err.code(), "INVALID_DATA");
    }

    #[test]
    fn read_side_failure_is_consistency_error() {
        let options = DataStoreOptions::default();
        let err = validate_stored_value(&json!({"id": "x"}), &options).unwrap_err();
        assert_eq!(err.code(), "DATABASE_CONSISTENCY");
    }

    #[test]
    fn id_format_rules() {
        validate_id("user-42").unwrap();
        validate_id("ORDER_2024").unwrap();
        assert!(validate_id("").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id("dotted.name").is_err());
        assert!(validate_id("hash#tag").is_err());
        assert!(validate_id(&"x".repeat(769)).is_err());
        assert!(validate_id("tab\there").is_err());
    }
}
