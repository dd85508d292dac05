//! Filter parsing and clause evaluation.
//!
//! Filters arrive as a map of operator-suffixed keys, e.g.
//! `{"age_gte": 21, "role_eq_any": ["admin", "editor"]}`. A key with no
//! recognized suffix is an equality clause. The document backend accepts any
//! combination of clauses; the tree backend accepts at most a single
//! range/equality clause on its sort field and rejects the rest with
//! `InvalidParameters` (it cannot express inequality, set membership, or
//! contains natively).
//!
//! # Operators
//!
//! | Suffix | Meaning |
//! |--------|---------|
//! | `_eq` (or none) | field equals value |
//! | `_neq` | field differs from value |
//! | `_eq_any` | field equals any element of a value array |
//! | `_neq_any` | field equals no element of a value array |
//! | `_inc_any` | field is an array including any element of a value array |
//! | `_q` | field is a string containing the value (case-insensitive) |
//! | `_lt` / `_lte` / `_gt` / `_gte` | range comparison under the JSON total order |

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::{
    error::{StoreError, StoreResult},
    types::cmp_values,
};

/// Filter operator, parsed from a key suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Equality.
    Eq,
    /// Inequality.
    Neq,
    /// Equality against any element of an array.
    EqAny,
    /// Inequality against every element of an array.
    NeqAny,
    /// Array field includes any element of an array.
    IncAny,
    /// Case-insensitive substring match on string fields.
    Contains,
    /// Strictly less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Strictly greater than.
    Gt,
    /// Greater than or equal.
    Gte,
}

impl FilterOp {
    /// Whether this operator is expressible as a native ordered-bound
    /// predicate (the only kind the tree backend supports).
    #[must_use]
    pub fn is_range_or_equality(self) -> bool {
        matches!(self, Self::Eq | Self::Lt | Self::Lte | Self::Gt | Self::Gte)
    }
}

// Longest suffixes first so `_eq_any` is not misread as `_eq`.
const SUFFIXES: &[(&str, FilterOp)] = &[
    ("_eq_any", FilterOp::EqAny),
    ("_neq_any", FilterOp::NeqAny),
    ("_inc_any", FilterOp::IncAny),
    ("_lte", FilterOp::Lte),
    ("_gte", FilterOp::Gte),
    ("_neq", FilterOp::Neq),
    ("_eq", FilterOp::Eq),
    ("_lt", FilterOp::Lt),
    ("_gt", FilterOp::Gt),
    ("_q", FilterOp::Contains),
];

/// One parsed filter clause.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    /// The value field the clause applies to.
    pub field: String,
    /// The comparison operator.
    pub op: FilterOp,
    /// The comparison operand.
    pub value: Value,
}

impl FilterClause {
    /// Evaluates this clause against a record's value payload.
    ///
    /// A missing field is treated as `Null`.
    #[must_use]
    pub fn matches(&self, record_value: &Value) -> bool {
        let field_value = record_value.get(&self.field).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::Eq => cmp_values(field_value, &self.value) == Ordering::Equal,
            FilterOp::Neq => cmp_values(field_value, &self.value) != Ordering::Equal,
            FilterOp::EqAny => as_array(&self.value)
                .iter()
                .any(|v| cmp_values(field_value, v) == Ordering::Equal),
            FilterOp::NeqAny => !as_array(&self.value)
                .iter()
                .any(|v| cmp_values(field_value, v) == Ordering::Equal),
            FilterOp::IncAny => match field_value {
                Value::Array(elements) => as_array(&self.value).iter().any(|needle| {
                    elements.iter().any(|e| cmp_values(e, needle) == Ordering::Equal)
                }),
                _ => false,
            },
            FilterOp::Contains => match (field_value, &self.value) {
                (Value::String(haystack), Value::String(needle)) => {
                    haystack.to_lowercase().contains(&needle.to_lowercase())
                },
                _ => false,
            },
            FilterOp::Lt => cmp_values(field_value, &self.value) == Ordering::Less,
            FilterOp::Lte => cmp_values(field_value, &self.value) != Ordering::Greater,
            FilterOp::Gt => cmp_values(field_value, &self.value) == Ordering::Greater,
            FilterOp::Gte => cmp_values(field_value, &self.value) != Ordering::Less,
        }
    }
}

fn as_array(value: &Value) -> &[Value] {
    match value {
        Value::Array(elements) => elements,
        // Parse-time validation guarantees array operands for *_any clauses.
        _ => std::slice::from_ref(value),
    }
}

/// A conjunction of filter clauses. Empty matches every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    /// The clauses, all of which must match.
    pub clauses: Vec<FilterClause>,
}

impl Filter {
    /// Parses a filter from an operator-suffixed key map.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidParameters`] when a key reduces to an
    /// empty field name, or a `*_any` operand is not an array.
    pub fn parse(map: &Map<String, Value>) -> StoreResult<Self> {
        let mut clauses = Vec::with_capacity(map.len());
        for (key, value) in map {
            let (field, op) = match SUFFIXES.iter().find(|(suffix, _)| key.ends_with(suffix)) {
                Some((suffix, op)) => (&key[..key.len() - suffix.len()], *op),
                None => (key.as_str(), FilterOp::Eq),
            };
            if field.is_empty() {
                return Err(StoreError::invalid_parameters(format!(
                    "filter key '{key}' has no field name"
                )));
            }
            if matches!(op, FilterOp::EqAny | FilterOp::NeqAny | FilterOp::IncAny)
                && !value.is_array()
            {
                return Err(StoreError::invalid_parameters(format!(
                    "filter key '{key}' requires an array operand"
                )));
            }
            clauses.push(FilterClause { field: field.to_owned(), op, value: value.clone() });
        }
        Ok(Self { clauses })
    }

    /// Parses a filter from a JSON object string (the HTTP layer's opaque
    /// filter parameter).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidParameters`] on malformed JSON, a
    /// non-object root, or any invalid clause.
    pub fn from_json(json: &str) -> StoreResult<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| StoreError::invalid_parameters(format!("malformed filter: {e}")))?;
        match value {
            Value::Object(map) => Self::parse(&map),
            other => Err(StoreError::invalid_parameters(format!(
                "filter must be a JSON object, got {other}"
            ))),
        }
    }

    /// Whether the filter has no clauses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluates all clauses against a record's value payload.
    #[must_use]
    pub fn matches(&self, record_value: &Value) -> bool {
        self.clauses.iter().all(|clause| clause.matches(record_value))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(json: &str) -> Filter {
        Filter::from_json(json).unwrap()
    }

    #[test]
    fn bare_key_is_equality() {
        let filter = parse(r#"{"name": "alice"}"#);
        assert_eq!(filter.clauses[0].op, FilterOp::Eq);
        assert_eq!(filter.clauses[0].field, "name");
        assert!(filter.matches(&json!({"name": "alice"})));
        assert!(!filter.matches(&json!({"name": "bob"})));
    }

    #[test]
    fn suffix_parsing_prefers_longest_match() {
        let filter = parse(r#"{"role_eq_any": ["a", "b"]}"#);
        assert_eq!(filter.clauses[0].op, FilterOp::EqAny);
        assert_eq!(filter.clauses[0].field, "role");

        let filter = parse(r#"{"age_lte": 30}"#);
        assert_eq!(filter.clauses[0].op, FilterOp::Lte);
        assert_eq!(filter.clauses[0].field, "age");
    }

    #[test]
    fn range_operators_follow_total_order() {
        let filter = parse(r#"{"age_gte": 21, "age_lt": 30}"#);
        assert!(filter.matches(&json!({"age": 21})));
        assert!(filter.matches(&json!({"age": 29})));
        assert!(!filter.matches(&json!({"age": 30})));
        assert!(!filter.matches(&json!({"age": 18})));
    }

    #[test]
    fn inc_any_matches_array_overlap() {
        let filter = parse(r#"{"tags_inc_any": ["rust", "db"]}"#);
        assert!(filter.matches(&json!({"tags": ["db", "storage"]})));
        assert!(!filter.matches(&json!({"tags": ["web"]})));
        assert!(!filter.matches(&json!({"tags": "db"})));
    }

    #[test]
    fn contains_is_case_insensitive_on_strings() {
        let filter = parse(r#"{"name_q": "LIC"}"#);
        assert!(filter.matches(&json!({"name": "Alice"})));
        assert!(!filter.matches(&json!({"name": "Bob"})));
        assert!(!filter.matches(&json!({"name": 42})));
    }

    #[test]
    fn neq_any_excludes_all_listed() {
        let filter = parse(r#"{"status_neq_any": ["deleted", "banned"]}"#);
        assert!(filter.matches(&json!({"status": "active"})));
        assert!(!filter.matches(&json!({"status": "banned"})));
    }

    #[test]
    fn missing_field_is_null() {
        let filter = parse(r#"{"ghost": null}"#);
        assert!(filter.matches(&json!({"other": 1})));
    }

    #[test]
    fn any_operand_must_be_array() {
        let err = Filter::from_json(r#"{"role_eq_any": "admin"}"#).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETERS");
    }

    #[test]
    fn empty_field_name_is_rejected() {
        let err = Filter::from_json(r#"{"_gte": 3}"#).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETERS");
    }

    #[test]
    fn non_object_filter_is_rejected() {
        let err = Filter::from_json("[1, 2]").unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETERS");
    }
}
