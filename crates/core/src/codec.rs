//! Per-collection value codecs.
//!
//! A [`ValueCodec`] converts a record's value payload between its application
//! representation and its store representation. Codecs are pure, stateless,
//! and injected into a store as an `Arc<dyn ValueCodec>` strategy — one per
//! collection, never via subclassing. [`to_store`](ValueCodec::to_store) runs
//! after write-side validation; [`from_store`](ValueCodec::from_store) runs
//! before read-side validation.
//!
//! Provided implementations:
//!
//! | Codec | Transform |
//! |-------|-----------|
//! | [`IdentityCodec`] | passthrough (the default) |
//! | [`TimestampFieldCodec`] | RFC 3339 date string ⇄ integer epoch millis |
//! | [`KeyedListCodec`] | array of `id`-tagged objects ⇄ object keyed by that id |

use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};

/// Bidirectional value transform between application and store shapes.
///
/// Both directions must be pure. For all valid application values,
/// `from_store(to_store(v)) == v` up to the codec's declared representation
/// change.
pub trait ValueCodec: Send + Sync {
    /// Converts an application-shaped value into its store representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidData`] when the application value does
    /// not fit the codec's expectations (e.g. an unparseable date string).
    fn to_store(&self, value: Value) -> StoreResult<Value>;

    /// Converts a store-shaped value back into its application
    /// representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseConsistency`] when the stored value does
    /// not fit the codec's expectations; this codec could not have written it.
    fn from_store(&self, value: Value) -> StoreResult<Value>;
}

/// Passthrough codec; the default for collections without representation
/// differences.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl ValueCodec for IdentityCodec {
    fn to_store(&self, value: Value) -> StoreResult<Value> {
        Ok(value)
    }

    fn from_store(&self, value: Value) -> StoreResult<Value> {
        Ok(value)
    }
}

/// Converts named fields between RFC 3339 date strings (application shape)
/// and integer epoch milliseconds (store shape).
///
/// Fields that are `null` or absent pass through untouched.
///
/// # Example
///
/// ```
/// use duostore_core::{TimestampFieldCodec, ValueCodec};
/// use serde_json::json;
///
/// let codec = TimestampFieldCodec::new(["created_at"]);
/// let stored = codec.to_store(json!({"created_at": "2024-05-01T00:00:00Z"})).unwrap();
/// assert_eq!(stored, json!({"created_at": 1714521600000i64}));
///
/// let roundtrip = codec.from_store(stored).unwrap();
/// assert_eq!(roundtrip, json!({"created_at": "2024-05-01T00:00:00Z"}));
/// ```
#[derive(Debug, Clone)]
pub struct TimestampFieldCodec {
    fields: BTreeSet<String>,
}

impl TimestampFieldCodec {
    /// Creates a codec transforming the named fields.
    #[must_use]
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { fields: fields.into_iter().map(Into::into).collect() }
    }
}

impl ValueCodec for TimestampFieldCodec {
    fn to_store(&self, mut value: Value) -> StoreResult<Value> {
        let Some(map) = value.as_object_mut() else {
            return Ok(value);
        };
        for field in &self.fields {
            let Some(entry) = map.get_mut(field) else { continue };
            match entry {
                Value::Null => {},
                Value::String(text) => {
                    let parsed: DateTime<Utc> = text.parse().map_err(|e| {
                        StoreError::invalid_data(format!(
                            "field '{field}' is not an RFC 3339 date: {e}"
                        ))
                    })?;
                    *entry = Value::from(parsed.timestamp_millis());
                },
                other => {
                    return Err(StoreError::invalid_data(format!(
                        "field '{field}' must be a date string, got {other}"
                    )));
                },
            }
        }
        Ok(value)
    }

    fn from_store(&self, mut value: Value) -> StoreResult<Value> {
        let Some(map) = value.as_object_mut() else {
            return Ok(value);
        };
        for field in &self.fields {
            let Some(entry) = map.get_mut(field) else { continue };
            match entry {
                Value::Null => {},
                Value::Number(n) => {
                    let millis = n.as_i64().ok_or_else(|| {
                        StoreError::consistency(format!(
                            "field '{field}' holds a non-integer timestamp"
                        ))
                    })?;
                    let instant = Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
                        StoreError::consistency(format!(
                            "field '{field}' holds an out-of-range timestamp {millis}"
                        ))
                    })?;
                    *entry = Value::String(
                        instant.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                    );
                },
                other => {
                    return Err(StoreError::consistency(format!(
                        "field '{field}' should hold a stored timestamp, got {other}"
                    )));
                },
            }
        }
        Ok(value)
    }
}

/// Converts named fields between an array of `id`-tagged objects
/// (application shape) and an object keyed by that id (store shape) — the
/// tree backend's natural layout for lists.
///
/// `from_store` emits the array sorted by key, so the round trip is stable.
///
/// # Example
///
/// ```
/// use duostore_core::{KeyedListCodec, ValueCodec};
/// use serde_json::json;
///
/// let codec = KeyedListCodec::new(["phones"]);
/// let app = json!({"phones": [{"id": "home", "number": "1"}]});
/// let stored = codec.to_store(app.clone()).unwrap();
/// assert_eq!(stored, json!({"phones": {"home": {"number": "1"}}}));
/// assert_eq!(codec.from_store(stored).unwrap(), app);
/// ```
#[derive(Debug, Clone)]
pub struct KeyedListCodec {
    fields: BTreeSet<String>,
}

impl KeyedListCodec {
    /// Creates a codec transforming the named fields.
    #[must_use]
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { fields: fields.into_iter().map(Into::into).collect() }
    }
}

impl ValueCodec for KeyedListCodec {
    fn to_store(&self, mut value: Value) -> StoreResult<Value> {
        let Some(map) = value.as_object_mut() else {
            return Ok(value);
        };
        for field in &self.fields {
            let Some(entry) = map.get_mut(field) else { continue };
            match entry.take() {
                Value::Null => {
                    *entry = Value::Null;
                },
                Value::Array(items) => {
                    let mut keyed = Map::new();
                    for item in items {
                        let Value::Object(mut obj) = item else {
                            return Err(StoreError::invalid_data(format!(
                                "field '{field}' must contain objects"
                            )));
                        };
                        let Some(Value::String(key)) = obj.remove("id") else {
                            return Err(StoreError::invalid_data(format!(
                                "field '{field}' items require a string 'id'"
                            )));
                        };
                        if keyed.insert(key.clone(), Value::Object(obj)).is_some() {
                            return Err(StoreError::invalid_data(format!(
                                "field '{field}' has duplicate item id '{key}'"
                            )));
                        }
                    }
                    *entry = Value::Object(keyed);
                },
                other => {
                    return Err(StoreError::invalid_data(format!(
                        "field '{field}' must be an array, got {other}"
                    )));
                },
            }
        }
        Ok(value)
    }

    fn from_store(&self, mut value: Value) -> StoreResult<Value> {
        let Some(map) = value.as_object_mut() else {
            return Ok(value);
        };
        for field in &self.fields {
            let Some(entry) = map.get_mut(field) else { continue };
            match entry.take() {
                Value::Null => {
                    *entry = Value::Null;
                },
                // BTreeMap-backed serde_json maps iterate in key order, but
                // preserve_order builds do not, so sort explicitly.
                Value::Object(keyed) => {
                    let mut items: Vec<(String, Value)> = keyed.into_iter().collect();
                    items.sort_by(|(a, _), (b, _)| a.cmp(b));
                    let mut list = Vec::with_capacity(items.len());
                    for (key, item) in items {
                        let Value::Object(mut obj) = item else {
                            return Err(StoreError::consistency(format!(
                                "field '{field}' entry '{key}' is not an object"
                            )));
                        };
                        obj.insert("id".to_owned(), Value::String(key));
                        list.push(Value::Object(obj));
                    }
                    *entry = Value::Array(list);
                },
                other => {
                    return Err(StoreError::consistency(format!(
                        "field '{field}' should hold a keyed map, got {other}"
                    )));
                },
            }
        }
        Ok(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn identity_is_a_no_op() {
        let codec = IdentityCodec;
        let value = json!({"a": [1, {"b": null}]});
        assert_eq!(codec.to_store(value.clone()).unwrap(), value);
        assert_eq!(codec.from_store(value.clone()).unwrap(), value);
    }

    #[test]
    fn timestamp_round_trip() {
        let codec = TimestampFieldCodec::new(["at"]);
        let app = json!({"at": "2023-11-05T06:07:08Z", "other": "kept"});
        let stored = codec.to_store(app.clone()).unwrap();
        assert!(stored["at"].is_i64());
        assert_eq!(stored["other"], "kept");
        assert_eq!(codec.from_store(stored).unwrap(), app);
    }

    #[test]
    fn timestamp_rejects_bad_date_as_invalid_data() {
        let codec = TimestampFieldCodec::new(["at"]);
        let err = codec.to_store(json!({"at": "yesterday"})).unwrap_err();
        assert_eq!(err.code(), "INVALID_DATA");
    }

    #[test]
    fn timestamp_read_side_failure_is_consistency() {
        let codec = TimestampFieldCodec::new(["at"]);
        let err = codec.from_store(json!({"at": "not-millis"})).unwrap_err();
        assert_eq!(err.code(), "DATABASE_CONSISTENCY");
    }

    #[test]
    fn timestamp_skips_null_and_absent_fields() {
        let codec = TimestampFieldCodec::new(["at"]);
        let value = json!({"at": null});
        assert_eq!(codec.to_store(value.clone()).unwrap(), value);
        assert_eq!(codec.to_store(json!({})).unwrap(), json!({}));
    }

    #[test]
    fn keyed_list_round_trip_sorted_by_key() {
        let codec = KeyedListCodec::new(["phones"]);
        let app = json!({"phones": [
            {"id": "home", "number": "1"},
            {"id": "work", "number": "2"},
        ]});
        let stored = codec.to_store(app.clone()).unwrap();
        assert_eq!(
            stored,
            json!({"phones": {"home": {"number": "1"}, "work": {"number": "2"}}})
        );
        assert_eq!(codec.from_store(stored).unwrap(), app);
    }

    #[test]
    fn keyed_list_rejects_missing_and_duplicate_ids() {
        let codec = KeyedListCodec::new(["phones"]);
        let err = codec.to_store(json!({"phones": [{"number": "1"}]})).unwrap_err();
        assert_eq!(err.code(), "INVALID_DATA");

        let err = codec
            .to_store(json!({"phones": [{"id": "a"}, {"id": "a"}]}))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_DATA");
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// Any epoch-second-aligned instant survives the date round trip.
            #[test]
            fn timestamp_round_trips(seconds in 0i64..4_102_444_800) {
                let codec = TimestampFieldCodec::new(["at"]);
                let instant = Utc.timestamp_opt(seconds, 0).single().expect("in range");
                let app = json!({"at": instant.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)});
                let stored = codec.to_store(app.clone()).unwrap();
                prop_assert_eq!(codec.from_store(stored).unwrap(), app);
            }

            /// Keyed lists round-trip for arbitrary unique ids.
            #[test]
            fn keyed_list_round_trips(ids in proptest::collection::btree_set("[a-z]{1,8}", 0..10)) {
                let codec = KeyedListCodec::new(["items"]);
                let list: Vec<Value> = ids
                    .iter()
                    .map(|id| json!({"id": id, "n": id.len()}))
                    .collect();
                let app = json!({"items": list});
                let stored = codec.to_store(app.clone()).unwrap();
                prop_assert_eq!(codec.from_store(stored).unwrap(), app);
            }
        }
    }
}
