//! Generic helpers over JSON values.
//!
//! Deep merge, freezing and dot-path access operate on `serde_json::Value`,
//! the closed object/array/scalar variant type shared by every persisted
//! structure in the crate.

use std::ops::Deref;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{AppError, AppResult};

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Remove duplicates from a list of values, keeping the first occurrence.
pub fn array_unique(values: Vec<Value>) -> Vec<Value> {
    let mut unique: Vec<Value> = Vec::with_capacity(values.len());
    for value in values {
        if !unique.contains(&value) {
            unique.push(value);
        }
    }
    unique
}

/// Deep merge `incoming` over `base`.
///
/// Objects merge key by key, arrays are unioned without duplicates, and
/// anything else (including a type mismatch) takes the incoming value.
pub fn deep_merge(base: &Value, incoming: &Value) -> Value {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in incoming_map {
                let next = match merged.get(key) {
                    Some(existing) if same_container(existing, value) => deep_merge(existing, value),
                    _ => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (Value::Array(base_items), Value::Array(incoming_items)) => {
            let mut items = base_items.clone();
            items.extend(incoming_items.iter().cloned());
            Value::Array(array_unique(items))
        }
        _ => incoming.clone(),
    }
}

/// Lay `incoming` over `base`: objects merge key by key, everything else
/// (arrays included) is replaced by the incoming value. Keys only `base`
/// has are kept.
pub fn overlay(base: &Value, incoming: &Value) -> Value {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in incoming_map {
                let next = match merged.get(key) {
                    Some(existing) => overlay(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        _ => incoming.clone(),
    }
}

fn same_container(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Object(_), Value::Object(_)) | (Value::Array(_), Value::Array(_))
    )
}

/// Recursively immutable snapshot shared between many readers.
///
/// The only way to change a frozen value is to [`thaw`](Frozen::thaw) a copy,
/// mutate it and freeze the result again.
#[derive(Debug)]
pub struct Frozen<T>(Arc<T>);

impl<T> Frozen<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Whether two handles point at the same snapshot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone> Frozen<T> {
    /// Deep, mutable copy of the snapshot.
    pub fn thaw(&self) -> T {
        T::clone(&self.0)
    }
}

impl<T> Clone for Frozen<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Deref for Frozen<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: PartialEq> PartialEq for Frozen<T> {
    fn eq(&self, other: &Self) -> bool {
        *self.0 == *other.0
    }
}

impl<T: Serialize> Serialize for Frozen<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// Freeze a value so it can be shared read-only.
pub fn deep_freeze<T>(value: T) -> Frozen<T> {
    Frozen::new(value)
}

/// Look up a child of a container value by a single path segment.
fn child<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

/// Read a property using dot notation.
///
/// Returns `Ok(None)` as soon as a segment is missing. Traversing through an
/// existing value that is not an object is a [`AppError::Path`] error.
pub fn obj_property_get_deep<'a>(obj: &'a Value, key: &str) -> AppResult<Option<&'a Value>> {
    let segments: Vec<&str> = key.split('.').collect();
    let (last, prefix) = segments
        .split_last()
        .ok_or_else(|| AppError::Path("Empty property path".to_string()))?;

    let mut current = obj;
    for segment in prefix {
        if !is_container(current) {
            return Err(AppError::Path(format!(
                "Prefix {} in {} is not an object",
                segment, key
            )));
        }
        match child(current, segment) {
            None => return Ok(None),
            Some(next) if !is_container(next) => {
                return Err(AppError::Path(format!(
                    "Prefix {} in {} is not an object",
                    segment, key
                )));
            }
            Some(next) => current = next,
        }
    }

    if !is_container(current) {
        return Err(AppError::Path(format!("{} does not address an object", key)));
    }
    Ok(child(current, last))
}

/// Read a property using dot notation, returning `default` when it is missing.
pub fn obj_property_get_deep_or(obj: &Value, key: &str, default: Value) -> AppResult<Value> {
    Ok(obj_property_get_deep(obj, key)?
        .cloned()
        .unwrap_or(default))
}

/// Write a property using dot notation.
///
/// Missing intermediate segments are created as empty objects unless
/// `throw_if_prefix_not_found` is set. An existing intermediate segment that
/// is not an object is always an error.
pub fn obj_property_set_deep(
    obj: &mut Value,
    key: &str,
    value: Value,
    throw_if_prefix_not_found: bool,
) -> AppResult<()> {
    let segments: Vec<&str> = key.split('.').collect();
    let (last, prefix) = segments
        .split_last()
        .ok_or_else(|| AppError::Path("Empty property path".to_string()))?;

    let mut current = obj;
    for segment in prefix {
        let map = match current {
            Value::Object(map) => map,
            _ => {
                return Err(AppError::Path(format!(
                    "Prefix {} in {} is not an object",
                    segment, key
                )))
            }
        };
        if throw_if_prefix_not_found && !map.contains_key(*segment) {
            return Err(AppError::Path(format!(
                "Prefix {} not found in {}",
                segment, key
            )));
        }
        let next = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !next.is_object() {
            return Err(AppError::Path(format!(
                "Prefix {} in {} is not an object",
                segment, key
            )));
        }
        current = next;
    }

    match current {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        _ => Err(AppError::Path(format!("{} does not address an object", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_array_unique_keeps_first_occurrence() {
        let values = vec![json!("a"), json!("b"), json!("a"), json!(1), json!(1)];
        assert_eq!(array_unique(values), vec![json!("a"), json!("b"), json!(1)]);
    }

    #[test]
    fn test_deep_merge_objects_arrays_and_scalars() {
        let defaults = json!({
            "general": { "topPagination": true, "hideKeywords": ["a"], "uuid": null },
            "discord": { "active": false }
        });
        let stored = json!({
            "general": { "topPagination": false, "hideKeywords": ["a", "b"], "uuid": "xyz" },
            "extra": 5
        });

        let merged = deep_merge(&defaults, &stored);
        assert_eq!(
            merged,
            json!({
                "general": { "topPagination": false, "hideKeywords": ["a", "b"], "uuid": "xyz" },
                "discord": { "active": false },
                "extra": 5
            })
        );
    }

    #[test]
    fn test_deep_merge_type_mismatch_takes_incoming() {
        let merged = deep_merge(&json!({ "a": { "b": 1 } }), &json!({ "a": [1, 2] }));
        assert_eq!(merged, json!({ "a": [1, 2] }));
        assert_eq!(deep_merge(&json!([1]), &json!("x")), json!("x"));
    }

    #[test]
    fn test_deep_merge_does_not_touch_inputs() {
        let base = json!({ "a": { "b": 1 } });
        let incoming = json!({ "a": { "c": 2 } });
        let _ = deep_merge(&base, &incoming);
        assert_eq!(base, json!({ "a": { "b": 1 } }));
    }

    #[test]
    fn test_overlay_replaces_arrays_and_keeps_extra_keys() {
        let base = json!({ "a": { "list": [1, 2], "keep": true }, "extra": "x" });
        let incoming = json!({ "a": { "list": [2] }, "b": null });
        assert_eq!(
            overlay(&base, &incoming),
            json!({ "a": { "list": [2], "keep": true }, "extra": "x", "b": null })
        );
    }

    #[test]
    fn test_frozen_thaw_is_independent() {
        let frozen = deep_freeze(json!({ "a": 1 }));
        let mut copy = frozen.thaw();
        copy["a"] = json!(2);
        assert_eq!(frozen["a"], json!(1));
        assert!(frozen.ptr_eq(&frozen.clone()));
    }

    #[test]
    fn test_get_deep() {
        let obj = json!({ "discord": { "guid": "abc", "active": true }, "list": [{ "x": 1 }] });
        assert_eq!(
            obj_property_get_deep(&obj, "discord.guid").unwrap(),
            Some(&json!("abc"))
        );
        assert_eq!(obj_property_get_deep(&obj, "list.0.x").unwrap(), Some(&json!(1)));
        assert_eq!(obj_property_get_deep(&obj, "missing.deeper.key").unwrap(), None);
        assert_eq!(
            obj_property_get_deep_or(&obj, "missing.key", json!("dflt")).unwrap(),
            json!("dflt")
        );
    }

    #[test]
    fn test_get_deep_through_scalar_is_error() {
        let obj = json!({ "discord": { "guid": "abc" } });
        let err = obj_property_get_deep(&obj, "discord.guid.value").unwrap_err();
        assert!(matches!(err, AppError::Path(_)));
    }

    #[test]
    fn test_set_deep_creates_prefixes() {
        let mut obj = json!({});
        obj_property_set_deep(&mut obj, "a.b.c", json!(3), false).unwrap();
        assert_eq!(obj, json!({ "a": { "b": { "c": 3 } } }));
    }

    #[test]
    fn test_set_deep_strict_prefix() {
        let mut obj = json!({ "a": {} });
        let err = obj_property_set_deep(&mut obj, "a.b.c", json!(3), true).unwrap_err();
        assert!(matches!(err, AppError::Path(_)));
        assert_eq!(obj, json!({ "a": {} }));

        obj_property_set_deep(&mut obj, "a.b", json!(1), true).unwrap();
        assert_eq!(obj, json!({ "a": { "b": 1 } }));
    }

    #[test]
    fn test_set_deep_through_scalar_is_error() {
        let mut obj = json!({ "a": 1 });
        assert!(obj_property_set_deep(&mut obj, "a.b", json!(2), false).is_err());
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let mut obj = json!({ "general": { "hideKeywords": [] } });
        let value = json!({ "nested": [1, 2, { "deep": true }] });
        obj_property_set_deep(&mut obj, "general.filters.custom", value.clone(), false).unwrap();
        assert_eq!(
            obj_property_get_deep(&obj, "general.filters.custom").unwrap(),
            Some(&value)
        );
    }
}
