//! Field overlay of an incoming resource onto the stored one.
//!
//! Incoming values win, members absent from the incoming document are kept.
//! Arrays of objects are merged item by item rather than replaced:
//!
//! - an item whose `id` ends with `-delete` removes the stored item with the
//!   bare id,
//! - an item equal to a stored item is skipped,
//! - an item whose `id` matches a stored item is overlaid onto it,
//! - an item with a `sequence` is inserted before the first stored item with a
//!   greater sequence,
//! - anything else is appended.
//!
//! Arrays of primitives are replaced wholesale.

use serde_json::{Map, Value};

const DELETE_SUFFIX: &str = "-delete";

/// Overlays `incoming` onto `current`.
#[must_use]
pub fn overlay(current: &Value, incoming: &Value) -> Value {
    if current == incoming {
        return current.clone();
    }
    match (current, incoming) {
        (Value::Null, _) => incoming.clone(),
        (_, Value::Null) => current.clone(),
        (Value::Object(a), Value::Object(b)) => Value::Object(overlay_objects(a, b)),
        (Value::Array(a), Value::Array(b)) => Value::Array(overlay_arrays(a, b)),
        _ => incoming.clone(),
    }
}

fn overlay_objects(current: &Map<String, Value>, incoming: &Map<String, Value>) -> Map<String, Value> {
    let mut out = current.clone();
    for (key, value) in incoming {
        let merged = match current.get(key) {
            Some(existing) => overlay(existing, value),
            None => value.clone(),
        };
        out.insert(key.clone(), merged);
    }
    out
}

fn item_id(item: &Value) -> Option<&str> {
    item.get("id").and_then(Value::as_str)
}

fn is_primitive_array(items: &[Value]) -> bool {
    items
        .first()
        .is_some_and(|first| !first.is_object() && !first.is_array())
}

fn sequence_of(item: &Value) -> Option<f64> {
    item.get("sequence").and_then(Value::as_f64)
}

fn overlay_arrays(current: &[Value], incoming: &[Value]) -> Vec<Value> {
    if is_primitive_array(current) && !incoming.is_empty() {
        return incoming.to_vec();
    }

    let deleted: Vec<&str> = incoming
        .iter()
        .filter_map(item_id)
        .filter_map(|id| id.strip_suffix(DELETE_SUFFIX))
        .collect();

    let mut result: Vec<Value> = current
        .iter()
        .filter(|item| item_id(item).map_or(true, |id| !deleted.contains(&id)))
        .cloned()
        .collect();

    for item in incoming {
        if item.is_null() || item_id(item).is_some_and(|id| id.ends_with(DELETE_SUFFIX)) {
            continue;
        }
        if result.iter().any(|existing| existing == item) {
            continue;
        }

        if let Some(id) = item_id(item) {
            if let Some(slot) = result.iter_mut().find(|existing| item_id(existing) == Some(id)) {
                *slot = overlay(slot, item);
                continue;
            }
        }

        match sequence_of(item) {
            Some(sequence) => {
                let position = result
                    .iter()
                    .position(|existing| sequence_of(existing).is_some_and(|s| s > sequence))
                    .unwrap_or(result.len());
                result.insert(position, item.clone());
            }
            None => result.push(item.clone()),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_incoming_wins_and_absent_members_are_kept() {
        let current = json!({"a": 1, "b": {"c": 2, "d": 3}});
        let incoming = json!({"a": 5, "b": {"c": 4}});
        assert_eq!(overlay(&current, &incoming), json!({"a": 5, "b": {"c": 4, "d": 3}}));
    }

    #[test]
    fn test_null_yields_other_side() {
        assert_eq!(overlay(&json!(null), &json!({"a": 1})), json!({"a": 1}));
        assert_eq!(overlay(&json!({"a": 1}), &json!({"a": null})), json!({"a": 1}));
    }

    #[test]
    fn test_primitive_arrays_are_replaced() {
        let current = json!({"given": ["A", "B"]});
        let incoming = json!({"given": ["C"]});
        assert_eq!(overlay(&current, &incoming), json!({"given": ["C"]}));
    }

    #[test]
    fn test_object_arrays_merge_by_id() {
        let current = json!({"identifier": [{"id": "1", "value": "x", "system": "s"}]});
        let incoming = json!({"identifier": [{"id": "1", "value": "y"}, {"id": "2", "value": "z"}]});
        assert_eq!(
            overlay(&current, &incoming),
            json!({"identifier": [
                {"id": "1", "value": "y", "system": "s"},
                {"id": "2", "value": "z"}
            ]})
        );
    }

    #[test]
    fn test_equal_items_are_not_duplicated() {
        let current = json!([{"family": "Doe"}]);
        let incoming = json!([{"family": "Doe"}, {"family": "Roe"}]);
        assert_eq!(overlay(&current, &incoming), json!([{"family": "Doe"}, {"family": "Roe"}]));
    }

    #[test]
    fn test_delete_suffix_removes_item() {
        let current = json!([{"id": "1", "v": 1}, {"id": "2", "v": 2}]);
        let incoming = json!([{"id": "1-delete"}]);
        assert_eq!(overlay(&current, &incoming), json!([{"id": "2", "v": 2}]));
    }

    #[test]
    fn test_sequence_items_are_inserted_in_order() {
        let current = json!([{"sequence": 1}, {"sequence": 3}]);
        let incoming = json!([{"sequence": 2}, {"sequence": 9}]);
        assert_eq!(
            overlay(&current, &incoming),
            json!([{"sequence": 1}, {"sequence": 2}, {"sequence": 3}, {"sequence": 9}])
        );
    }

    #[test]
    fn test_scalar_type_change_takes_incoming() {
        assert_eq!(overlay(&json!({"a": [1]}), &json!({"a": "x"})), json!({"a": "x"}));
    }
}
