//! # Object Merger
//!
//! Deep-merges free-form configuration fragments (JSON trees) into a target
//! tree. Definitions express incremental edits with three spellings on top of
//! plain overwrite: a `remove:KEY` key deletes values, a `prepend:KEY` key
//! inserts list values at the head, and a `null` value drops the target key.
//! List values accumulate; scalar string targets are promoted to lists when a
//! list arrives. A string carrying the BEL sentinel is pre-split into a list,
//! which is how list-valued template resolutions survive string render sites.

use crate::constants::LIST_SENTINEL;
use serde_json::Value;

/// Merges `source` into `target`, mutating `target` in place.
///
/// Key-level precedence, highest first: `remove:` keys, `prepend:` keys,
/// explicit `null` (delete), lists (append/prepend), maps (recurse), scalars
/// (overwrite). A list element already present in the target (deep equality)
/// is not inserted again, so merging the same source twice is a no-op;
/// duplicates already present in the target are left alone.
pub fn merge(target: &mut Value, source: &Value) {
    let Some(source_map) = source.as_object() else {
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }

    for (key, source_value) in source_map {
        if let Some(field) = key.strip_prefix("remove:") {
            remove_values(target, field, source_value);
        } else if let Some(field) = key.strip_prefix("prepend:") {
            merge_key(target, field, source_value, true);
        } else {
            merge_key(target, key, source_value, false);
        }
    }
}

fn merge_key(target: &mut Value, key: &str, source_value: &Value, prepend: bool) {
    let map = target.as_object_mut().expect("target coerced to object");

    match source_value {
        Value::Null => {
            map.remove(key);
        }
        Value::Array(items) => {
            merge_list(map, key, items, prepend);
        }
        Value::String(s) if s.contains(LIST_SENTINEL) => {
            let items: Vec<Value> = s
                .split(LIST_SENTINEL)
                .filter(|part| !part.is_empty())
                .map(|part| Value::String(part.to_string()))
                .collect();
            merge_list(map, key, &items, prepend);
        }
        Value::Object(_) => {
            let slot = map.entry(key.to_string()).or_insert(Value::Null);
            if !slot.is_object() {
                *slot = Value::Object(Default::default());
            }
            merge(slot, source_value);
        }
        other => {
            map.insert(key.to_string(), other.clone());
        }
    }
}

/// Appends (or prepends) `items` to the list at `key`, promoting a scalar
/// string target to a one-element list first. Elements carrying the BEL
/// sentinel are expanded in place; elements already present are skipped.
fn merge_list(
    map: &mut serde_json::Map<String, Value>,
    key: &str,
    items: &[Value],
    prepend: bool,
) {
    let slot = map.entry(key.to_string()).or_insert_with(|| Value::Array(Vec::new()));
    if let Value::String(existing) = slot {
        let promoted = std::mem::take(existing);
        *slot = Value::Array(vec![Value::String(promoted)]);
    } else if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    let list = slot.as_array_mut().expect("slot coerced to array");

    let mut incoming: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(s) if s.contains(LIST_SENTINEL) => {
                for part in s.split(LIST_SENTINEL).filter(|part| !part.is_empty()) {
                    incoming.push(Value::String(part.to_string()));
                }
            }
            other => incoming.push(other.clone()),
        }
    }
    incoming.retain(|item| !list.contains(item));
    incoming.dedup();

    if prepend {
        for (offset, item) in incoming.into_iter().enumerate() {
            list.insert(offset, item);
        }
    } else {
        list.extend(incoming);
    }
}

/// Handles a `remove:KEY` directive: drops matching elements from a list
/// target, or the whole key when the target is a scalar in the removal set
/// (or the directive value is `null`).
fn remove_values(target: &mut Value, key: &str, removal: &Value) {
    let Some(map) = target.as_object_mut() else {
        return;
    };
    if removal.is_null() {
        map.remove(key);
        return;
    }

    let removal_set: Vec<&Value> = match removal {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };

    if let Some(Value::Array(list)) = map.get_mut(key) {
        list.retain(|item| !removal_set.contains(&item));
        return;
    }
    if map
        .get(key)
        .map(|scalar| removal_set.contains(&scalar))
        .unwrap_or(false)
    {
        map.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_overwrites_and_map_recurses() {
        let mut target = json!({ "standard": "C++14", "include": { "paths": ["/a"] } });
        merge(
            &mut target,
            &json!({ "standard": "C++17", "include": { "paths": ["/b"] } }),
        );
        assert_eq!(target["standard"], "C++17");
        assert_eq!(target["include"]["paths"], json!(["/a", "/b"]));
    }

    #[test]
    fn test_null_deletes_key() {
        let mut target = json!({ "version": "1.0", "bits": 64 });
        merge(&mut target, &json!({ "version": null }));
        assert!(target.get("version").is_none());
        assert_eq!(target["bits"], 64);
    }

    #[test]
    fn test_scalar_string_promoted_to_list() {
        let mut target = json!({ "forcedIncludeFiles": "/pre.h" });
        merge(&mut target, &json!({ "forcedIncludeFiles": ["/extra.h"] }));
        assert_eq!(target["forcedIncludeFiles"], json!(["/pre.h", "/extra.h"]));
    }

    #[test]
    fn test_prepend_inserts_at_head_in_source_order() {
        let mut target = json!({ "parserArguments": ["-c"] });
        merge(&mut target, &json!({ "prepend:parserArguments": ["-a", "-b"] }));
        assert_eq!(target["parserArguments"], json!(["-a", "-b", "-c"]));
    }

    #[test]
    fn test_remove_list_element_and_scalar_key() {
        let mut target = json!({ "paths": ["/a", "/b", "/c"], "language": "c" });
        merge(
            &mut target,
            &json!({ "remove:paths": ["/b"], "remove:language": "c" }),
        );
        assert_eq!(target["paths"], json!(["/a", "/c"]));
        assert!(target.get("language").is_none());
    }

    #[test]
    fn test_sentinel_string_splits_into_list() {
        let mut target = json!({});
        merge(
            &mut target,
            &json!({ "paths": format!("/a{sep}/b{sep}/c", sep = LIST_SENTINEL) }),
        );
        assert_eq!(target["paths"], json!(["/a", "/b", "/c"]));
    }

    #[test]
    fn test_merge_is_idempotent_on_plain_sources() {
        let source = json!({
            "macros": { "X": "1" },
            "include": { "paths": ["/a", "/b"] },
            "standard": "C11"
        });
        let mut once = json!({ "include": { "paths": ["/z"] } });
        merge(&mut once, &source);
        let mut twice = once.clone();
        merge(&mut twice, &source);
        assert_eq!(once, twice);
    }
}
