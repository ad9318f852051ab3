//! JSON Merge Patch (RFC 7396).

use serde_json::{Map, Value};

/// Apply `patch` to `target` in place.
///
/// An object patch merges key by key: `null` deletes the key, any other value
/// is merged recursively. A non-object patch replaces the target wholesale.
/// A non-object target is replaced by an empty object before an object patch
/// is merged into it.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(map) = target else {
        return;
    };

    for (key, value) in patch {
        if value.is_null() {
            map.remove(key);
        } else {
            merge_patch(map.entry(key.as_str()).or_insert(Value::Null), value);
        }
    }
}

/// The merge patch that turns `old` into `new`, or `None` when they are
/// equal.
///
/// Object members missing from `new` become `null`. `new` must not itself
/// contain `null` members, which a merge patch cannot express.
pub fn merge_diff(old: &Value, new: &Value) -> Option<Value> {
    if old == new {
        return None;
    }
    let (Value::Object(old), Value::Object(new)) = (old, new) else {
        return Some(new.clone());
    };

    let mut patch = Map::new();
    for key in old.keys() {
        if !new.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }
    for (key, value) in new {
        match old.get(key) {
            Some(previous) => {
                if let Some(changed) = merge_diff(previous, value) {
                    patch.insert(key.clone(), changed);
                }
            }
            None => {
                patch.insert(key.clone(), value.clone());
            }
        }
    }
    Some(Value::Object(patch))
}
