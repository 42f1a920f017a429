use serde_json::{Map, Value};

use crate::core::types::{ATTR_ID, ATTR_KEY, ATTR_REV};

fn is_system_attribute(key: &str) -> bool {
    key == ATTR_ID || key == ATTR_KEY || key == ATTR_REV
}

/// Merge `new_value` into `old_value` for an update.
///
/// For each attribute of the old object except `_rev`: keep it if the new
/// object lacks it; recurse if `merge_objects` and both sides are objects;
/// otherwise take the new value. `null` drops the attribute when
/// `keep_null` is false. Attributes only present in the new object are
/// appended under the same null rule. `_id` and `_key` always come from the
/// old object; `rev` becomes the new `_rev`.
pub fn merge_objects_for_update(
    old_value: &Value,
    new_value: &Value,
    rev: &str,
    merge_objects: bool,
    keep_null: bool,
) -> Value {
    let empty = Map::new();
    let old = old_value.as_object().unwrap_or(&empty);

    // New-side attributes, minus the system ones the caller cannot override.
    let mut pending: Map<String, Value> = new_value
        .as_object()
        .map(|map| {
            map.iter()
                .filter(|(key, _)| !is_system_attribute(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default();

    let mut out = Map::new();

    for (key, old_attr) in old {
        if key == ATTR_REV {
            continue;
        }
        match pending.remove(key) {
            None => {
                out.insert(key.clone(), old_attr.clone());
            }
            Some(new_attr) => {
                if merge_objects && old_attr.is_object() && new_attr.is_object() {
                    out.insert(
                        key.clone(),
                        merge_nested(old_attr, &new_attr, keep_null),
                    );
                } else if keep_null || !new_attr.is_null() {
                    out.insert(key.clone(), new_attr);
                }
            }
        }
    }

    // Attributes only present in the new object.
    for (key, new_attr) in pending {
        if keep_null || !new_attr.is_null() {
            out.insert(key, new_attr);
        }
    }

    out.insert(ATTR_REV.to_string(), Value::String(rev.to_string()));
    Value::Object(out)
}

fn merge_nested(old_value: &Value, new_value: &Value, keep_null: bool) -> Value {
    let empty = Map::new();
    let old = old_value.as_object().unwrap_or(&empty);
    let new = new_value.as_object().unwrap_or(&empty);

    let mut out = Map::new();
    for (key, old_attr) in old {
        match new.get(key) {
            None => {
                out.insert(key.clone(), old_attr.clone());
            }
            Some(new_attr) => {
                if old_attr.is_object() && new_attr.is_object() {
                    out.insert(key.clone(), merge_nested(old_attr, new_attr, keep_null));
                } else if keep_null || !new_attr.is_null() {
                    out.insert(key.clone(), new_attr.clone());
                }
            }
        }
    }
    for (key, new_attr) in new {
        if old.contains_key(key) {
            continue;
        }
        if keep_null || !new_attr.is_null() {
            out.insert(key.clone(), new_attr.clone());
        }
    }
    Value::Object(out)
}

/// Build the document for a replace: every non-system attribute comes from
/// the new object, `_id` and `_key` are preserved from the old one, and
/// `rev` becomes the new `_rev`.
pub fn new_object_for_replace(old_value: &Value, new_value: &Value, rev: &str) -> Value {
    let mut out = Map::new();

    if let Some(new) = new_value.as_object() {
        for (key, value) in new {
            if !is_system_attribute(key) {
                out.insert(key.clone(), value.clone());
            }
        }
    }

    if let Some(old) = old_value.as_object() {
        for attr in [ATTR_ID, ATTR_KEY] {
            if let Some(value) = old.get(attr) {
                out.insert(attr.to_string(), value.clone());
            }
        }
    }
    out.insert(ATTR_REV.to_string(), Value::String(rev.to_string()));
    Value::Object(out)
}
