use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde_json::Value;

/// A document attribute value in index-key form: hashable and totally
/// ordered, unlike `serde_json::Value`. Ordering ranks by type first
/// (null < bool < number < string < array < object), then by value.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPart {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<KeyPart>),
    Object(Vec<(String, KeyPart)>),
}

impl KeyPart {
    pub fn from_value(value: &Value) -> KeyPart {
        match value {
            Value::Null => KeyPart::Null,
            Value::Bool(b) => KeyPart::Bool(*b),
            Value::Number(n) => KeyPart::Number(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => KeyPart::String(s.clone()),
            Value::Array(items) => KeyPart::Array(items.iter().map(KeyPart::from_value).collect()),
            Value::Object(map) => {
                // Object keys are sorted so equal objects compare equal
                // regardless of attribute order.
                let mut fields: Vec<(String, KeyPart)> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), KeyPart::from_value(v)))
                    .collect();
                fields.sort_by(|a, b| a.0.cmp(&b.0));
                KeyPart::Object(fields)
            }
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            KeyPart::Null => 0,
            KeyPart::Bool(_) => 1,
            KeyPart::Number(_) => 2,
            KeyPart::String(_) => 3,
            KeyPart::Array(_) => 4,
            KeyPart::Object(_) => 5,
        }
    }
}

impl Eq for KeyPart {}

impl Hash for KeyPart {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            KeyPart::Null => {}
            KeyPart::Bool(b) => b.hash(state),
            KeyPart::Number(n) => {
                // Normalize -0.0 so it hashes like 0.0.
                let n = if *n == 0.0 { 0.0 } else { *n };
                n.to_bits().hash(state);
            }
            KeyPart::String(s) => s.hash(state),
            KeyPart::Array(items) => items.hash(state),
            KeyPart::Object(fields) => fields.hash(state),
        }
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &KeyPart) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &KeyPart) -> Ordering {
        match (self, other) {
            (KeyPart::Null, KeyPart::Null) => Ordering::Equal,
            (KeyPart::Bool(a), KeyPart::Bool(b)) => a.cmp(b),
            (KeyPart::Number(a), KeyPart::Number(b)) => a.total_cmp(b),
            (KeyPart::String(a), KeyPart::String(b)) => a.cmp(b),
            (KeyPart::Array(a), KeyPart::Array(b)) => a.cmp(b),
            (KeyPart::Object(a), KeyPart::Object(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

/// Resolve a dotted attribute path (`"a.b.c"`) against a document.
pub fn lookup_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Extract the composite key for `fields`. Sparse indexes skip documents
/// that lack any component (absent or null); non-sparse indexes substitute
/// `Null`.
pub fn extract_key(document: &Value, fields: &[String], sparse: bool) -> Option<Vec<KeyPart>> {
    let mut parts = Vec::with_capacity(fields.len());
    for field in fields {
        match lookup_path(document, field) {
            Some(Value::Null) | None if sparse => return None,
            Some(value) => parts.push(KeyPart::from_value(value)),
            None => parts.push(KeyPart::Null),
        }
    }
    Some(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_lookup_descends_objects() {
        let doc = json!({ "a": { "b": { "c": 3 } } });
        assert_eq!(lookup_path(&doc, "a.b.c"), Some(&json!(3)));
        assert_eq!(lookup_path(&doc, "a.x"), None);
    }

    #[test]
    fn sparse_extraction_skips_missing_and_null() {
        let fields = vec!["a".to_string(), "b".to_string()];
        let full = json!({ "a": 1, "b": 2 });
        let partial = json!({ "a": 1 });
        let nulled = json!({ "a": 1, "b": null });

        assert!(extract_key(&full, &fields, true).is_some());
        assert!(extract_key(&partial, &fields, true).is_none());
        assert!(extract_key(&nulled, &fields, true).is_none());

        let key = extract_key(&partial, &fields, false).unwrap();
        assert_eq!(key[1], KeyPart::Null);
    }

    #[test]
    fn ordering_ranks_types_then_values() {
        let mut parts = vec![
            KeyPart::String("a".into()),
            KeyPart::Number(2.0),
            KeyPart::Null,
            KeyPart::Number(-1.0),
            KeyPart::Bool(true),
        ];
        parts.sort();
        assert_eq!(
            parts,
            vec![
                KeyPart::Null,
                KeyPart::Bool(true),
                KeyPart::Number(-1.0),
                KeyPart::Number(2.0),
                KeyPart::String("a".into()),
            ]
        );
    }

    #[test]
    fn equal_objects_hash_equal_regardless_of_attribute_order() {
        let a = KeyPart::from_value(&json!({ "x": 1, "y": 2 }));
        let b = KeyPart::from_value(&json!({ "y": 2, "x": 1 }));
        assert_eq!(a, b);
    }
}
