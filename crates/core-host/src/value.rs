//! The opaque variables tree shared by the Flow Engine.
//!
//! Flow variables form an arbitrarily nested tree of scalars, sequences, and
//! mappings. `serde_json::Value` is already exactly that tagged sum, so we
//! reuse it directly rather than hand-roll an equivalent enum.

use serde_json::Value;

/// Resolve a dotted path (`"a.b.c"`) against a JSON value tree.
///
/// Lookups are total: an absent path resolves to `None` rather than
/// panicking. Sequence indices are supported as plain numeric segments
/// (`"items.0.name"`).
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => {
                current = map.get(segment)?;
            }
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                current = items.get(idx)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Set a dotted path, creating intermediate objects as needed. Existing
/// non-object intermediate values are overwritten with a fresh object, since
/// the variables tree has no schema to violate.
pub fn set_path(root: &mut Value, path: &str, new_value: Value) {
    if path.is_empty() {
        *root = new_value;
        return;
    }
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        let map = current.as_object_mut().expect("just coerced to object");
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(serde_json::Map::new());
    }
    let map = current.as_object_mut().expect("just coerced to object");
    map.insert(segments[segments.len() - 1].to_string(), new_value);
}

/// Coerce a value to `f64` for numeric condition operators. Returns `None`
/// (never panics) when the value has no sensible numeric reading.
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Coerce a value to a string for string-ish condition operators
/// (`contains`, `startsWith`, `endsWith`). `null` coerces to the empty
/// string so operators stay total.
pub fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
