//! Dot-separated field paths into JSON documents.
//!
//! A path such as `bid.0.price` walks object keys, and numeric segments
//! index arrays. An empty path addresses the document itself.

use serde_json::Value;

/// Resolve `path` against `value`.
pub fn value_at_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
        _ => None,
    })
}

/// Textual form of a scalar leaf: strings verbatim, numbers via their JSON text.
///
/// Objects, arrays, booleans and null have no numeric text.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
