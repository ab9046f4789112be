//! Dot-path access into nested values.

use crate::value::Value;

/// Resolve a dot-path against a value.
///
/// The path is split on `.` and each segment descends one level. At an
/// object, the segment names a field. At an array, a segment that parses as
/// a non-negative integer indexes the element; any other segment maps the
/// remaining path across all elements and collects the results into an
/// array. A missing path yields `Undefined`.
///
/// ```
/// use quill_codec::{dot_get, Value};
///
/// let doc = Value::object(vec![(
///     "planets",
///     Value::Array(vec![
///         Value::object(vec![("name", Value::from("Earth"))]),
///         Value::object(vec![("name", Value::from("Mars"))]),
///     ]),
/// )]);
///
/// assert_eq!(
///     dot_get(&doc, "planets.name"),
///     Value::Array(vec![Value::from("Earth"), Value::from("Mars")])
/// );
/// assert_eq!(
///     dot_get(&doc, "planets.1"),
///     Value::object(vec![("name", Value::from("Mars"))])
/// );
/// ```
pub fn dot_get(value: &Value, path: &str) -> Value {
    let parts: Vec<&str> = path.split('.').collect();
    dot_get_parts(value, &parts)
}

fn dot_get_parts(value: &Value, parts: &[&str]) -> Value {
    let Some((head, rest)) = parts.split_first() else {
        return value.clone();
    };

    match value {
        Value::Object(map) => match map.get(*head) {
            Some(child) => dot_get_parts(child, rest),
            None => Value::Undefined,
        },
        Value::Array(items) => {
            if let Ok(idx) = head.parse::<usize>() {
                match items.get(idx) {
                    Some(child) => dot_get_parts(child, rest),
                    None => Value::Undefined,
                }
            } else {
                // Non-index segment: project the full remaining path across
                // every element.
                Value::Array(items.iter().map(|el| dot_get_parts(el, parts)).collect())
            }
        }
        _ => Value::Undefined,
    }
}
