//! Line deserializer.

use crate::error::CodecResult;
use crate::value::Value;
use std::collections::BTreeMap;

/// Deserialize one line of JSON text into a value.
///
/// This is the inverse of [`serialize`](crate::serialize): an object of the
/// exact shape `{"$$date": n}` rehydrates into a `Date`. Any other key that
/// merely looks reserved passes through untouched — it is data.
///
/// # Errors
///
/// Returns a parse error if the line is not valid JSON.
pub fn deserialize(line: &str) -> CodecResult<Value> {
    let json: serde_json::Value = serde_json::from_str(line)?;
    Ok(from_json(json))
}

#[allow(clippy::cast_possible_truncation)]
fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(from_json).collect())
        }
        serde_json::Value::Object(map) => {
            if map.len() == 1 {
                if let Some(ms) = map.get("$$date").and_then(serde_json::Value::as_f64) {
                    return Value::Date(ms as i64);
                }
            }
            let mut out = BTreeMap::new();
            for (k, v) in map {
                out.insert(k, from_json(v));
            }
            Value::Object(out)
        }
    }
}
