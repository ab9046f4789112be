//! Line serializer.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Serialize a value to a single line of JSON text.
///
/// Dates are emitted as `{"$$date": ms}`. `Undefined` object fields are
/// omitted; `Undefined` array elements become `null`. Every object key is
/// validated during the walk: names starting with `$` or containing `.`
/// fail the operation, except for the four reserved persisted forms
/// (`$$date`, `$$deleted`, `$$indexCreated`, `$$indexRemoved`).
///
/// Newlines inside string values are escaped by the JSON writer, so the
/// output never spans more than one line.
///
/// # Errors
///
/// Returns [`CodecError::InvalidKey`] if a field name violates the rules.
pub fn serialize(value: &Value) -> CodecResult<String> {
    let json = to_json(value)?;
    // serde_json only fails on non-string map keys or trailing-data cases
    // that cannot arise from Value.
    Ok(serde_json::to_string(&json)?)
}

/// Validate a field name against the value it carries.
///
/// # Errors
///
/// Returns [`CodecError::InvalidKey`] unless the name is plain (no leading
/// `$`, no `.`) or one of the reserved persisted forms.
pub fn check_key(key: &str, value: &Value) -> CodecResult<()> {
    if key.starts_with('$') {
        let reserved = (key == "$$date" && matches!(value, Value::Number(_)))
            || (key == "$$deleted" && matches!(value, Value::Bool(true)))
            || key == "$$indexCreated"
            || key == "$$indexRemoved";
        if !reserved {
            return Err(CodecError::invalid_key(key));
        }
    }
    if key.contains('.') {
        return Err(CodecError::invalid_key(key));
    }
    Ok(())
}

/// Recursively validate every field name in a value.
///
/// Used after the modifier engine produces a new document and before a
/// document is accepted for insertion.
///
/// # Errors
///
/// Returns [`CodecError::InvalidKey`] on the first violating field.
pub fn check_object(value: &Value) -> CodecResult<()> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                check_key(key, child)?;
                check_object(child)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                check_object(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn to_json(value: &Value) -> CodecResult<serde_json::Value> {
    Ok(match value {
        // Undefined outside an object position serializes as null, matching
        // the behavior of JSON writers for absent values in sequences.
        Value::Undefined | Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => match serde_json::Number::from_f64(*n) {
            Some(num) => serde_json::Value::Number(num),
            // Non-finite numbers have no JSON form.
            None => serde_json::Value::Null,
        },
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Date(ms) => {
            let mut obj = serde_json::Map::with_capacity(1);
            obj.insert("$$date".to_string(), serde_json::Value::from(*ms));
            serde_json::Value::Object(obj)
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(to_json(item)?);
            }
            serde_json::Value::Array(out)
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, child) in map {
                if child.is_undefined() {
                    continue;
                }
                check_key(key, child)?;
                out.insert(key.clone(), to_json(child)?);
            }
            serde_json::Value::Object(out)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_scalars() {
        assert_eq!(serialize(&Value::Null).unwrap(), "null");
        assert_eq!(serialize(&Value::Bool(true)).unwrap(), "true");
        assert_eq!(serialize(&Value::from("hi")).unwrap(), "\"hi\"");
    }

    #[test]
    fn serialize_date_as_reserved_form() {
        let doc = Value::object(vec![("at", Value::Date(1500))]);
        assert_eq!(serialize(&doc).unwrap(), r#"{"at":{"$$date":1500}}"#);
    }

    #[test]
    fn serialize_is_one_line() {
        let doc = Value::object(vec![("text", Value::from("line one\nline two"))]);
        let line = serialize(&doc).unwrap();
        assert!(!line.contains('\n'));
    }

    #[test]
    fn undefined_fields_are_omitted() {
        let doc = Value::object(vec![("keep", Value::Number(1.0)), ("drop", Value::Undefined)]);
        assert_eq!(serialize(&doc).unwrap(), r#"{"keep":1.0}"#);
    }

    #[test]
    fn undefined_array_elements_become_null() {
        let doc = Value::object(vec![(
            "xs",
            Value::Array(vec![Value::Number(1.0), Value::Undefined]),
        )]);
        assert_eq!(serialize(&doc).unwrap(), r#"{"xs":[1.0,null]}"#);
    }

    #[test]
    fn dollar_key_rejected() {
        let doc = Value::object(vec![("$set", Value::Number(1.0))]);
        assert!(matches!(
            serialize(&doc),
            Err(CodecError::InvalidKey { .. })
        ));
    }

    #[test]
    fn dotted_key_rejected() {
        let doc = Value::object(vec![("a.b", Value::Number(1.0))]);
        assert!(matches!(
            serialize(&doc),
            Err(CodecError::InvalidKey { .. })
        ));
    }

    #[test]
    fn reserved_forms_accepted() {
        check_key("$$date", &Value::Number(1.0)).unwrap();
        check_key("$$deleted", &Value::Bool(true)).unwrap();
        check_key("$$indexCreated", &Value::Null).unwrap();
        check_key("$$indexRemoved", &Value::from("f")).unwrap();

        // The exemption is shape-dependent.
        assert!(check_key("$$date", &Value::from("not a number")).is_err());
        assert!(check_key("$$deleted", &Value::Bool(false)).is_err());
    }

    #[test]
    fn nested_keys_validated() {
        let doc = Value::object(vec![(
            "outer",
            Value::object(vec![("$inner", Value::Null)]),
        )]);
        assert!(serialize(&doc).is_err());
        assert!(check_object(&doc).is_err());
    }

    #[test]
    fn check_object_descends_arrays() {
        let doc = Value::object(vec![(
            "xs",
            Value::Array(vec![Value::object(vec![("a.b", Value::Null)])]),
        )]);
        assert!(check_object(&doc).is_err());
    }
}
