//! Dynamic document value type.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A custom string comparator, applied to `String` values during ordering.
pub type StringCmp = Arc<dyn Fn(&str, &str) -> Ordering + Send + Sync>;

/// A dynamic document value.
///
/// This type represents any value quill can store in a document. Documents
/// themselves are `Object` values with a mandatory `_id` string field.
///
/// `Undefined` is a transient in-memory value: it is produced by dot-path
/// misses and participates in ordering and matching, but it is never
/// persisted as a field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value (dot-path miss). Never persisted.
    Undefined,
    /// Null value.
    Null,
    /// Floating-point number (all numbers, integer-valued or not).
    Number(f64),
    /// UTF-8 string.
    String(String),
    /// Boolean value.
    Bool(bool),
    /// Timestamp, milliseconds since the Unix epoch.
    Date(i64),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Mapping from field name to value. Field order is irrelevant.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Create an object value from key-value pairs.
    pub fn object(pairs: Vec<(&str, Value)>) -> Self {
        Value::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    /// Check if this value is `Undefined`.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as a number, if it is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a timestamp, if it is a date.
    pub fn as_date(&self) -> Option<i64> {
        match self {
            Value::Date(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as an object, if it is one.
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    /// Get this value as a mutable object, if it is one.
    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a field in this object value.
    ///
    /// Returns `None` for non-objects and missing fields.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(m) => m.get(key),
            _ => None,
        }
    }

    /// Ordering rank of the value's type.
    ///
    /// Cross-type comparisons are decided entirely by this rank:
    /// `Undefined < Null < Number < String < Bool < Date < Array < Object`.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Undefined => 0,
            Value::Null => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Bool(_) => 4,
            Value::Date(_) => 5,
            Value::Array(_) => 6,
            Value::Object(_) => 7,
        }
    }
}

/// Compare two values under the default (lexicographic) string order.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    compare_with(a, b, None)
}

/// Compare two values, producing a total order across all value types.
///
/// Values of different types order by type rank. Within a type: numbers and
/// dates compare numerically, strings by `str_cmp` (lexicographic when
/// `None`), booleans with `false < true`, arrays element-wise with ties
/// broken by length, and objects by pairwise comparison of their values in
/// sorted-key order, then by field count.
pub fn compare_with(a: &Value, b: &Value, str_cmp: Option<&StringCmp>) -> Ordering {
    let rank_a = a.type_rank();
    let rank_b = b.type_rank();
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }

    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => match str_cmp {
            Some(cmp) => cmp(x, y),
            None => x.cmp(y),
        },
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xa, ya) in x.iter().zip(y.iter()) {
                let ord = compare_with(xa, ya, str_cmp);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            // Pairwise comparison of values in sorted-key order. The map is
            // already key-sorted, so positional iteration suffices.
            for (xv, yv) in x.values().zip(y.values()) {
                let ord = compare_with(xv, yv, str_cmp);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

/// Point equality between two values.
///
/// This is the equality used by field matching, `$in`, and `$addToSet`.
/// It differs from a naive deep equality in two ways:
/// - Any `Undefined` on either side yields false.
/// - An array on exactly one side yields false (arrays participate in the
///   matcher's element-broadcast semantics instead). Two arrays compare
///   element-wise with equal length.
pub fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, _) | (_, Value::Undefined) => false,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(xa, ya)| equal(xa, ya))
        }
        (Value::Array(_), _) | (_, Value::Array(_)) => false,
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, xv)| match y.get(k) {
                    Some(yv) => equal(xv, yv),
                    None => false,
                })
        }
        _ => false,
    }
}

/// Recursively clone a value.
///
/// When `strict_keys` is true, object fields whose name begins with `$` or
/// contains `.` are dropped from the copy rather than causing failure. This
/// is used when deriving an upsert document from a query.
pub fn deep_copy(value: &Value, strict_keys: bool) -> Value {
    match value {
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| deep_copy(v, strict_keys)).collect())
        }
        Value::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                if strict_keys && (k.starts_with('$') || k.contains('.')) {
                    continue;
                }
                out.insert(k.clone(), deep_copy(v, strict_keys));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_hierarchy_ordering() {
        let ordered = [
            Value::Undefined,
            Value::Null,
            Value::Number(1e9),
            Value::String("zzz".into()),
            Value::Bool(false),
            Value::Date(0),
            Value::Array(vec![]),
            Value::Object(BTreeMap::new()),
        ];

        for i in 0..ordered.len() {
            for j in 0..ordered.len() {
                assert_eq!(compare(&ordered[i], &ordered[j]), i.cmp(&j));
            }
        }
    }

    #[test]
    fn number_ordering() {
        assert_eq!(
            compare(&Value::Number(1.0), &Value::Number(2.0)),
            Ordering::Less
        );
        assert_eq!(
            compare(&Value::Number(-3.5), &Value::Number(-3.5)),
            Ordering::Equal
        );
    }

    #[test]
    fn string_ordering_custom_comparator() {
        let ci: StringCmp = Arc::new(|a, b| a.to_lowercase().cmp(&b.to_lowercase()));
        let a = Value::String("Beta".into());
        let b = Value::String("alpha".into());

        assert_eq!(compare(&a, &b), Ordering::Less); // 'B' < 'a' bytewise
        assert_eq!(compare_with(&a, &b, Some(&ci)), Ordering::Greater);
    }

    #[test]
    fn bool_ordering() {
        assert_eq!(
            compare(&Value::Bool(false), &Value::Bool(true)),
            Ordering::Less
        );
    }

    #[test]
    fn array_ordering_elementwise_then_length() {
        let short = Value::from(vec![1, 2]);
        let long = Value::from(vec![1, 2, 3]);
        assert_eq!(compare(&short, &long), Ordering::Less);

        let a = Value::from(vec![1, 9]);
        let b = Value::from(vec![2, 0]);
        assert_eq!(compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn object_ordering_values_then_field_count() {
        let a = Value::object(vec![("x", Value::Number(1.0))]);
        let b = Value::object(vec![("x", Value::Number(2.0))]);
        assert_eq!(compare(&a, &b), Ordering::Less);

        let fewer = Value::object(vec![("x", Value::Number(1.0))]);
        let more = Value::object(vec![("x", Value::Number(1.0)), ("y", Value::Null)]);
        assert_eq!(compare(&fewer, &more), Ordering::Less);
    }

    #[test]
    fn compare_antisymmetry() {
        let values = [
            Value::Null,
            Value::Number(4.0),
            Value::String("a".into()),
            Value::Date(1000),
            Value::from(vec![1, 2]),
            Value::object(vec![("k", Value::Bool(true))]),
        ];
        for a in &values {
            for b in &values {
                assert_eq!(compare(a, b), compare(b, a).reverse());
            }
        }
    }

    #[test]
    fn equal_primitives() {
        assert!(equal(&Value::Number(2.0), &Value::Number(2.0)));
        assert!(!equal(&Value::Number(2.0), &Value::String("2".into())));
        assert!(equal(&Value::Null, &Value::Null));
        assert!(equal(&Value::Date(42), &Value::Date(42)));
        assert!(!equal(&Value::Date(42), &Value::Number(42.0)));
    }

    #[test]
    fn equal_undefined_is_never_equal() {
        assert!(!equal(&Value::Undefined, &Value::Undefined));
        assert!(!equal(&Value::Undefined, &Value::Null));
    }

    #[test]
    fn equal_one_sided_array_is_false() {
        assert!(!equal(&Value::from(vec![1]), &Value::Number(1.0)));
        assert!(!equal(&Value::Number(1.0), &Value::from(vec![1])));
    }

    #[test]
    fn equal_arrays_elementwise() {
        assert!(equal(&Value::from(vec![1, 2]), &Value::from(vec![1, 2])));
        assert!(!equal(&Value::from(vec![1, 2]), &Value::from(vec![2, 1])));
        assert!(!equal(&Value::from(vec![1, 2]), &Value::from(vec![1])));
    }

    #[test]
    fn equal_objects_by_key_set() {
        let a = Value::object(vec![("x", Value::Number(1.0)), ("y", Value::Null)]);
        let b = Value::object(vec![("y", Value::Null), ("x", Value::Number(1.0))]);
        let c = Value::object(vec![("x", Value::Number(1.0))]);
        assert!(equal(&a, &b));
        assert!(!equal(&a, &c));
    }

    #[test]
    fn deep_copy_plain() {
        let v = Value::object(vec![
            ("a", Value::from(vec![1, 2])),
            ("b", Value::object(vec![("c", Value::Date(7))])),
        ]);
        let copy = deep_copy(&v, false);
        assert!(equal(&v, &copy));
    }

    #[test]
    fn deep_copy_strict_drops_bad_keys() {
        let mut map = BTreeMap::new();
        map.insert("good".to_string(), Value::Number(1.0));
        map.insert("$bad".to_string(), Value::Number(2.0));
        map.insert("also.bad".to_string(), Value::Number(3.0));
        let copy = deep_copy(&Value::Object(map), true);

        let obj = copy.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert!(obj.contains_key("good"));
    }
}
