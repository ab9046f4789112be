//! Query matcher.
//!
//! Evaluates predicate trees against documents. A query is itself a
//! document: plain fields are equality tests, `$`-prefixed keys are
//! operators. Operators dispatch through closed enums, so every supported
//! operator is matched at compile time.

use crate::error::{DbError, DbResult};
use quill_codec::{compare, dot_get, equal, Value};
use std::cmp::Ordering;
use std::sync::Arc;

/// A typed predicate attached to a query, evaluated against each candidate
/// document after the structural match.
pub type WherePredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A query: a match document plus an optional typed predicate.
///
/// Everything expressible as data lives in the match document. The
/// predicate replaces the source family's `$where` operator, whose
/// user-supplied function cannot be embedded in a document tree; its bool
/// return type is enforced by the compiler.
#[derive(Clone)]
pub struct Query {
    pub(crate) spec: Value,
    pub(crate) where_pred: Option<WherePredicate>,
}

impl Query {
    /// Creates a query from a match document.
    #[must_use]
    pub fn new(spec: Value) -> Self {
        Self {
            spec,
            where_pred: None,
        }
    }

    /// Attaches a predicate, applied after the structural match.
    #[must_use]
    pub fn with_where<F>(mut self, pred: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.where_pred = Some(Arc::new(pred));
        self
    }

    /// Evaluates this query against a document.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed queries (unknown operators, mixed
    /// operator/plain keys, bad operand shapes, invalid regexes).
    pub fn matches(&self, doc: &Value) -> DbResult<bool> {
        if !matches(doc, &self.spec)? {
            return Ok(false);
        }
        match &self.where_pred {
            Some(pred) => Ok(pred(doc)),
            None => Ok(true),
        }
    }
}

impl From<Value> for Query {
    fn from(spec: Value) -> Self {
        Self::new(spec)
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("spec", &self.spec)
            .field("where_pred", &self.where_pred.is_some())
            .finish()
    }
}

/// Comparison operators usable inside a field predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Ne,
    In,
    Nin,
    Regex,
    Exists,
    Size,
    ElemMatch,
}

impl CompOp {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "$lt" => Self::Lt,
            "$lte" => Self::Lte,
            "$gt" => Self::Gt,
            "$gte" => Self::Gte,
            "$ne" => Self::Ne,
            "$in" => Self::In,
            "$nin" => Self::Nin,
            "$regex" => Self::Regex,
            "$exists" => Self::Exists,
            "$size" => Self::Size,
            "$elemMatch" => Self::ElemMatch,
            _ => return None,
        })
    }
}

/// Evaluates a match document against a document.
///
/// # Errors
///
/// Returns an error on malformed queries; never on malformed documents
/// (a shape mismatch on the document side is simply a non-match).
pub fn matches(doc: &Value, query: &Value) -> DbResult<bool> {
    // If either side is primitive (anything but an object), wrap both in a
    // synthetic single-field document and run one field predicate.
    if !matches!(query, Value::Object(_)) || !matches!(doc, Value::Object(_)) {
        return match_part(&wrap(doc), "needAKey", query, false);
    }

    let Value::Object(qmap) = query else {
        unreachable!()
    };

    for (key, qv) in qmap {
        if key.starts_with('$') {
            match key.as_str() {
                "$or" => {
                    let subs = qv.as_array().ok_or_else(|| {
                        DbError::bad_operand("$or operator used without an array")
                    })?;
                    let mut any = false;
                    for sub in subs {
                        if matches(doc, sub)? {
                            any = true;
                            break;
                        }
                    }
                    if !any {
                        return Ok(false);
                    }
                }
                "$and" => {
                    let subs = qv.as_array().ok_or_else(|| {
                        DbError::bad_operand("$and operator used without an array")
                    })?;
                    for sub in subs {
                        if !matches(doc, sub)? {
                            return Ok(false);
                        }
                    }
                }
                "$not" => {
                    if matches(doc, qv)? {
                        return Ok(false);
                    }
                }
                "$where" => {
                    return Err(DbError::bad_operand(
                        "$where cannot be embedded in a match document; use Query::with_where",
                    ));
                }
                _ => return Err(DbError::unknown_operator(key)),
            }
        } else if !match_part(doc, key, qv, false)? {
            return Ok(false);
        }
    }

    Ok(true)
}

fn wrap(v: &Value) -> Value {
    Value::object(vec![("needAKey", v.clone())])
}

/// Evaluates one field predicate.
///
/// When the addressed value is an array and `treat_as_value` is false, the
/// predicate broadcasts: it succeeds if any element matches. Two query
/// shapes opt back into whole-value treatment — an array operand (exact
/// equality) and an operand containing `$size` or `$elemMatch` (operators
/// over the array itself).
fn match_part(doc: &Value, key: &str, qv: &Value, treat_as_value: bool) -> DbResult<bool> {
    let doc_value = dot_get(doc, key);

    if let Value::Array(elems) = &doc_value {
        if !treat_as_value {
            if matches!(qv, Value::Array(_)) {
                return match_part(doc, key, qv, true);
            }
            if let Value::Object(qmap) = qv {
                if qmap.contains_key("$size") || qmap.contains_key("$elemMatch") {
                    return match_part(doc, key, qv, true);
                }
            }
            for el in elems {
                if match_part(&wrap(el), "needAKey", qv, false)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
    }

    if let Value::Object(qmap) = qv {
        let dollar_keys = qmap.keys().filter(|k| k.starts_with('$')).count();
        if dollar_keys > 0 {
            if dollar_keys != qmap.len() {
                return Err(DbError::MixedOperators);
            }
            for (op_name, operand) in qmap {
                let op = CompOp::parse(op_name)
                    .ok_or_else(|| DbError::unknown_operator(op_name))?;
                if !eval_op(op, &doc_value, operand)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
    }

    Ok(equal(&doc_value, qv))
}

/// Ordering comparisons only apply between two numbers, two strings, or
/// two dates; everything else is simply not comparable.
fn comparable(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Date(_), Value::Date(_))
    )
}

/// The permissive truthiness rule used by `$exists`: only `0`, `false`,
/// `null`, and `Undefined` read as "expect absent"; empty strings, arrays,
/// and objects all read as "expect present".
fn truthy(v: &Value) -> bool {
    match v {
        Value::Undefined | Value::Null | Value::Bool(false) => false,
        Value::Number(n) => *n != 0.0,
        _ => true,
    }
}

fn eval_op(op: CompOp, a: &Value, b: &Value) -> DbResult<bool> {
    match op {
        CompOp::Lt => Ok(comparable(a, b) && compare(a, b) == Ordering::Less),
        CompOp::Lte => Ok(comparable(a, b) && compare(a, b) != Ordering::Greater),
        CompOp::Gt => Ok(comparable(a, b) && compare(a, b) == Ordering::Greater),
        CompOp::Gte => Ok(comparable(a, b) && compare(a, b) != Ordering::Less),
        CompOp::Ne => Ok(!equal(a, b)),
        CompOp::In => {
            let options = b
                .as_array()
                .ok_or_else(|| DbError::type_mismatch("$in operator called with a non-array"))?;
            Ok(options.iter().any(|el| equal(a, el)))
        }
        CompOp::Nin => {
            let options = b
                .as_array()
                .ok_or_else(|| DbError::type_mismatch("$nin operator called with a non-array"))?;
            Ok(!options.iter().any(|el| equal(a, el)))
        }
        CompOp::Regex => {
            let pattern = b.as_str().ok_or_else(|| {
                DbError::type_mismatch("$regex operator called with a non-string pattern")
            })?;
            let re = regex::Regex::new(pattern)?;
            Ok(match a {
                Value::String(s) => re.is_match(s),
                _ => false,
            })
        }
        CompOp::Exists => Ok(!a.is_undefined() == truthy(b)),
        CompOp::Size => {
            let Value::Array(items) = a else {
                return Ok(false);
            };
            let n = b
                .as_number()
                .filter(|n| n.fract() == 0.0)
                .ok_or_else(|| DbError::bad_operand("$size operator called without an integer"))?;
            #[allow(clippy::cast_precision_loss)]
            Ok(items.len() as f64 == n)
        }
        CompOp::ElemMatch => {
            let Value::Array(items) = a else {
                return Ok(false);
            };
            for el in items {
                if matches(el, b)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Value {
        Value::object(vec![
            ("_id", Value::from("d1")),
            ("name", Value::from("hello")),
            ("age", Value::Number(30.0)),
            ("born", Value::Date(500_000)),
            ("tags", Value::from(vec!["db", "rust"])),
            (
                "address",
                Value::object(vec![("city", Value::from("Paris"))]),
            ),
            ("flag", Value::Bool(false)),
        ])
    }

    #[test]
    fn equality_on_field() {
        assert!(matches(&doc(), &Value::object(vec![("name", Value::from("hello"))])).unwrap());
        assert!(!matches(&doc(), &Value::object(vec![("name", Value::from("world"))])).unwrap());
    }

    #[test]
    fn equality_on_dot_path() {
        let q = Value::object(vec![("address.city", Value::from("Paris"))]);
        assert!(matches(&doc(), &q).unwrap());
    }

    #[test]
    fn missing_field_matches_nothing_but_ne_and_exists() {
        let q = Value::object(vec![("missing", Value::from("x"))]);
        assert!(!matches(&doc(), &q).unwrap());

        let q = Value::object(vec![(
            "missing",
            Value::object(vec![("$ne", Value::from("x"))]),
        )]);
        assert!(matches(&doc(), &q).unwrap());
    }

    #[test]
    fn comparison_operators() {
        let q = Value::object(vec![(
            "age",
            Value::object(vec![("$gt", Value::Number(29.0))]),
        )]);
        assert!(matches(&doc(), &q).unwrap());

        let q = Value::object(vec![(
            "age",
            Value::object(vec![
                ("$gte", Value::Number(30.0)),
                ("$lte", Value::Number(30.0)),
            ]),
        )]);
        assert!(matches(&doc(), &q).unwrap());

        let q = Value::object(vec![(
            "age",
            Value::object(vec![("$lt", Value::Number(30.0))]),
        )]);
        assert!(!matches(&doc(), &q).unwrap());
    }

    #[test]
    fn comparison_requires_same_type() {
        // number field vs string bound: not comparable, so false.
        let q = Value::object(vec![(
            "age",
            Value::object(vec![("$gt", Value::from("29"))]),
        )]);
        assert!(!matches(&doc(), &q).unwrap());

        let q = Value::object(vec![(
            "born",
            Value::object(vec![("$lt", Value::Date(600_000))]),
        )]);
        assert!(matches(&doc(), &q).unwrap());
    }

    #[test]
    fn in_and_nin() {
        let q = Value::object(vec![(
            "age",
            Value::object(vec![(
                "$in",
                Value::Array(vec![Value::Number(25.0), Value::Number(30.0)]),
            )]),
        )]);
        assert!(matches(&doc(), &q).unwrap());

        let q = Value::object(vec![(
            "age",
            Value::object(vec![("$nin", Value::Array(vec![Value::Number(30.0)]))]),
        )]);
        assert!(!matches(&doc(), &q).unwrap());

        let q = Value::object(vec![(
            "age",
            Value::object(vec![("$in", Value::Number(30.0))]),
        )]);
        assert!(matches(&doc(), &q).is_err());
    }

    #[test]
    fn regex_operator() {
        let q = Value::object(vec![(
            "name",
            Value::object(vec![("$regex", Value::from("^hel"))]),
        )]);
        assert!(matches(&doc(), &q).unwrap());

        // Non-string field: no match, no error.
        let q = Value::object(vec![(
            "age",
            Value::object(vec![("$regex", Value::from("^3"))]),
        )]);
        assert!(!matches(&doc(), &q).unwrap());

        // Bad pattern: error.
        let q = Value::object(vec![(
            "name",
            Value::object(vec![("$regex", Value::from("(unclosed"))]),
        )]);
        assert!(matches(&doc(), &q).is_err());
    }

    #[test]
    fn exists_truthiness() {
        let exists = |operand: Value| {
            Value::object(vec![("name", Value::object(vec![("$exists", operand)]))])
        };
        assert!(matches(&doc(), &exists(Value::Bool(true))).unwrap());
        assert!(!matches(&doc(), &exists(Value::Bool(false))).unwrap());
        assert!(!matches(&doc(), &exists(Value::Number(0.0))).unwrap());
        assert!(!matches(&doc(), &exists(Value::Null)).unwrap());
        // Permissive rule: empty string/array/object count as "expect present".
        assert!(matches(&doc(), &exists(Value::from(""))).unwrap());
        assert!(matches(&doc(), &exists(Value::Array(vec![]))).unwrap());

        let q = Value::object(vec![(
            "missing",
            Value::object(vec![("$exists", Value::Bool(false))]),
        )]);
        assert!(matches(&doc(), &q).unwrap());
    }

    #[test]
    fn array_broadcast() {
        let q = Value::object(vec![("tags", Value::from("rust"))]);
        assert!(matches(&doc(), &q).unwrap());

        let q = Value::object(vec![("tags", Value::from("go"))]);
        assert!(!matches(&doc(), &q).unwrap());

        // Operator broadcast over elements.
        let q = Value::object(vec![(
            "tags",
            Value::object(vec![("$regex", Value::from("^ru"))]),
        )]);
        assert!(matches(&doc(), &q).unwrap());
    }

    #[test]
    fn array_exact_equality() {
        let q = Value::object(vec![("tags", Value::from(vec!["db", "rust"]))]);
        assert!(matches(&doc(), &q).unwrap());

        let q = Value::object(vec![("tags", Value::from(vec!["rust", "db"]))]);
        assert!(!matches(&doc(), &q).unwrap());
    }

    #[test]
    fn size_operator() {
        let q = Value::object(vec![(
            "tags",
            Value::object(vec![("$size", Value::Number(2.0))]),
        )]);
        assert!(matches(&doc(), &q).unwrap());

        let q = Value::object(vec![(
            "tags",
            Value::object(vec![("$size", Value::Number(3.0))]),
        )]);
        assert!(!matches(&doc(), &q).unwrap());

        // $size on a non-array is a non-match, not an error.
        let q = Value::object(vec![(
            "age",
            Value::object(vec![("$size", Value::Number(2.0))]),
        )]);
        assert!(!matches(&doc(), &q).unwrap());

        // Fractional size is an error.
        let q = Value::object(vec![(
            "tags",
            Value::object(vec![("$size", Value::Number(1.5))]),
        )]);
        assert!(matches(&doc(), &q).is_err());
    }

    #[test]
    fn elem_match() {
        let doc = Value::object(vec![(
            "pets",
            Value::Array(vec![
                Value::object(vec![("kind", Value::from("cat")), ("age", Value::Number(3.0))]),
                Value::object(vec![("kind", Value::from("dog")), ("age", Value::Number(9.0))]),
            ]),
        )]);

        let q = Value::object(vec![(
            "pets",
            Value::object(vec![(
                "$elemMatch",
                Value::object(vec![
                    ("kind", Value::from("dog")),
                    ("age", Value::object(vec![("$gt", Value::Number(5.0))])),
                ]),
            )]),
        )]);
        assert!(matches(&doc, &q).unwrap());

        let q = Value::object(vec![(
            "pets",
            Value::object(vec![(
                "$elemMatch",
                Value::object(vec![
                    ("kind", Value::from("cat")),
                    ("age", Value::object(vec![("$gt", Value::Number(5.0))])),
                ]),
            )]),
        )]);
        assert!(!matches(&doc, &q).unwrap());
    }

    #[test]
    fn logical_operators() {
        let q = Value::object(vec![(
            "$or",
            Value::Array(vec![
                Value::object(vec![("age", Value::Number(99.0))]),
                Value::object(vec![("name", Value::from("hello"))]),
            ]),
        )]);
        assert!(matches(&doc(), &q).unwrap());

        let q = Value::object(vec![(
            "$and",
            Value::Array(vec![
                Value::object(vec![("age", Value::Number(30.0))]),
                Value::object(vec![("name", Value::from("nope"))]),
            ]),
        )]);
        assert!(!matches(&doc(), &q).unwrap());

        let q = Value::object(vec![(
            "$not",
            Value::object(vec![("age", Value::Number(99.0))]),
        )]);
        assert!(matches(&doc(), &q).unwrap());

        let q = Value::object(vec![("$or", Value::from("not an array"))]);
        assert!(matches(&doc(), &q).is_err());
    }

    #[test]
    fn logical_and_field_predicates_mix_at_top_level() {
        let q = Value::object(vec![
            (
                "$or",
                Value::Array(vec![
                    Value::object(vec![("age", Value::Number(30.0))]),
                    Value::object(vec![("age", Value::Number(31.0))]),
                ]),
            ),
            ("name", Value::from("hello")),
        ]);
        assert!(matches(&doc(), &q).unwrap());
    }

    #[test]
    fn mixed_operator_and_plain_keys_fail() {
        let q = Value::object(vec![(
            "age",
            Value::object(vec![
                ("$gt", Value::Number(10.0)),
                ("plain", Value::Number(1.0)),
            ]),
        )]);
        assert!(matches!(matches(&doc(), &q), Err(DbError::MixedOperators)));
    }

    #[test]
    fn unknown_operator_fails() {
        let q = Value::object(vec![(
            "age",
            Value::object(vec![("$unknownOp", Value::Number(1.0))]),
        )]);
        assert!(matches!(
            matches(&doc(), &q),
            Err(DbError::UnknownOperator { .. })
        ));
    }

    #[test]
    fn object_equality_as_plain_value() {
        let q = Value::object(vec![(
            "address",
            Value::object(vec![("city", Value::from("Paris"))]),
        )]);
        assert!(matches(&doc(), &q).unwrap());

        let q = Value::object(vec![(
            "address",
            Value::object(vec![("city", Value::from("Lyon"))]),
        )]);
        assert!(!matches(&doc(), &q).unwrap());
    }

    #[test]
    fn primitive_shortcut() {
        assert!(matches(&Value::Number(5.0), &Value::Number(5.0)).unwrap());
        assert!(!matches(&Value::Number(5.0), &Value::Number(6.0)).unwrap());
        // The wrapped form routes operators through the field predicate.
        assert!(matches(
            &Value::Number(5.0),
            &Value::object(vec![("$gt", Value::Number(4.0))])
        )
        .unwrap());
    }

    #[test]
    fn where_predicate() {
        let q = Query::new(Value::object(vec![("name", Value::from("hello"))]))
            .with_where(|d| d.get("age").and_then(Value::as_number) == Some(30.0));
        assert!(q.matches(&doc()).unwrap());

        let q = Query::new(Value::object(vec![("name", Value::from("hello"))]))
            .with_where(|d| d.get("age").and_then(Value::as_number) == Some(31.0));
        assert!(!q.matches(&doc()).unwrap());
    }

    #[test]
    fn false_field_value_matches() {
        let q = Value::object(vec![("flag", Value::Bool(false))]);
        assert!(matches(&doc(), &q).unwrap());
    }
}
