//! # Quill Codec
//!
//! Value model and line codec for quill.
//!
//! This crate provides:
//! - The dynamic [`Value`] type documents are made of
//! - A total order across all values ([`compare`]) and point equality
//!   ([`equal`])
//! - Dot-path access ([`dot_get`]) with array projection
//! - The one-line textual format used by the journal ([`serialize`] /
//!   [`deserialize`]) with the `$$date` extension
//! - Field-name validation ([`check_key`] / [`check_object`])
//!
//! ## Format rules
//!
//! - One record is exactly one line of UTF-8 JSON
//! - Dates serialize as `{"$$date": ms}`
//! - Field names must not start with `$` or contain `.`; the four reserved
//!   persisted forms (`$$date`, `$$deleted`, `$$indexCreated`,
//!   `$$indexRemoved`) are exempt
//! - `Undefined` is transient: object fields are omitted, array elements
//!   become `null`
//!
//! ## Usage
//!
//! ```
//! use quill_codec::{deserialize, equal, serialize, Value};
//!
//! let doc = Value::object(vec![("_id", Value::from("a")), ("x", Value::Number(1.0))]);
//! let line = serialize(&doc).unwrap();
//! let back = deserialize(&line).unwrap();
//! assert!(equal(&doc, &back));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod path;
mod value;

pub use decoder::deserialize;
pub use encoder::{check_key, check_object, serialize};
pub use error::{CodecError, CodecResult};
pub use path::dot_get;
pub use value::{compare, compare_with, deep_copy, equal, StringCmp, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Ordering;

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            (-1.0e9_f64..1.0e9_f64).prop_map(Value::Number),
            "[a-z]{0,8}".prop_map(Value::String),
            (-1_000_000_000_i64..1_000_000_000_i64).prop_map(Value::Date),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Object),
            ]
        })
    }

    proptest! {
        #[test]
        fn serialize_deserialize_roundtrip(v in arb_value()) {
            let line = serialize(&v).unwrap();
            let back = deserialize(&line).unwrap();
            // The generator never produces Undefined, so semantic equality
            // must hold exactly.
            prop_assert!(equal(&v, &back));
            prop_assert_eq!(compare(&v, &back), Ordering::Equal);
        }

        #[test]
        fn serialized_form_is_stable(v in arb_value()) {
            let once = serialize(&v).unwrap();
            let twice = serialize(&deserialize(&once).unwrap()).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn compare_is_antisymmetric(a in arb_value(), b in arb_value()) {
            prop_assert_eq!(compare(&a, &b), compare(&b, &a).reverse());
        }

        #[test]
        fn compare_is_transitive(a in arb_value(), b in arb_value(), c in arb_value()) {
            let mut sorted = [a, b, c];
            sorted.sort_by(compare);
            prop_assert!(compare(&sorted[0], &sorted[2]) != Ordering::Greater);
        }
    }
}
