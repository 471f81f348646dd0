//! Deep-equality and ordering over `serde_json::Value`, the tagged-union
//! stand-in for the dynamically typed values the original design matches
//! against (see spec Design Notes: "Dynamic typing -> tagged values").
//! Comparison between incompatible variants is permissive: it never panics
//! and ordering predicates simply evaluate to `false`.

use serde_json::Value;
use std::cmp::Ordering;

/// Structural equality with numeric values compared by value, not by
/// internal representation (so `0` and `0.0` are equal for query matching).
pub fn deep_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| deep_eq(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|ov| deep_eq(v, ov)))
        }
        _ => false,
    }
}

/// Ordering over compatible JSON scalars. Returns `None` for incompatible
/// variants (arrays, objects, null, or mismatched types), which callers
/// treat as "no ordering predicate can hold."
pub fn try_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Coerce a JSON value to its string form for regex matching: strings pass
/// through verbatim, scalars use their natural display form, and
/// arrays/objects fall back to their JSON text.
pub fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_compare_by_value_not_representation() {
        assert!(deep_eq(&json!(0), &json!(0.0)));
        assert_eq!(try_cmp(&json!(1), &json!(2)), Some(Ordering::Less));
    }

    #[test]
    fn incompatible_variants_never_order() {
        assert_eq!(try_cmp(&json!("a"), &json!(1)), None);
        assert_eq!(try_cmp(&json!([1]), &json!([1])), None);
    }

    #[test]
    fn object_deep_eq_ignores_key_order() {
        assert!(deep_eq(
            &json!({"a": 1, "b": 2}),
            &json!({"b": 2, "a": 1})
        ));
    }
}
