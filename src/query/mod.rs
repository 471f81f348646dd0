//! Operator evaluator (C5) — the Mongo-like query tree matched against
//! records, and the update directive set applied to them.
//!
//! Queries and updates are themselves `serde_json::Value` trees; there is
//! no query-language parser (that is explicitly out of scope — see
//! `main.rs`, which only ever hands a pre-built JSON value to this module).

pub mod value;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{JinnError, Result};
use value::{coerce_to_string, deep_eq, try_cmp};

/// Evaluate `query` against `record`. Top-level keys combine with implicit
/// AND; `$or`/`$and`/`$not` recurse into sub-queries, everything else is a
/// per-field match.
pub fn matches(record: &Value, query: &Value) -> bool {
    let Some(query_obj) = query.as_object() else {
        return false;
    };

    query_obj.iter().all(|(key, value)| match key.as_str() {
        "$or" => value
            .as_array()
            .is_some_and(|subs| subs.iter().any(|q| matches(record, q))),
        "$and" => value
            .as_array()
            .is_some_and(|subs| subs.iter().all(|q| matches(record, q))),
        "$not" => !matches(record, value),
        field => matches_field(record, field, value),
    })
}

fn matches_field(record: &Value, field: &str, query: &Value) -> bool {
    let present = record.as_object().is_some_and(|o| o.contains_key(field));
    let value = record
        .as_object()
        .and_then(|o| o.get(field))
        .cloned()
        .unwrap_or(Value::Null);
    value_matches(&value, present, query)
}

/// Shared by per-field matching and `$pull`'s element-level sub-query: test
/// a single value (plus whether it was actually present, for `$exists`)
/// against a query fragment.
fn value_matches(value: &Value, present: bool, query: &Value) -> bool {
    let Some(obj) = query.as_object() else {
        // A bare literal (including a literal regex pattern expressed as a
        // string) is matched by deep equality; true regex objects don't
        // exist in this tagged-value model, so `$regex` below is the only
        // route to pattern matching.
        return present && deep_eq(value, query);
    };

    let operators: Vec<(&String, &Value)> = obj.iter().filter(|(k, _)| k.starts_with('$')).collect();
    if operators.is_empty() {
        return present && deep_eq(value, query);
    }

    operators
        .iter()
        .all(|(op, arg)| eval_leaf_operator(op, arg, value, present))
}

fn eval_leaf_operator(op: &str, arg: &Value, value: &Value, present: bool) -> bool {
    match op {
        "$lt" => try_cmp(value, arg).is_some_and(|o| o.is_lt()),
        "$lte" => try_cmp(value, arg).is_some_and(|o| o.is_le()),
        "$gt" => try_cmp(value, arg).is_some_and(|o| o.is_gt()),
        "$gte" => try_cmp(value, arg).is_some_and(|o| o.is_ge()),
        "$ne" => !(present && deep_eq(value, arg)),
        "$in" => present && arg.as_array().is_some_and(|a| a.iter().any(|v| deep_eq(v, value))),
        "$nin" => !(present && arg.as_array().is_some_and(|a| a.iter().any(|v| deep_eq(v, value)))),
        // Preserved as specified: `$exists` tests whether the field is
        // *undefined*, not whether it exists. `$exists: true` therefore
        // matches records where the field is absent.
        "$exists" => arg.as_bool().is_some_and(|want| !present == want),
        "$regex" => arg
            .as_str()
            .and_then(|p| Regex::new(p).ok())
            .is_some_and(|re| present && re.is_match(&coerce_to_string(value))),
        // Unknown operators are ignored rather than treated as a failed
        // match, consistent with the source behavior this evaluator
        // preserves.
        _ => true,
    }
}

/// Apply an update document to `record` in place.
///
/// Recognized top-level keys are the directive operators; anything else is
/// a full-field replacement (`record[key] = value`).
pub fn apply_update(record: &mut Value, update: &Value) -> Result<()> {
    let update_obj = update
        .as_object()
        .ok_or_else(|| JinnError::InvalidArgument("update document must be an object".into()))?;

    for (key, arg) in update_obj {
        match key.as_str() {
            "$set" => {
                for (field, v) in as_fields(arg)? {
                    set_field(record, field, v.clone());
                }
            }
            "$unset" => {
                for (field, _) in as_fields(arg)? {
                    unset_field(record, field);
                }
            }
            "$inc" => {
                for (field, delta) in as_fields(arg)? {
                    let current = get_field(record, field).cloned().unwrap_or(Value::Number(0.into()));
                    let sum = numeric_add(&current, delta)?;
                    set_field(record, field, sum);
                }
            }
            "$min" => {
                for (field, candidate) in as_fields(arg)? {
                    apply_extremum(record, field, candidate, true);
                }
            }
            "$max" => {
                for (field, candidate) in as_fields(arg)? {
                    apply_extremum(record, field, candidate, false);
                }
            }
            "$push" => {
                for (field, spec) in as_fields(arg)? {
                    apply_push(record, field, spec)?;
                }
            }
            "$addToSet" => {
                for (field, v) in as_fields(arg)? {
                    apply_add_to_set(record, field, v);
                }
            }
            "$pop" => {
                for (field, n) in as_fields(arg)? {
                    apply_pop(record, field, n);
                }
            }
            "$pull" => {
                for (field, subquery) in as_fields(arg)? {
                    apply_pull(record, field, subquery);
                }
            }
            _ => set_field(record, key, arg.clone()),
        }
    }

    Ok(())
}

fn as_fields(v: &Value) -> Result<&Map<String, Value>> {
    v.as_object()
        .ok_or_else(|| JinnError::InvalidArgument("update operator argument must be an object".into()))
}

fn get_field<'a>(record: &'a Value, field: &str) -> Option<&'a Value> {
    record.as_object().and_then(|o| o.get(field))
}

fn set_field(record: &mut Value, field: &str, value: Value) {
    if let Some(obj) = record.as_object_mut() {
        obj.insert(field.to_string(), value);
    }
}

fn unset_field(record: &mut Value, field: &str) {
    if let Some(obj) = record.as_object_mut() {
        obj.remove(field);
    }
}

fn numeric_add(current: &Value, delta: &Value) -> Result<Value> {
    let invalid = || JinnError::InvalidArgument("$inc requires numeric operands".into());
    let a = current.as_number().ok_or_else(invalid)?;
    let b = delta.as_number().ok_or_else(invalid)?;

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Ok(Value::Number(sum.into()));
        }
    }
    let sum = a.as_f64().ok_or_else(invalid)? + b.as_f64().ok_or_else(invalid)?;
    Ok(serde_json::Number::from_f64(sum)
        .map(Value::Number)
        .unwrap_or(Value::Null))
}

/// `$min`/`$max`: keep whichever of the current value or candidate is the
/// extremum, preserving the winner's original representation rather than
/// recomputing it.
fn apply_extremum(record: &mut Value, field: &str, candidate: &Value, want_min: bool) {
    let current = get_field(record, field).cloned();
    let chosen = match current {
        None => candidate.clone(),
        Some(ref cur) => match try_cmp(cur, candidate) {
            Some(ord) if want_min == ord.is_le() => cur.clone(),
            Some(_) => candidate.clone(),
            None => cur.clone(),
        },
    };
    set_field(record, field, chosen);
}

fn apply_push(record: &mut Value, field: &str, spec: &Value) -> Result<()> {
    let mut arr = get_field(record, field)
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    if let Some(obj) = spec.as_object().filter(|o| o.contains_key("$each")) {
        let each = obj
            .get("$each")
            .and_then(|v| v.as_array())
            .ok_or_else(|| JinnError::InvalidArgument("$push $each requires an array".into()))?;
        arr.extend(each.iter().cloned());

        if let Some(true) = obj.get("$sort").and_then(|v| v.as_bool()) {
            arr.sort_by(|a, b| try_cmp(a, b).unwrap_or(std::cmp::Ordering::Equal));
        }
        if let Some(n) = obj.get("$slice").and_then(|v| v.as_i64()) {
            apply_slice(&mut arr, n);
        }
    } else {
        arr.push(spec.clone());
    }

    set_field(record, field, Value::Array(arr));
    Ok(())
}

/// `$slice: n` removes the first `n` elements (per the spec's literal
/// wording), not the Mongo-style "keep the first n". A negative `n`
/// removes from the tail instead, by symmetry.
fn apply_slice(arr: &mut Vec<Value>, n: i64) {
    if n >= 0 {
        let drop = (n as usize).min(arr.len());
        arr.drain(0..drop);
    } else {
        let drop = (n.unsigned_abs() as usize).min(arr.len());
        let keep = arr.len() - drop;
        arr.drain(keep..);
    }
}

fn apply_add_to_set(record: &mut Value, field: &str, v: &Value) {
    let mut arr = get_field(record, field)
        .and_then(|f| f.as_array())
        .cloned()
        .unwrap_or_default();
    if !arr.iter().any(|existing| deep_eq(existing, v)) {
        arr.push(v.clone());
    }
    set_field(record, field, Value::Array(arr));
}

fn apply_pop(record: &mut Value, field: &str, n: &Value) {
    let Some(mut arr) = get_field(record, field).and_then(|f| f.as_array()).cloned() else {
        return;
    };
    match n.as_i64() {
        Some(n) if n < 0 => {
            if !arr.is_empty() {
                arr.remove(0);
            }
        }
        Some(_) => {
            arr.pop();
        }
        None => {}
    }
    set_field(record, field, Value::Array(arr));
}

fn apply_pull(record: &mut Value, field: &str, subquery: &Value) {
    let Some(arr) = get_field(record, field).and_then(|f| f.as_array()).cloned() else {
        return;
    };
    let kept: Vec<Value> = arr
        .into_iter()
        .filter(|item| !value_matches(item, true, subquery))
        .collect();
    set_field(record, field, Value::Array(kept));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn matches_simple_equality_and_implicit_and() {
        let rec = json!({"_id": "1", "name": "ada", "age": 30});
        assert!(matches(&rec, &json!({"name": "ada", "age": 30})));
        assert!(!matches(&rec, &json!({"name": "ada", "age": 31})));
    }

    #[test]
    fn matches_or_and_not() {
        let rec = json!({"age": 30});
        assert!(matches(&rec, &json!({"$or": [{"age": 1}, {"age": 30}]})));
        assert!(matches(&rec, &json!({"$not": {"age": 31}})));
        assert!(matches(&rec, &json!({"$and": [{"age": {"$gte": 1}}, {"age": {"$lt": 100}}]})));
    }

    #[test]
    fn exists_tests_undefinedness_not_presence() {
        let rec = json!({"present": 1});
        // present:true means "field is undefined" — so a field that IS
        // present must be matched with $exists: false, per the preserved
        // source semantics.
        assert!(matches(&rec, &json!({"present": {"$exists": false}})));
        assert!(!matches(&rec, &json!({"present": {"$exists": true}})));
        assert!(matches(&rec, &json!({"missing": {"$exists": true}})));
    }

    #[test]
    fn comparison_and_membership_operators() {
        let rec = json!({"n": 5, "tag": "x"});
        assert!(matches(&rec, &json!({"n": {"$gt": 1, "$lt": 10}})));
        assert!(matches(&rec, &json!({"tag": {"$in": ["x", "y"]}})));
        assert!(!matches(&rec, &json!({"tag": {"$nin": ["x", "y"]}})));
        assert!(matches(&rec, &json!({"tag": {"$ne": "y"}})));
    }

    #[test]
    fn regex_matches_coerced_string() {
        let rec = json!({"name": "jinnifer"});
        assert!(matches(&rec, &json!({"name": {"$regex": "^jinn"}})));
        assert!(!matches(&rec, &json!({"name": {"$regex": "^zzz"}})));
    }

    #[test]
    fn set_unset_and_inc() {
        let mut rec = json!({"_id": "1", "count": 1, "stale": true});
        apply_update(&mut rec, &json!({"$set": {"count": 2}, "$unset": {"stale": ""}})).unwrap();
        assert_eq!(rec, json!({"_id": "1", "count": 2}));

        apply_update(&mut rec, &json!({"$inc": {"count": -1}})).unwrap();
        assert_eq!(rec["count"], json!(1));
    }

    #[test]
    fn min_and_max_preserve_representation() {
        let mut rec = json!({"lo": 5, "hi": 5});
        apply_update(&mut rec, &json!({"$min": {"lo": 3}, "$max": {"hi": 9}})).unwrap();
        assert_eq!(rec["lo"], json!(3));
        assert_eq!(rec["hi"], json!(9));
    }

    #[test]
    fn push_each_sort_slice() {
        // [3, 1] + each [2, 5] -> [3, 1, 2, 5]; sorted -> [1, 2, 3, 5];
        // $slice: 3 removes the first 3 elements, leaving [5].
        let mut rec = json!({"scores": [3, 1]});
        apply_update(
            &mut rec,
            &json!({"$push": {"scores": {"$each": [2, 5], "$sort": true, "$slice": 3}}}),
        )
        .unwrap();
        assert_eq!(rec["scores"], json!([5]));
    }

    #[test]
    fn push_slice_negative_removes_from_tail() {
        let mut rec = json!({"scores": [1, 2, 3, 4]});
        apply_update(
            &mut rec,
            &json!({"$push": {"scores": {"$each": [], "$slice": -1}}}),
        )
        .unwrap();
        assert_eq!(rec["scores"], json!([1, 2, 3]));
    }

    #[test]
    fn add_to_set_is_idempotent() {
        let mut rec = json!({"tags": ["a"]});
        apply_update(&mut rec, &json!({"$addToSet": {"tags": "a"}})).unwrap();
        assert_eq!(rec["tags"], json!(["a"]));
        apply_update(&mut rec, &json!({"$addToSet": {"tags": "b"}})).unwrap();
        assert_eq!(rec["tags"], json!(["a", "b"]));
    }

    #[test]
    fn pop_and_pull() {
        let mut rec = json!({"xs": [1, 2, 3, 4]});
        apply_update(&mut rec, &json!({"$pop": {"xs": 1}})).unwrap();
        assert_eq!(rec["xs"], json!([1, 2, 3]));
        apply_update(&mut rec, &json!({"$pop": {"xs": -1}})).unwrap();
        assert_eq!(rec["xs"], json!([2, 3]));

        let mut rec = json!({"xs": [1, 2, 3, 4]});
        apply_update(&mut rec, &json!({"$pull": {"xs": {"$gte": 3}}})).unwrap();
        assert_eq!(rec["xs"], json!([1, 2]));
    }

    #[test]
    fn unrecognized_top_level_key_is_full_field_replacement() {
        let mut rec = json!({"_id": "1", "x": 1});
        apply_update(&mut rec, &json!({"x": {"nested": true}})).unwrap();
        assert_eq!(rec["x"], json!({"nested": true}));
    }
}
