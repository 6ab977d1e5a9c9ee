//! Top-level state diffing
//!
//! Compares the before/after snapshots of a step and reports which
//! top-level fields changed. Values are summarized before they land in a
//! report so a multi-megabyte retrieval payload cannot blow up the output.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Strings longer than this many characters are truncated in summaries.
pub const MAX_SUMMARY_STRING_CHARS: usize = 200;
/// Arrays longer than this collapse to a count marker.
pub const MAX_SUMMARY_ARRAY_LEN: usize = 20;
/// Objects with more keys than this collapse to a key-count marker.
pub const MAX_SUMMARY_OBJECT_KEYS: usize = 30;

/// One changed top-level field, both sides summarized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldChange {
    pub from: Value,
    pub to: Value,
}

/// Diff two state snapshots at the top level.
///
/// The result maps each changed key to its summarized old and new values.
/// A key missing on one side is treated as null there. Returns an empty
/// mapping when either input is not an object.
pub fn diff_top_level(prev: &Value, next: &Value) -> BTreeMap<String, FieldChange> {
    let mut changes = BTreeMap::new();
    let (Some(prev_map), Some(next_map)) = (prev.as_object(), next.as_object()) else {
        return changes;
    };

    let mut keys: Vec<&String> = prev_map.keys().collect();
    for key in next_map.keys() {
        if !prev_map.contains_key(key) {
            keys.push(key);
        }
    }

    for key in keys {
        let old = prev_map.get(key).unwrap_or(&Value::Null);
        let new = next_map.get(key).unwrap_or(&Value::Null);
        if !deep_equal(old, new) {
            changes.insert(
                key.clone(),
                FieldChange {
                    from: summarize(old),
                    to: summarize(new),
                },
            );
        }
    }
    changes
}

/// Structural equality: arrays element-wise in order, objects by key set
/// regardless of key order, numbers by numeric value.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(xf), Some(yf)) => xf == yf,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, v)| ys.get(k).is_some_and(|w| deep_equal(v, w)))
        }
        _ => a == b,
    }
}

/// Bound the size of a value before it enters a report.
pub fn summarize(value: &Value) -> Value {
    match value {
        Value::String(s) => {
            let total = s.chars().count();
            if total > MAX_SUMMARY_STRING_CHARS {
                let head: String = s.chars().take(MAX_SUMMARY_STRING_CHARS).collect();
                Value::String(format!("{head}... [truncated, {total} chars total]"))
            } else {
                value.clone()
            }
        }
        Value::Array(items) if items.len() > MAX_SUMMARY_ARRAY_LEN => {
            json!({ "type": "array", "count": items.len() })
        }
        Value::Object(map) if map.len() > MAX_SUMMARY_OBJECT_KEYS => {
            json!({ "type": "object", "keyCount": map.len() })
        }
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_snapshots_produce_no_changes() {
        let snapshot = json!({
            "query": "what is deflate",
            "docs": [{"id": 1}, {"id": 2}],
            "scores": {"bm25": 0.4, "dense": 0.6},
        });
        assert!(diff_top_level(&snapshot, &snapshot).is_empty());
    }

    #[test]
    fn key_order_does_not_affect_the_diff() {
        let a: Value = serde_json::from_str(r#"{"x": {"p": 1, "q": 2}, "y": 3}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": 3, "x": {"q": 2, "p": 1}}"#).unwrap();
        assert!(diff_top_level(&a, &b).is_empty());
    }

    #[test]
    fn changed_and_added_keys_are_reported() {
        let before = json!({"count": 1, "phase": "retrieve"});
        let after = json!({"count": 2, "phase": "retrieve", "answer": "42"});
        let changes = diff_top_level(&before, &after);

        assert_eq!(changes.len(), 2);
        assert_eq!(changes["count"].from, json!(1));
        assert_eq!(changes["count"].to, json!(2));
        assert_eq!(changes["answer"].from, Value::Null);
        assert_eq!(changes["answer"].to, json!("42"));
    }

    #[test]
    fn removed_key_diffs_against_null() {
        let before = json!({"cursor": "abc"});
        let after = json!({});
        let changes = diff_top_level(&before, &after);
        assert_eq!(changes["cursor"].to, Value::Null);
    }

    #[test]
    fn array_order_is_significant() {
        let before = json!({"ids": [1, 2]});
        let after = json!({"ids": [2, 1]});
        assert_eq!(diff_top_level(&before, &after).len(), 1);
    }

    #[test]
    fn integer_and_float_with_same_value_are_equal() {
        let before = json!({"score": 1});
        let after = json!({"score": 1.0});
        assert!(diff_top_level(&before, &after).is_empty());
    }

    #[test]
    fn non_object_inputs_yield_empty_diff() {
        assert!(diff_top_level(&json!([1, 2]), &json!({"a": 1})).is_empty());
        assert!(diff_top_level(&Value::Null, &Value::Null).is_empty());
    }

    #[test]
    fn long_strings_are_truncated_with_total_length() {
        let long = "x".repeat(450);
        let summary = summarize(&json!(long));
        let text = summary.as_str().unwrap();
        assert!(text.starts_with(&"x".repeat(MAX_SUMMARY_STRING_CHARS)));
        assert!(text.ends_with("[truncated, 450 chars total]"));
    }

    #[test]
    fn truncation_respects_multibyte_characters() {
        let long = "é".repeat(300);
        let summary = summarize(&json!(long));
        assert!(summary.as_str().unwrap().contains("300 chars total"));
    }

    #[test]
    fn oversized_collections_collapse_to_markers() {
        let big_array = json!(vec![0; 21]);
        assert_eq!(summarize(&big_array), json!({"type": "array", "count": 21}));

        let mut wide = serde_json::Map::new();
        for i in 0..31 {
            wide.insert(format!("k{i}"), json!(i));
        }
        assert_eq!(
            summarize(&Value::Object(wide)),
            json!({"type": "object", "keyCount": 31})
        );
    }

    #[test]
    fn small_values_pass_through_unchanged() {
        let v = json!({"kept": [1, 2, 3], "name": "short"});
        assert_eq!(summarize(&v), v);
    }
}
