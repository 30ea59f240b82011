//! Canonical cache keys.

use serde_json::{Number, Value};
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// SHA-256 hex key over a request type and its parameters.
///
/// Object keys are sorted. Integers are rendered exactly and floats in their
/// shortest round-trip form, so `{"a": 5, "b": 1}` and `{"b": 1.0, "a": 5.000}`
/// produce the same key while `1e-7` and `4e-7` do not. Array order is kept.
pub fn canonical_key(request_type: &str, params: &Value) -> String {
    let mut rendered = String::with_capacity(64);
    render(params, &mut rendered);

    let mut hasher = Sha256::new();
    hasher.update(request_type.as_bytes());
    hasher.update(b"\n");
    hasher.update(rendered.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn render(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => render_number(n, out),
        Value::String(s) => push_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                render(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_string(key, out);
                out.push(':');
                render(item, out);
            }
            out.push('}');
        }
    }
}

fn render_number(n: &Number, out: &mut String) {
    if let Some(i) = n.as_i64() {
        let _ = write!(out, "{}", i);
    } else if let Some(u) = n.as_u64() {
        let _ = write!(out, "{}", u);
    } else if let Some(x) = n.as_f64() {
        // -0.0 and 0.0 are the same parameter. Display prints integral
        // floats without a fraction, matching the integer spelling.
        let x = if x == 0.0 { 0.0 } else { x };
        let _ = write!(out, "{}", x);
    }
}

fn push_string(s: &str, out: &mut String) {
    // Serializing a string cannot fail; quoting keeps `"1"` apart from `1`.
    out.push_str(&serde_json::to_string(s).unwrap_or_default());
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{Map, json};

    proptest! {
        /// Inserting the same fields in any order yields the same key.
        #[test]
        fn key_ignores_field_order(fields in prop::collection::btree_map("[a-z]{1,8}", any::<i32>(), 0..8)) {
            let forward: Map<String, Value> = fields.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let backward: Map<String, Value> = fields.iter().rev().map(|(k, v)| (k.clone(), json!(v))).collect();
            prop_assert_eq!(
                canonical_key("t", &Value::Object(forward)),
                canonical_key("t", &Value::Object(backward))
            );
        }

        /// Integers and their float spelling share a key.
        #[test]
        fn integer_and_float_collide(n in -1_000_000i64..1_000_000) {
            prop_assert_eq!(
                canonical_key("t", &json!({"n": n})),
                canonical_key("t", &json!({"n": n as f64}))
            );
        }

        /// Keys are always 64 hex characters.
        #[test]
        fn key_is_hex(request_type in ".{0,20}", s in ".{0,40}") {
            let key = canonical_key(&request_type, &json!([s]));
            prop_assert_eq!(key.len(), 64);
            prop_assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
