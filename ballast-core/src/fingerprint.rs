//! Request fingerprints.
//!
//! A fingerprint is a SHA-256 digest over a canonical encoding of the request
//! class and payload. The canonical encoding sorts object keys at every depth
//! and writes integral floats as integers, so `{"b":1,"a":2.0}` and
//! `{"a":2,"b":1}` share a fingerprint.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a hex-encoded fingerprint.
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// Largest integer an f64 represents exactly.
const MAX_EXACT_F64_INT: f64 = 9_007_199_254_740_992.0;

/// Deterministic digest of a normalized request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a payload within a request class.
    pub fn compute(class: &str, payload: &Value) -> Self {
        let mut canonical = Vec::with_capacity(128);
        write_canonical(&mut canonical, &Value::String(class.to_string()));
        canonical.push(b'\n');
        write_canonical(&mut canonical, payload);

        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Self(hex::encode(hasher.finalize()))
    }

    /// Parse a previously rendered fingerprint.
    ///
    /// Returns `None` unless the input is exactly 64 lowercase hex digits.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == FINGERPRINT_HEX_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Write the canonical byte encoding of `value` into `out`.
pub fn write_canonical(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        Value::Number(n) => {
            let integral = n
                .as_f64()
                .filter(|f| n.is_f64() && f.is_finite() && f.fract() == 0.0)
                .filter(|f| f.abs() < MAX_EXACT_F64_INT);
            match integral {
                Some(f) => out.extend_from_slice((f as i64).to_string().as_bytes()),
                None => out.extend_from_slice(n.to_string().as_bytes()),
            }
        }
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(out, item);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(out, key);
                out.push(b':');
                write_canonical(out, item);
            }
            out.push(b'}');
        }
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    // serde_json's string escaping is stable across versions
    match serde_json::to_vec(s) {
        Ok(encoded) => out.extend_from_slice(&encoded),
        Err(_) => out.extend_from_slice(s.as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = Fingerprint::compute("default", &json!({"a": 1}));
        assert_eq!(fp.as_str().len(), FINGERPRINT_HEX_LEN);
        assert!(Fingerprint::parse(fp.as_str()).is_some());
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": {"b": true, "a": [1, 2]}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": {"a": [1, 2], "b": true}, "x": 1}"#).unwrap();
        assert_eq!(
            Fingerprint::compute("default", &a),
            Fingerprint::compute("default", &b)
        );
    }

    #[test]
    fn test_array_order_matters() {
        assert_ne!(
            Fingerprint::compute("default", &json!([1, 2])),
            Fingerprint::compute("default", &json!([2, 1]))
        );
    }

    #[test]
    fn test_integral_float_normalized() {
        assert_eq!(
            Fingerprint::compute("default", &json!({"x": 2.0})),
            Fingerprint::compute("default", &json!({"x": 2}))
        );
        assert_ne!(
            Fingerprint::compute("default", &json!({"x": 2.5})),
            Fingerprint::compute("default", &json!({"x": 2}))
        );
    }

    #[test]
    fn test_class_separates_fingerprints() {
        let payload = json!({"x": 1});
        assert_ne!(
            Fingerprint::compute("default", &payload),
            Fingerprint::compute("batch", &payload)
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Fingerprint::parse("abc").is_none());
        assert!(Fingerprint::parse(&"G".repeat(64)).is_none());
        assert!(Fingerprint::parse(&"A".repeat(64)).is_none());
        assert!(Fingerprint::parse(&"a".repeat(64)).is_some());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Identical logical inputs produce the same fingerprint regardless of
        /// the order their fields were written in.
        #[test]
        fn prop_field_order_independent(
            fields in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12)
        ) {
            let forward: Vec<String> = fields
                .iter()
                .map(|(k, v)| format!("\"{}\":{}", k, v))
                .collect();
            let mut backward = forward.clone();
            backward.reverse();

            let a: Value = serde_json::from_str(&format!("{{{}}}", forward.join(","))).unwrap();
            let b: Value = serde_json::from_str(&format!("{{{}}}", backward.join(","))).unwrap();

            prop_assert_eq!(
                Fingerprint::compute("default", &a),
                Fingerprint::compute("default", &b)
            );
        }
    }
}
