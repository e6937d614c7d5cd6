//! Built-in scoring function used by the binary.

use std::collections::BTreeMap;

use ballast_core::{ScoreOutput, Scorer, ScoringError};
use serde_json::{json, Value};

/// Weighted sum over the numeric top-level fields of an object payload.
///
/// Fields without a weight count with weight 1. A non-object payload, or a
/// weighted field holding a non-number, is a scoring error.
#[derive(Debug, Clone, Default)]
pub struct LinearScorer {
    weights: BTreeMap<String, f64>,
}

impl LinearScorer {
    pub fn new(weights: BTreeMap<String, f64>) -> Self {
        Self { weights }
    }
}

impl Scorer for LinearScorer {
    fn score(&self, input: &Value) -> Result<ScoreOutput, ScoringError> {
        let fields = input
            .as_object()
            .ok_or_else(|| ScoringError::new("payload must be a JSON object"))?;

        for name in self.weights.keys() {
            if let Some(value) = fields.get(name) {
                if !value.is_number() {
                    return Err(ScoringError::new(format!("field {} must be numeric", name)));
                }
            }
        }

        let mut used = 0usize;
        let score: f64 = fields
            .iter()
            .filter_map(|(name, value)| {
                let x = value.as_f64()?;
                used += 1;
                Some(x * self.weights.get(name).copied().unwrap_or(1.0))
            })
            .sum();

        Ok(ScoreOutput::new(json!({
            "score": score,
            "features_used": used,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_sum() {
        let scorer = LinearScorer::new(BTreeMap::from([("a".to_string(), 2.0)]));
        let out = scorer.score(&json!({"a": 1.5, "b": 1, "label": "x"})).unwrap();
        assert_eq!(out.as_value()["score"], json!(4.0));
        assert_eq!(out.as_value()["features_used"], json!(2));
    }

    #[test]
    fn test_rejects_bad_input() {
        let scorer = LinearScorer::new(BTreeMap::from([("a".to_string(), 1.0)]));
        assert!(scorer.score(&json!([1, 2])).is_err());
        assert!(scorer.score(&json!({"a": "high"})).is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_unweighted_score_is_field_sum(
            fields in proptest::collection::btree_map("[a-z]{1,6}", -1000i64..1000, 0..12)
        ) {
            let payload: serde_json::Map<String, Value> =
                fields.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let out = LinearScorer::default().score(&Value::Object(payload)).unwrap();
            let expected: i64 = fields.values().sum();
            proptest::prop_assert_eq!(out.as_value()["score"].as_f64(), Some(expected as f64));
            proptest::prop_assert_eq!(out.as_value()["features_used"].as_u64(), Some(fields.len() as u64));
        }
    }
}
