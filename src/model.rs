//! Prediction-time feature contract.
//!
//! A trained predictor publishes the exact feature names it was fitted on.
//! Inputs are supplied by name and aligned into the fitted order before the
//! model sees them; any disagreement fails with the full list of missing and
//! unexpected names rather than the first one found.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("feature schema mismatch: missing {missing:?}, unexpected {unexpected:?}")]
    SchemaMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
}

pub trait Predictor {
    /// Feature names in fitted order.
    fn feature_names(&self) -> &[String];
    fn predict(&self, features: &[f64]) -> f64;
}

/// Orders named inputs into the expected layout. Fails when the supplied
/// names are not exactly the expected set.
pub fn align_feature_vector(
    expected: &[String],
    supplied: &HashMap<String, f64>,
) -> Result<Vec<f64>, ModelError> {
    let missing: Vec<String> = expected
        .iter()
        .filter(|name| !supplied.contains_key(*name))
        .cloned()
        .collect();
    let mut unexpected: Vec<String> = supplied
        .keys()
        .filter(|name| !expected.contains(name))
        .cloned()
        .collect();
    unexpected.sort();

    if !missing.is_empty() || !unexpected.is_empty() {
        return Err(ModelError::SchemaMismatch {
            missing,
            unexpected,
        });
    }

    Ok(expected.iter().map(|name| supplied[name]).collect())
}

/// Aligns named inputs against the predictor's contract, then predicts.
pub fn predict_named<P: Predictor>(
    predictor: &P,
    supplied: &HashMap<String, f64>,
) -> Result<f64, ModelError> {
    let features = align_feature_vector(predictor.feature_names(), supplied)?;
    Ok(predictor.predict(&features))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct WeightedSum {
        names: Vec<String>,
        weights: Vec<f64>,
    }

    impl Predictor for WeightedSum {
        fn feature_names(&self) -> &[String] {
            &self.names
        }

        fn predict(&self, features: &[f64]) -> f64 {
            features
                .iter()
                .zip(&self.weights)
                .map(|(value, weight)| value * weight)
                .sum()
        }
    }

    fn expected() -> Vec<String> {
        vec!["temp".to_string(), "humidity".to_string(), "aqi".to_string()]
    }

    #[test]
    fn aligns_supplied_values_into_expected_order() {
        let supplied = HashMap::from([
            ("aqi".to_string(), 2.0),
            ("temp".to_string(), 21.5),
            ("humidity".to_string(), 60.0),
        ]);

        let vector = align_feature_vector(&expected(), &supplied).unwrap();
        assert_eq!(vector, vec![21.5, 60.0, 2.0]);
    }

    #[test]
    fn mismatch_enumerates_both_missing_and_unexpected() {
        let supplied = HashMap::from([
            ("temp".to_string(), 21.5),
            ("wind_speed".to_string(), 3.4),
            ("clouds".to_string(), 40.0),
        ]);

        let err = align_feature_vector(&expected(), &supplied).unwrap_err();
        match err {
            ModelError::SchemaMismatch {
                missing,
                unexpected,
            } => {
                assert_eq!(missing, vec!["humidity".to_string(), "aqi".to_string()]);
                assert_eq!(
                    unexpected,
                    vec!["clouds".to_string(), "wind_speed".to_string()]
                );
            }
        }
    }

    #[test]
    fn predict_named_runs_the_aligned_vector() {
        let predictor = WeightedSum {
            names: expected(),
            weights: vec![1.0, 0.0, 10.0],
        };
        let supplied = HashMap::from([
            ("temp".to_string(), 21.5),
            ("humidity".to_string(), 60.0),
            ("aqi".to_string(), 2.0),
        ]);

        let prediction = predict_named(&predictor, &supplied).unwrap();
        assert_eq!(prediction, 21.5 + 20.0);
    }
}
