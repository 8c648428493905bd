//! Classifier + scaler artifact loading and inference (C4). The artifact
//! is two JSON files under `model.path`: `model.json`
//! (coefficients, intercept, feature order, and a fingerprint) and
//! `scaler.json` (per-feature mean/std for z-score normalization). Loaded
//! once at startup; `BotError::ModelIntegrity` on any shape mismatch so a
//! bad artifact fails fast instead of producing silently-wrong confidences.

use crate::error::BotError;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct ModelFile {
    feature_names: Vec<String>,
    coefficients: Vec<f64>,
    intercept: f64,
    symbol: String,
    timeframe: String,
    trained_at: DateTime<Utc>,
    fingerprint: String,
}

#[derive(Debug, Deserialize)]
struct ScalerFile {
    mean: Vec<f64>,
    std: Vec<f64>,
}

/// A loaded, ready-to-infer classifier. Binary logistic regression: the
/// positive class is "favorable long setup" at the trained symbol/timeframe;
/// the signal engine interprets the probability, it does not reinterpret
/// the model's class semantics.
pub struct ModelArtifact {
    pub feature_names: Vec<String>,
    pub symbol: String,
    pub timeframe: String,
    pub trained_at: DateTime<Utc>,
    pub fingerprint: String,
    coefficients: Array1<f64>,
    intercept: f64,
    mean: Array1<f64>,
    std: Array1<f64>,
}

impl ModelArtifact {
    pub fn load(dir: &Path) -> Result<Self, BotError> {
        let model_path = dir.join("model.json");
        let scaler_path = dir.join("scaler.json");

        let model_raw = std::fs::read_to_string(&model_path)
            .map_err(|e| BotError::ModelIntegrity(format!("cannot read {}: {e}", model_path.display())))?;
        let scaler_raw = std::fs::read_to_string(&scaler_path)
            .map_err(|e| BotError::ModelIntegrity(format!("cannot read {}: {e}", scaler_path.display())))?;

        let model: ModelFile = serde_json::from_str(&model_raw)
            .map_err(|e| BotError::ModelIntegrity(format!("malformed model.json: {e}")))?;
        let scaler: ScalerFile = serde_json::from_str(&scaler_raw)
            .map_err(|e| BotError::ModelIntegrity(format!("malformed scaler.json: {e}")))?;

        let n = model.feature_names.len();
        if model.coefficients.len() != n {
            return Err(BotError::ModelIntegrity(format!(
                "coefficient count {} does not match feature count {n}",
                model.coefficients.len()
            )));
        }
        if scaler.mean.len() != n || scaler.std.len() != n {
            return Err(BotError::ModelIntegrity(format!(
                "scaler shape ({}, {}) does not match feature count {n}",
                scaler.mean.len(),
                scaler.std.len()
            )));
        }
        if scaler.std.iter().any(|s| *s == 0.0) {
            return Err(BotError::ModelIntegrity("scaler has a zero standard deviation".into()));
        }

        Ok(ModelArtifact {
            feature_names: model.feature_names,
            symbol: model.symbol,
            timeframe: model.timeframe,
            trained_at: model.trained_at,
            fingerprint: model.fingerprint,
            coefficients: Array1::from(model.coefficients),
            intercept: model.intercept,
            mean: Array1::from(scaler.mean),
            std: Array1::from(scaler.std),
        })
    }

    /// `features` must already be ordered per `self.feature_names` — the
    /// caller gets that ordering from `IndicatorSnapshot::as_feature_vector`.
    /// Returns the model's estimated probability of the positive class.
    pub fn predict_proba(&self, features: &[f64]) -> Result<f64, BotError> {
        if features.len() != self.feature_names.len() {
            return Err(BotError::ModelIntegrity(format!(
                "feature vector length {} does not match model's {}",
                features.len(),
                self.feature_names.len()
            )));
        }
        let x = Array1::from(features.to_vec());
        let scaled = (&x - &self.mean) / &self.std;
        let z = scaled.dot(&self.coefficients) + self.intercept;
        Ok(sigmoid(z))
    }

    /// Batch variant used by the backtest harness to score a whole run in
    /// one pass; semantically identical to repeated `predict_proba` calls.
    pub fn predict_proba_batch(&self, rows: &Array2<f64>) -> Result<Vec<f64>, BotError> {
        if rows.ncols() != self.feature_names.len() {
            return Err(BotError::ModelIntegrity(format!(
                "row width {} does not match model's {}",
                rows.ncols(),
                self.feature_names.len()
            )));
        }
        let mut out = Vec::with_capacity(rows.nrows());
        for row in rows.rows() {
            let scaled = (&row.to_owned() - &self.mean) / &self.std;
            let z = scaled.dot(&self.coefficients) + self.intercept;
            out.push(sigmoid(z));
        }
        Ok(out)
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Test-only constructor used by other modules' unit tests (`signal.rs`) to
/// build a `ModelArtifact` with known coefficients without touching disk.
#[cfg(test)]
pub(crate) mod test_support {
    use super::ModelArtifact;
    use chrono::Utc;
    use ndarray::Array1;

    pub fn build(feature_names: Vec<String>, coefficients: Vec<f64>, intercept: f64) -> ModelArtifact {
        let n = feature_names.len();
        ModelArtifact {
            feature_names,
            symbol: "TESTUSDT".into(),
            timeframe: "15".into(),
            trained_at: Utc::now(),
            fingerprint: "test".into(),
            coefficients: Array1::from(coefficients),
            intercept,
            mean: Array1::from(vec![0.0; n]),
            std: Array1::from(vec![1.0; n]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> ModelArtifact {
        ModelArtifact {
            feature_names: vec!["a".into(), "b".into()],
            symbol: "BTCUSDT".into(),
            timeframe: "15".into(),
            trained_at: Utc::now(),
            fingerprint: "test".into(),
            coefficients: Array1::from(vec![1.0, -1.0]),
            intercept: 0.0,
            mean: Array1::from(vec![0.0, 0.0]),
            std: Array1::from(vec![1.0, 1.0]),
        }
    }

    #[test]
    fn predict_proba_matches_manual_sigmoid() {
        let m = artifact();
        let p = m.predict_proba(&[2.0, 1.0]).unwrap();
        let expected = sigmoid(1.0);
        assert!((p - expected).abs() < 1e-9);
    }

    #[test]
    fn wrong_length_feature_vector_is_integrity_error() {
        let m = artifact();
        let err = m.predict_proba(&[1.0]).unwrap_err();
        matches!(err, BotError::ModelIntegrity(_));
    }

    #[test]
    fn batch_matches_single_row_predictions() {
        let m = artifact();
        let rows = Array2::from_shape_vec((2, 2), vec![1.0, 1.0, -1.0, 2.0]).unwrap();
        let batch = m.predict_proba_batch(&rows).unwrap();
        let single_a = m.predict_proba(&[1.0, 1.0]).unwrap();
        let single_b = m.predict_proba(&[-1.0, 2.0]).unwrap();
        assert!((batch[0] - single_a).abs() < 1e-9);
        assert!((batch[1] - single_b).abs() < 1e-9);
    }
}
