// Classifier contract and artifact loading.
//
// Training happens offline and produces a serialized artifact; at
// runtime only the scoring contract matters: a probability vector over
// {legitimate, impersonation, bot} aligned to the shared feature order.
// The scorer is constructed once, injected into the engine, and treated
// as read-only thereafter.

use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::features::{FeatureVector, FEATURE_COUNT};

pub const CLASS_COUNT: usize = 3;

/// Hard class prediction for an attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassLabel {
    Legitimate,
    Impersonation,
    Bot,
}

impl ClassLabel {
    pub fn from_index(index: usize) -> ClassLabel {
        match index {
            1 => ClassLabel::Impersonation,
            2 => ClassLabel::Bot,
            _ => ClassLabel::Legitimate,
        }
    }
}

/// A trained scorer over the fixed feature order.
///
/// Probabilities are `[p_legitimate, p_impersonation, p_bot]`. Safe for
/// concurrent reads: implementations hold no per-call mutable state.
pub trait Scorer: Send + Sync {
    fn predict_proba(&self, features: &FeatureVector) -> [f64; CLASS_COUNT];

    fn predict(&self, features: &FeatureVector) -> ClassLabel {
        let probs = self.predict_proba(features);
        let mut best = 0;
        for (index, p) in probs.iter().enumerate() {
            if *p > probs[best] {
                best = index;
            }
        }
        ClassLabel::from_index(best)
    }

    /// Per-feature importance aligned to [`crate::features::FEATURE_NAMES`].
    fn feature_importances(&self) -> [f64; FEATURE_COUNT];
}

/// On-disk shape of a trained model: a feature scaler plus per-class
/// linear weights whose logits are softmaxed into probabilities.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: u32,
    pub feature_names: Vec<String>,
    pub scaler_mean: Vec<f64>,
    pub scaler_std: Vec<f64>,
    pub weights: Vec<Vec<f64>>, // CLASS_COUNT rows of FEATURE_COUNT
    pub intercepts: Vec<f64>,   // CLASS_COUNT
}

impl ModelArtifact {
    fn check_shape(&self) -> Result<(), ModelError> {
        if self.scaler_mean.len() != FEATURE_COUNT || self.scaler_std.len() != FEATURE_COUNT {
            return Err(ModelError::ShapeMismatch(format!(
                "scaler length {}/{}, expected {}",
                self.scaler_mean.len(),
                self.scaler_std.len(),
                FEATURE_COUNT
            )));
        }
        if self.weights.len() != CLASS_COUNT
            || self.weights.iter().any(|row| row.len() != FEATURE_COUNT)
        {
            return Err(ModelError::ShapeMismatch(format!(
                "weight matrix is not {}x{}",
                CLASS_COUNT, FEATURE_COUNT
            )));
        }
        if self.intercepts.len() != CLASS_COUNT {
            return Err(ModelError::ShapeMismatch(format!(
                "{} intercepts, expected {}",
                self.intercepts.len(),
                CLASS_COUNT
            )));
        }
        // A missing, renamed, or reordered feature list means the
        // artifact cannot prove it was trained against this synthesis
        // path; feature order is the one invariant never taken on trust
        let aligned = self.feature_names.len() == FEATURE_COUNT
            && self
                .feature_names
                .iter()
                .zip(crate::features::FEATURE_NAMES.iter())
                .all(|(a, b)| a == b);
        if !aligned {
            return Err(ModelError::ShapeMismatch(
                "artifact feature names missing or misaligned with engine feature order"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// A model artifact loaded into memory and ready to score.
pub struct LoadedModel {
    artifact: ModelArtifact,
}

impl LoadedModel {
    /// Load and validate an artifact from disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<LoadedModel, ModelError> {
        let raw = fs::read_to_string(path.as_ref())?;
        let artifact: ModelArtifact = serde_json::from_str(&raw)?;
        artifact.check_shape()?;
        info!(
            "loaded risk model v{} from {}",
            artifact.version,
            path.as_ref().display()
        );
        Ok(LoadedModel { artifact })
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Result<LoadedModel, ModelError> {
        artifact.check_shape()?;
        Ok(LoadedModel { artifact })
    }

    fn scaled(&self, features: &FeatureVector) -> [f64; FEATURE_COUNT] {
        let mut scaled = [0.0; FEATURE_COUNT];
        for i in 0..FEATURE_COUNT {
            let std = self.artifact.scaler_std[i];
            let centered = features[i] - self.artifact.scaler_mean[i];
            scaled[i] = if std.abs() < 1e-9 { 0.0 } else { centered / std };
        }
        scaled
    }
}

impl Scorer for LoadedModel {
    fn predict_proba(&self, features: &FeatureVector) -> [f64; CLASS_COUNT] {
        let scaled = self.scaled(features);

        let mut logits = [0.0; CLASS_COUNT];
        for (class, row) in self.artifact.weights.iter().enumerate() {
            let mut logit = self.artifact.intercepts[class];
            for (weight, value) in row.iter().zip(scaled.iter()) {
                logit += weight * value;
            }
            logits[class] = logit;
        }

        // Softmax, shifted by the max logit for numeric stability
        let max_logit = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mut probs = [0.0; CLASS_COUNT];
        let mut total = 0.0;
        for (p, logit) in probs.iter_mut().zip(logits.iter()) {
            *p = (logit - max_logit).exp();
            total += *p;
        }
        for p in probs.iter_mut() {
            *p /= total;
        }
        probs
    }

    fn feature_importances(&self) -> [f64; FEATURE_COUNT] {
        // Mean absolute weight across classes, normalized to sum to 1
        let mut importances = [0.0; FEATURE_COUNT];
        for row in &self.artifact.weights {
            for (imp, weight) in importances.iter_mut().zip(row.iter()) {
                *imp += weight.abs() / CLASS_COUNT as f64;
            }
        }
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for imp in importances.iter_mut() {
                *imp /= total;
            }
        }
        importances
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::uniform_artifact;

    #[test]
    fn test_probabilities_sum_to_one() {
        let model = LoadedModel::from_artifact(uniform_artifact()).unwrap();
        let probs = model.predict_proba(&[0.5; FEATURE_COUNT]);
        let total: f64 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_intercepts_steer_prediction() {
        let mut artifact = uniform_artifact();
        artifact.intercepts = vec![0.0, 0.0, 4.0];
        let model = LoadedModel::from_artifact(artifact).unwrap();
        assert_eq!(model.predict(&[0.0; FEATURE_COUNT]), ClassLabel::Bot);
        let probs = model.predict_proba(&[0.0; FEATURE_COUNT]);
        assert!(probs[2] > 0.9);
    }

    #[test]
    fn test_weights_respond_to_features() {
        let mut artifact = uniform_artifact();
        // Impersonation class keyed on the dwell deviation slot (12)
        artifact.weights[1][12] = 3.0;
        let model = LoadedModel::from_artifact(artifact).unwrap();

        let mut features = [0.0; FEATURE_COUNT];
        features[12] = 5.0;
        assert_eq!(model.predict(&features), ClassLabel::Impersonation);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut artifact = uniform_artifact();
        artifact.scaler_mean.pop();
        assert!(matches!(
            LoadedModel::from_artifact(artifact),
            Err(ModelError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_reordered_feature_names_rejected() {
        let mut artifact = uniform_artifact();
        artifact.feature_names.swap(0, 1);
        assert!(matches!(
            LoadedModel::from_artifact(artifact),
            Err(ModelError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_artifact_without_feature_names_rejected() {
        let mut artifact = uniform_artifact();
        artifact.feature_names.clear();
        assert!(matches!(
            LoadedModel::from_artifact(artifact),
            Err(ModelError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_load_from_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(
            &path,
            serde_json::to_string(&uniform_artifact()).unwrap(),
        )
        .unwrap();

        let model = LoadedModel::from_path(&path).unwrap();
        let importances = model.feature_importances();
        assert_eq!(importances.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            LoadedModel::from_path("/nonexistent/model.json"),
            Err(ModelError::Io(_))
        ));
    }
}
