use crate::error::{AtlasError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::info;

/// Number of features the classifier was trained on; the encoder must produce
/// vectors of exactly this length.
pub const FEATURE_COUNT: usize = 11;

/// Category vocabularies fixed at training time. Values absent from a
/// vocabulary map to the unknown bucket (index = vocabulary length).
#[derive(Debug, Clone, Deserialize)]
pub struct Vocabularies {
    pub gender: Vec<String>,
    pub location: Vec<String>,
    pub game_genre: Vec<String>,
    pub game_difficulty: Vec<String>,
}

impl Vocabularies {
    pub fn encode(&self, field: &str, value: &str) -> f64 {
        let vocabulary = match field {
            "gender" => &self.gender,
            "location" => &self.location,
            "game_genre" => &self.game_genre,
            "game_difficulty" => &self.game_difficulty,
            _ => return 0.0,
        };
        vocabulary
            .iter()
            .position(|v| v.eq_ignore_ascii_case(value.trim()))
            .unwrap_or(vocabulary.len()) as f64
    }

    pub fn is_known(&self, field: &str, value: &str) -> bool {
        let vocabulary = match field {
            "gender" => &self.gender,
            "location" => &self.location,
            "game_genre" => &self.game_genre,
            "game_difficulty" => &self.game_difficulty,
            _ => return false,
        };
        vocabulary.iter().any(|v| v.eq_ignore_ascii_case(value.trim()))
    }
}

/// Serialized model produced by the training pipeline: a standardizing
/// multinomial linear classifier over the encoded profile features.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelArtifact {
    pub classes: Vec<String>,
    pub vocab: Vocabularies,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub weights: Vec<Vec<f64>>,
    pub biases: Vec<f64>,
}

#[derive(Debug)]
pub struct EngagementModel {
    artifact: ModelArtifact,
}

impl EngagementModel {
    /// Load the model artifact. Any failure here disables the prediction
    /// feature at startup with a clear status.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            AtlasError::ModelUnavailable(format!("cannot read '{}': {e}", path.display()))
        })?;
        let artifact: ModelArtifact = serde_json::from_str(&contents).map_err(|e| {
            AtlasError::ModelUnavailable(format!("cannot parse '{}': {e}", path.display()))
        })?;
        let model = Self::from_artifact(artifact)?;
        info!(model = %path.display(), classes = ?model.artifact.classes, "engagement model loaded");
        Ok(model)
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self> {
        let classes = artifact.classes.len();
        if classes == 0 {
            return Err(AtlasError::ModelUnavailable("no classes in artifact".into()));
        }
        if artifact.weights.len() != classes || artifact.biases.len() != classes {
            return Err(AtlasError::ModelUnavailable(format!(
                "weight/bias shape mismatch: {} classes, {} weight rows, {} biases",
                classes,
                artifact.weights.len(),
                artifact.biases.len()
            )));
        }
        if artifact.means.len() != FEATURE_COUNT
            || artifact.scales.len() != FEATURE_COUNT
            || artifact.weights.iter().any(|w| w.len() != FEATURE_COUNT)
        {
            return Err(AtlasError::ModelUnavailable(format!(
                "expected {FEATURE_COUNT} features per weight row"
            )));
        }
        if artifact.scales.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(AtlasError::ModelUnavailable("invalid feature scale".into()));
        }
        Ok(Self { artifact })
    }

    pub fn vocab(&self) -> &Vocabularies {
        &self.artifact.vocab
    }

    /// One inference pass: standardize, score per class, softmax.
    /// Returns the winning class name and its probability.
    pub fn predict(&self, features: &[f64; FEATURE_COUNT]) -> (&str, f64) {
        let standardized: Vec<f64> = features
            .iter()
            .zip(self.artifact.means.iter().zip(&self.artifact.scales))
            .map(|(x, (mean, scale))| (x - mean) / scale)
            .collect();

        let scores: Vec<f64> = self
            .artifact
            .weights
            .iter()
            .zip(&self.artifact.biases)
            .map(|(w, b)| w.iter().zip(&standardized).map(|(wi, xi)| wi * xi).sum::<f64>() + b)
            .collect();

        // Softmax with max-shift for numeric stability
        let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
        let total: f64 = exps.iter().sum();

        let mut best = 0;
        for (i, score) in scores.iter().enumerate() {
            if *score > scores[best] {
                best = i;
            }
        }
        (&self.artifact.classes[best], exps[best] / total)
    }
}

#[cfg(test)]
pub(crate) fn test_artifact() -> ModelArtifact {
    // Tiny hand-built model: the play-time feature (index 4) dominates, so
    // high play time -> High, low -> Low, middling -> Medium.
    let mut high = vec![0.0; FEATURE_COUNT];
    high[4] = 2.0;
    let mut low = vec![0.0; FEATURE_COUNT];
    low[4] = -2.0;
    let medium = vec![0.0; FEATURE_COUNT];
    ModelArtifact {
        classes: vec!["High".into(), "Low".into(), "Medium".into()],
        vocab: Vocabularies {
            gender: vec!["Female".into(), "Male".into()],
            location: vec!["Asia".into(), "Europe".into(), "USA".into()],
            game_genre: vec!["Action".into(), "RPG".into(), "Strategy".into()],
            game_difficulty: vec!["Easy".into(), "Hard".into(), "Medium".into()],
        },
        means: vec![30.0, 1.0, 1.0, 1.0, 10.0, 0.5, 1.0, 5.0, 60.0, 10.0, 10.0],
        scales: vec![10.0, 1.0, 1.0, 1.0, 5.0, 0.5, 1.0, 3.0, 30.0, 10.0, 10.0],
        weights: vec![high, low, medium],
        biases: vec![0.0, 0.0, 0.0],
    }
}
