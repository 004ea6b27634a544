//! Engagement-level prediction over gamer behavior profiles. The model is a
//! pre-trained artifact loaded at startup; inference is pure CPU work and
//! never touches storage.

mod encoder;
mod model;

pub use encoder::UserProfile;
pub use model::{EngagementModel, ModelArtifact, Vocabularies, FEATURE_COUNT};

use crate::error::Result;
use serde::Serialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
    pub flags: Vec<String>,
}

pub struct Predictor {
    model: EngagementModel,
}

impl Predictor {
    /// Missing or malformed artifacts surface here, at startup, not per call.
    pub fn from_path(path: &Path) -> Result<Self> {
        Ok(Self {
            model: EngagementModel::load(path)?,
        })
    }

    pub fn new(model: EngagementModel) -> Self {
        Self { model }
    }

    pub fn predict(&self, profile: &UserProfile) -> Result<Prediction> {
        let (features, flags) = encoder::encode(profile, self.model.vocab())?;
        let (label, confidence) = self.model.predict(&features);
        info!(label, confidence, flags = flags.len(), "profile scored");
        Ok(Prediction {
            label: label.to_string(),
            confidence,
            flags,
        })
    }
}
