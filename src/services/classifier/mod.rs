pub mod inference;
pub mod model_manager;
pub mod remote;

use crate::models::config_types::BackendKind;
use crate::services::catalog::LabelCatalog;
use crate::services::image_service::ImageInput;
use remote::RemoteInferenceError;
use thiserror::Error;

/// A backend that turns one image into a label distribution.
///
/// Implementations are shared across request threads, so `infer` takes
/// `&self` and must be safe to call concurrently.
pub trait Classifier: Send + Sync {
    /// `top_k` is a hint; backends may return more entries than requested.
    fn infer(&self, input: &ImageInput, top_k: usize) -> Result<ScoreDistribution, InferenceError>;

    fn kind(&self) -> BackendKind;

    fn model_id(&self) -> &str;
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Inference failed: {0}")]
    Session(String),

    #[error("Model produced no outputs")]
    NoOutput,

    #[error("Model returned {actual} scores for {expected} classes")]
    ClassCountMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Remote(#[from] RemoteInferenceError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub label: String,
    pub confidence: f32,
    pub index: Option<usize>,
}

/// Per-label confidences in backend order (catalog order for the local
/// backend, reply order for the remote one).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreDistribution {
    scores: Vec<Score>,
}

impl ScoreDistribution {
    /// One entry per catalog label; `probabilities` must match the catalog length.
    pub fn from_probabilities(
        catalog: &LabelCatalog,
        probabilities: &[f32],
    ) -> Result<Self, InferenceError> {
        if probabilities.len() != catalog.len() {
            return Err(InferenceError::ClassCountMismatch {
                expected: catalog.len(),
                actual: probabilities.len(),
            });
        }

        let scores = catalog
            .iter()
            .zip(probabilities)
            .enumerate()
            .map(|(index, (label, &confidence))| Score {
                label: label.to_string(),
                confidence,
                index: Some(index),
            })
            .collect();
        Ok(Self { scores })
    }

    pub fn from_named<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, f32)>,
        S: Into<String>,
    {
        Self {
            scores: entries
                .into_iter()
                .map(|(label, confidence)| Score {
                    label: label.into(),
                    confidence,
                    index: None,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn total(&self) -> f32 {
        self.scores.iter().map(|s| s.confidence).sum()
    }

    pub fn scores(&self) -> &[Score] {
        &self.scores
    }

    pub fn into_scores(self) -> Vec<Score> {
        self.scores
    }
}
