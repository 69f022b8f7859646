use crate::models::classify_types::{HealthStatus, Prediction};
use crate::models::config_types::{BackendKind, PipelineConfig};
use crate::services::catalog::{CatalogLoadError, LabelCatalog};
use crate::services::classifier::model_manager::{LocalClassifier, ModelLoadError};
use crate::services::classifier::remote::{RemoteClassifier, RemoteInferenceError};
use crate::services::classifier::{Classifier, InferenceError, ScoreDistribution};
use crate::services::fs_service;
use crate::services::image_service::{self, DecodeError, ImageSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Failure of a single `predict` call.
#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("Pipeline not initialized: {0}")]
    NotInitialized(String),

    #[error("top_k must be at least 1")]
    InvalidTopK,

    #[error("Failed to stage upload: {0}")]
    Scratch(#[source] std::io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// Why a backend could not be brought up at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Catalog(#[from] CatalogLoadError),

    #[error(transparent)]
    Model(#[from] ModelLoadError),

    #[error(transparent)]
    Remote(#[from] RemoteInferenceError),
}

pub enum PipelineState {
    Ready(Arc<dyn Classifier>),
    /// Startup failed; every `predict` is rejected until the process restarts.
    Unavailable { reason: String },
}

/// Decode → backend → top-K ranking, with failures folded into `PredictionError`.
///
/// Built once at startup and shared behind an `Arc`. Dropping it releases
/// the model session or HTTP client.
pub struct InferencePipeline {
    backend: BackendKind,
    state: PipelineState,
    scratch_dir: Option<PathBuf>,
}

impl InferencePipeline {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            backend: classifier.kind(),
            state: PipelineState::Ready(classifier),
            scratch_dir: None,
        }
    }

    pub fn unavailable(backend: BackendKind, reason: impl Into<String>) -> Self {
        Self {
            backend,
            state: PipelineState::Unavailable {
                reason: reason.into(),
            },
            scratch_dir: None,
        }
    }

    pub fn with_scratch_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.scratch_dir = dir;
        self
    }

    /// Load the configured backend. A failure leaves the pipeline in the
    /// unavailable state instead of aborting the caller.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let pipeline = match load_classifier(config) {
            Ok(classifier) => {
                info!(backend = %config.backend, model = classifier.model_id(), "Pipeline ready");
                Self::new(classifier)
            }
            Err(e) => {
                error!(backend = %config.backend, "Pipeline initialization failed: {}", e);
                warn!("The service will start but predictions will not work");
                Self::unavailable(config.backend, e.to_string())
            }
        };
        pipeline.with_scratch_dir(config.scratch_dir.clone())
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, PipelineState::Ready(_))
    }

    pub fn health(&self) -> HealthStatus {
        let (model_loaded, model, error) = match &self.state {
            PipelineState::Ready(classifier) => (true, Some(classifier.model_id().to_string()), None),
            PipelineState::Unavailable { reason } => (false, None, Some(reason.clone())),
        };
        HealthStatus {
            status: "healthy",
            backend: self.backend,
            model_loaded,
            model,
            error,
        }
    }

    /// Classify one image and return at most `top_k` predictions, best first.
    pub fn predict(
        &self,
        source: ImageSource,
        top_k: usize,
    ) -> Result<Vec<Prediction>, PredictionError> {
        let classifier = match &self.state {
            PipelineState::Ready(classifier) => classifier,
            PipelineState::Unavailable { reason } => {
                return Err(PredictionError::NotInitialized(reason.clone()))
            }
        };
        if top_k == 0 {
            return Err(PredictionError::InvalidTopK);
        }

        let start = Instant::now();

        // `_scratch` deletes the spooled upload when this call returns, on any path.
        let (path, fallback, _scratch) = match source {
            ImageSource::Path(path) => (path, None, None),
            ImageSource::Upload {
                bytes,
                mime_type,
                file_name,
            } => {
                let scratch = fs_service::spool_upload(
                    &bytes,
                    file_name.as_deref(),
                    self.scratch_dir.as_deref(),
                )
                .map_err(PredictionError::Scratch)?;
                let fallback = mime_type.as_deref().and_then(image_service::format_from_mime);
                (scratch.path().to_path_buf(), fallback, Some(scratch))
            }
        };

        let input = image_service::load_image(&path, fallback)?;
        let distribution = classifier.infer(&input, top_k)?;
        let predictions = rank(distribution, top_k);

        debug!(
            backend = %self.backend,
            width = input.width(),
            height = input.height(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Prediction complete"
        );
        Ok(predictions)
    }
}

fn load_classifier(config: &PipelineConfig) -> Result<Arc<dyn Classifier>, StartupError> {
    match config.backend {
        BackendKind::Local => {
            let catalog = Arc::new(LabelCatalog::load(&config.class_names)?);
            Ok(Arc::new(LocalClassifier::load(&config.local, catalog)?))
        }
        BackendKind::Remote => Ok(Arc::new(RemoteClassifier::new(&config.remote)?)),
    }
}

/// Top `min(top_k, len)` entries by descending confidence. Ties keep
/// distribution order.
pub fn rank(distribution: ScoreDistribution, top_k: usize) -> Vec<Prediction> {
    let mut scores = distribution.into_scores();
    scores.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    scores.truncate(top_k);
    scores
        .into_iter()
        .map(|s| Prediction::new(s.label, s.confidence, s.index))
        .collect()
}
