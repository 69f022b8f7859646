use crate::models::config_types::{BackendKind, Device, LocalModelConfig};
use crate::services::catalog::LabelCatalog;
use crate::services::classifier::inference::{self, INPUT_SIZE};
use crate::services::classifier::{Classifier, InferenceError, ScoreDistribution};
use crate::services::image_service::ImageInput;
use ndarray::Array4;
use ort::session::Session;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("Model file not found: {0}")]
    WeightsNotFound(PathBuf),

    #[error("Failed to {stage}: {message}")]
    Session { stage: &'static str, message: String },

    #[error("Model has no inputs")]
    NoInputs,

    #[error("Model '{architecture}' produces {actual} classes but the catalog has {expected}")]
    ClassCountMismatch {
        architecture: String,
        expected: usize,
        actual: usize,
    },

    #[error("Model probe run failed: {0}")]
    Probe(#[source] InferenceError),
}

fn session_err<E: std::fmt::Display>(stage: &'static str) -> impl FnOnce(E) -> ModelLoadError {
    move |e| ModelLoadError::Session {
        stage,
        message: e.to_string(),
    }
}

/// ONNX Runtime classifier over a fixed label catalog.
///
/// The session lives behind a mutex because a forward pass needs `&mut`;
/// preprocessing happens before the lock is taken.
pub struct LocalClassifier {
    session: Mutex<Session>,
    input_name: String,
    catalog: Arc<LabelCatalog>,
    architecture: String,
}

impl LocalClassifier {
    /// Build the session, place it on the requested device and check that
    /// its output width matches the catalog. Blocking; run once at startup.
    pub fn load(
        config: &LocalModelConfig,
        catalog: Arc<LabelCatalog>,
    ) -> Result<Self, ModelLoadError> {
        if !config.weights.exists() {
            return Err(ModelLoadError::WeightsNotFound(config.weights.clone()));
        }

        let start = Instant::now();
        info!(
            architecture = %config.architecture,
            weights = %config.weights.display(),
            device = ?config.device,
            classes = catalog.len(),
            "Loading model"
        );

        let _ = ort::init().with_name("poke-lens").commit();

        let mut builder = Session::builder()
            .map_err(session_err("create session builder"))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(session_err("set optimization level"))?
            .with_intra_threads(4)
            .map_err(session_err("set intra threads"))?;

        builder = match config.device {
            Device::Auto => builder
                .with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default().build(),
                    ort::execution_providers::CoreMLExecutionProvider::default().build(),
                    ort::execution_providers::CPUExecutionProvider::default().build(),
                ])
                .map_err(session_err("register accelerator execution providers"))?,
            Device::Cpu => builder
                .with_execution_providers([
                    ort::execution_providers::CPUExecutionProvider::default().build(),
                ])
                .map_err(session_err("register CPU execution provider"))?,
        };

        let mut session = builder
            .commit_from_file(&config.weights)
            .map_err(session_err("load ONNX model"))?;

        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .ok_or(ModelLoadError::NoInputs)?;

        // Probe with a blank image so a head sized for another catalog fails here.
        let size = INPUT_SIZE as usize;
        let probe = inference::run_session(
            &mut session,
            &input_name,
            Array4::zeros((1, 3, size, size)),
        )
        .map_err(ModelLoadError::Probe)?;

        if probe.len() != catalog.len() {
            return Err(ModelLoadError::ClassCountMismatch {
                architecture: config.architecture.clone(),
                expected: catalog.len(),
                actual: probe.len(),
            });
        }

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Model loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            catalog,
            architecture: config.architecture.clone(),
        })
    }

    pub fn catalog(&self) -> &LabelCatalog {
        &self.catalog
    }
}

impl Classifier for LocalClassifier {
    fn infer(&self, input: &ImageInput, _top_k: usize) -> Result<ScoreDistribution, InferenceError> {
        let tensor = inference::preprocess(&input.image);

        let start = Instant::now();
        let logits = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| InferenceError::Session("model lock poisoned".to_string()))?;
            inference::run_session(&mut session, &self.input_name, tensor)?
        };
        debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Forward pass done");

        let probabilities = inference::softmax(&logits);
        ScoreDistribution::from_probabilities(&self.catalog, &probabilities)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn model_id(&self) -> &str {
        &self.architecture
    }
}
