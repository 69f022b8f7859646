pub mod commands;
pub mod error;
pub mod models;
pub mod services;

pub use models::classify_types::{HealthStatus, Prediction};
pub use models::config_types::{BackendKind, Device, PipelineConfig};
pub use services::catalog::LabelCatalog;
pub use services::classifier::{Classifier, ScoreDistribution};
pub use services::image_service::{ImageInput, ImageSource};
pub use services::pipeline::{InferencePipeline, PredictionError};
