use crate::services::catalog::CatalogLoadError;
use crate::services::classifier::model_manager::ModelLoadError;
use crate::services::classifier::remote::RemoteInferenceError;
use crate::services::pipeline::PredictionError;
use serde::Serialize;
use std::fmt;

/// Error surface handed to the CLI and HTTP front ends: a single message.
#[derive(Debug, Serialize)]
pub struct AppError {
    pub message: String,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError {
            message: err.to_string(),
        }
    }
}

impl From<PredictionError> for AppError {
    fn from(err: PredictionError) -> Self {
        AppError {
            message: format!("Prediction failed: {}", err),
        }
    }
}

impl From<CatalogLoadError> for AppError {
    fn from(err: CatalogLoadError) -> Self {
        AppError {
            message: err.to_string(),
        }
    }
}

impl From<ModelLoadError> for AppError {
    fn from(err: ModelLoadError) -> Self {
        AppError {
            message: err.to_string(),
        }
    }
}

impl From<RemoteInferenceError> for AppError {
    fn from(err: RemoteInferenceError) -> Self {
        AppError {
            message: err.to_string(),
        }
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError { message: msg }
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError {
            message: msg.to_string(),
        }
    }
}
