use crate::models::config_types::BackendKind;
use serde::Serialize;

/// One ranked candidate as shown to users.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Prediction {
    pub class_name: String,
    /// Confidence with 4 decimals, e.g. "0.7000".
    pub confidence: String,
    /// Confidence as a percentage with 2 decimals, e.g. "70.00%".
    pub percentage: String,
    /// Position in the label catalog; only the local backend knows it.
    #[serde(skip)]
    pub class_index: Option<usize>,
    #[serde(skip)]
    pub score: f32,
}

impl Prediction {
    pub fn new(class_name: impl Into<String>, score: f32, class_index: Option<usize>) -> Self {
        Self {
            class_name: class_name.into(),
            confidence: format!("{:.4}", score),
            percentage: format!("{:.2}%", f64::from(score) * 100.0),
            class_index,
            score,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct PredictResponse {
    pub predictions: Vec<Prediction>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct HealthStatus {
    pub status: &'static str,
    pub backend: BackendKind,
    pub model_loaded: bool,
    pub model: Option<String>,
    pub error: Option<String>,
}
