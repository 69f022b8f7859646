use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REMOTE_ENDPOINT: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_REMOTE_MODEL: &str = "anthropic/claude-3.5-sonnet";
pub const DEFAULT_REFERER: &str = "https://pokemon-detector.vercel.app";
pub const DEFAULT_TITLE: &str = "Pokemon Detector Demo";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Remote,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Remote => write!(f, "remote"),
        }
    }
}

/// Where the local session runs. `Auto` tries accelerators before the CPU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Auto,
    Cpu,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalModelConfig {
    /// Architecture the ONNX weights were exported from, e.g. `convnext_base`.
    pub architecture: String,
    pub weights: PathBuf,
    #[serde(default)]
    pub device: Device,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub timeout_secs: u64,
    pub referer: String,
    pub title: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_REMOTE_MODEL.to_string(),
            endpoint: DEFAULT_REMOTE_ENDPOINT.to_string(),
            timeout_secs: 10,
            referer: DEFAULT_REFERER.to_string(),
            title: DEFAULT_TITLE.to_string(),
        }
    }
}

impl RemoteConfig {
    /// Reads `OPENROUTER_API_KEY`, `OPENROUTER_MODEL`, `OPENROUTER_ENDPOINT`
    /// and `OPENROUTER_REFERER`, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            api_key: var("OPENROUTER_API_KEY"),
            model: var("OPENROUTER_MODEL").unwrap_or(defaults.model),
            endpoint: var("OPENROUTER_ENDPOINT").unwrap_or(defaults.endpoint),
            timeout_secs: defaults.timeout_secs,
            referer: var("OPENROUTER_REFERER").unwrap_or(defaults.referer),
            title: defaults.title,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Everything needed to build an `InferencePipeline` at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub backend: BackendKind,
    pub class_names: PathBuf,
    pub local: LocalModelConfig,
    pub remote: RemoteConfig,
    /// Directory for upload scratch files; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            class_names: PathBuf::from("models/class_names.json"),
            local: LocalModelConfig {
                architecture: "convnext_base".to_string(),
                weights: PathBuf::from("models/best_model_fold1.onnx"),
                device: Device::Auto,
            },
            remote: RemoteConfig::default(),
            scratch_dir: None,
        }
    }
}
