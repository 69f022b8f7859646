use crate::commands::http::{self, AppState};
use crate::models::classify_types::Prediction;
use crate::models::config_types::{BackendKind, Device, LocalModelConfig, PipelineConfig, RemoteConfig};
use crate::services::fs_service;
use crate::services::image_service::ImageSource;
use crate::services::pipeline::InferencePipeline;
use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Identify Pokemon in images
#[derive(Parser, Debug)]
#[command(name = "poke")]
#[command(version)]
#[command(about = "Identify which Pokemon appears in an image", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify one or more images (directories expand to their images)
    Predict(PredictArgs),

    /// Run the web upload form and JSON API
    Serve(ServeArgs),
}

/// Backend selection shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Classifier backend
    #[arg(long, value_enum, env = "POKE_BACKEND", default_value = "local")]
    pub backend: BackendKind,

    /// Model architecture the weights were exported from
    #[arg(long, env = "POKE_MODEL", default_value = "convnext_base")]
    pub model: String,

    /// Path to the ONNX model weights
    #[arg(long, env = "POKE_WEIGHTS", default_value = "models/best_model_fold1.onnx")]
    pub weights: PathBuf,

    /// Path to the class names JSON file
    #[arg(long, env = "POKE_CLASS_NAMES", default_value = "models/class_names.json")]
    pub class_names_path: PathBuf,

    /// Compute device for the local backend
    #[arg(long, value_enum, default_value = "auto")]
    pub device: Device,

    /// OpenRouter API key for the remote backend
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Remote model identifier
    #[arg(long, env = "OPENROUTER_MODEL", default_value = crate::models::config_types::DEFAULT_REMOTE_MODEL)]
    pub remote_model: String,

    /// Remote chat-completions base URL
    #[arg(long, env = "OPENROUTER_ENDPOINT", default_value = crate::models::config_types::DEFAULT_REMOTE_ENDPOINT)]
    pub remote_endpoint: String,

    /// Remote request timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub remote_timeout: u64,
}

impl ModelArgs {
    pub fn to_config(&self) -> PipelineConfig {
        let env = RemoteConfig::from_env();
        PipelineConfig {
            backend: self.backend,
            class_names: self.class_names_path.clone(),
            local: LocalModelConfig {
                architecture: self.model.clone(),
                weights: self.weights.clone(),
                device: self.device,
            },
            remote: RemoteConfig {
                api_key: self.api_key.clone().or(env.api_key),
                model: self.remote_model.clone(),
                endpoint: self.remote_endpoint.clone(),
                timeout_secs: self.remote_timeout,
                referer: env.referer,
                title: env.title,
            },
            scratch_dir: None,
        }
    }
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Image files or directories
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Number of top predictions to return
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u16).range(1..))]
    pub topk: u16,

    /// Print predictions as JSON
    #[arg(long)]
    pub json: bool,

    /// Enable verbose output
    #[arg(long)]
    pub verbose: bool,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "POKE_ADDR", default_value = "0.0.0.0:5000")]
    pub addr: SocketAddr,

    /// Number of predictions returned per request
    #[arg(long, default_value_t = 5)]
    pub topk: usize,

    /// Directory for upload scratch files
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    #[command(flatten)]
    pub model: ModelArgs,
}

pub fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Predict(args) => predict(args),
        Commands::Serve(args) => serve(args),
    }
}

fn predict(args: PredictArgs) -> Result<()> {
    let config = args.model.to_config();
    if args.verbose {
        info!(backend = %config.backend, "Using backend");
        if config.backend == BackendKind::Local {
            info!("Loading model: {}", config.local.architecture);
            info!("Loading weights from: {}", config.local.weights.display());
        }
    }

    let pipeline = InferencePipeline::from_config(&config);
    if let Some(reason) = pipeline.health().error {
        bail!("Model could not be loaded: {}", reason);
    }

    let paths = fs_service::expand_inputs(&args.paths)?;
    if paths.is_empty() {
        bail!("No images found");
    }

    let top_k = usize::from(args.topk);
    let results: Vec<_> = paths
        .par_iter()
        .map(|path| (path, pipeline.predict(ImageSource::Path(path.clone()), top_k)))
        .collect();

    let mut failures = 0;
    for (path, result) in results {
        match result {
            Ok(predictions) => print_predictions(path, &predictions, args.json, args.verbose)?,
            Err(e) => {
                failures += 1;
                error!("Failed to classify {}: {}", path.display(), e);
                eprintln!("Prediction failed for {}: {}", path.display(), e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} images could not be classified", failures, paths.len());
    }
    Ok(())
}

fn print_predictions(
    path: &std::path::Path,
    predictions: &[Prediction],
    json: bool,
    verbose: bool,
) -> Result<()> {
    if json {
        let line = serde_json::json!({
            "image": path.display().to_string(),
            "predictions": predictions,
        });
        println!("{}", serde_json::to_string(&line)?);
        return Ok(());
    }

    if verbose {
        println!("Predictions for image: {}", path.display());
    }
    for p in predictions {
        match p.class_index {
            Some(idx) => println!(
                "Class Index: {}, Class Name: {}, Confidence: {}",
                idx, p.class_name, p.confidence
            ),
            None => println!("Class Name: {}, Confidence: {}", p.class_name, p.confidence),
        }
    }
    Ok(())
}

fn serve(args: ServeArgs) -> Result<()> {
    let mut config = args.model.to_config();
    config.scratch_dir = args.scratch_dir.clone();

    info!("Initializing Pokemon Detector...");
    // Load before the runtime starts; the blocking HTTP client must not be
    // created or dropped on an async worker.
    let pipeline = Arc::new(InferencePipeline::from_config(&config));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let state = AppState {
        pipeline: pipeline.clone(),
        top_k: args.topk.max(1),
    };
    runtime.block_on(http::start_server(args.addr, state))?;
    drop(runtime);
    drop(pipeline);
    Ok(())
}
