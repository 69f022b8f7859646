//! Vision-language model backend over an OpenAI-compatible chat API.

use crate::models::config_types::{BackendKind, RemoteConfig};
use crate::services::classifier::{Classifier, InferenceError, ScoreDistribution};
use crate::services::image_service::ImageInput;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info};

/// Label returned in place of predictions when the reply cannot be parsed.
pub const PARSE_FAILURE_LABEL: &str = "Parsing Error - See Console";

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum RemoteInferenceError {
    #[error("OpenRouter API key not configured")]
    MissingApiKey,

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Remote request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote request failed: {0}")]
    Transport(String),

    #[error("Remote service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("No response from remote model")]
    EmptyReply,

    #[error("Malformed response envelope: {0}")]
    Envelope(String),
}

/// The model answered, but not with the JSON shape that was asked for.
#[derive(Debug, Error)]
#[error("Failed to parse remote reply: {reason}")]
pub struct ParseFailure {
    pub reason: String,
    pub raw: String,
}

// --- OpenAI-compatible serde structs ---

#[derive(serde::Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(serde::Serialize)]
struct ChatMessage {
    role: String,
    content: Value,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(serde::Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

pub struct RemoteClassifier {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
    referer: String,
    title: String,
    timeout: Duration,
}

impl RemoteClassifier {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteInferenceError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(RemoteInferenceError::MissingApiKey)?;

        let timeout = config.timeout();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteInferenceError::Client(e.to_string()))?;

        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        info!(endpoint = %endpoint, model = %config.model, "Remote classifier configured");

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            endpoint,
            referer: config.referer.clone(),
            title: config.title.clone(),
            timeout,
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> RemoteInferenceError {
        if err.is_timeout() {
            RemoteInferenceError::Timeout(self.timeout)
        } else {
            RemoteInferenceError::Transport(err.to_string())
        }
    }

    /// Send one chat completion and return the assistant's text.
    fn complete(&self, input: &ImageInput, top_k: usize) -> Result<String, RemoteInferenceError> {
        let data_url = format!("data:{};base64,{}", input.mime_type, STANDARD.encode(&input.bytes));

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: serde_json::json!([
                    {"type": "text", "text": build_prompt(top_k)},
                    {"type": "image_url", "image_url": {"url": data_url}}
                ]),
            }],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(&request)
            .send()
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(RemoteInferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().map_err(|e| self.transport_error(e))?;
        let envelope: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| RemoteInferenceError::Envelope(e.to_string()))?;

        envelope
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(RemoteInferenceError::EmptyReply)
    }
}

impl Classifier for RemoteClassifier {
    fn infer(&self, input: &ImageInput, top_k: usize) -> Result<ScoreDistribution, InferenceError> {
        let start = Instant::now();
        let reply = self.complete(input, top_k)?;
        debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Remote reply received");
        Ok(reply_to_distribution(&reply))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

pub fn build_prompt(top_k: usize) -> String {
    format!(
        r#"Analyze this image and identify which Pokemon it is. If no pokemon is present, return your best guess.

Return ONLY a JSON object with the top {top_k} most likely Pokemon, formatted exactly like this:
{{
  "predictions": [
    {{"pokemon": "PokemonName", "confidence": 0.95}},
    {{"pokemon": "PokemonName", "confidence": 0.03}},
    ...
  ]
}}

Important:
- Use proper Pokemon names (capitalize first letter)
- Confidence scores should sum to approximately 1.0
- Only include Generation 1 Pokemon (Pokemon #1-151)
- Return ONLY the JSON, no other text"#
    )
}

/// Remove a surrounding markdown code fence (```json or plain ```), if any.
pub fn strip_code_fence(text: &str) -> &str {
    let inner = if let Some(pos) = text.find("```json") {
        &text[pos + "```json".len()..]
    } else if let Some(pos) = text.find("```") {
        &text[pos + "```".len()..]
    } else {
        return text.trim();
    };

    match inner.find("```") {
        Some(end) => inner[..end].trim(),
        None => inner.trim(),
    }
}

/// Parse a reply of the form `{"predictions": [{"pokemon": .., "confidence": ..}]}`.
///
/// Every entry is kept in reply order; ranking and truncation happen in the
/// pipeline. Confidences are not renormalized, but negatives are clamped to
/// 0.0. Missing names become "Unknown" and missing confidences 0.0.
pub fn parse_reply(text: &str) -> Result<ScoreDistribution, ParseFailure> {
    let failure = |reason: String| ParseFailure {
        reason,
        raw: text.to_string(),
    };

    let payload = strip_code_fence(text);
    let value: Value = serde_json::from_str(payload).map_err(|e| failure(e.to_string()))?;

    let predictions = value
        .get("predictions")
        .and_then(Value::as_array)
        .ok_or_else(|| failure("missing predictions array".to_string()))?;

    if predictions.is_empty() {
        return Err(failure("empty predictions array".to_string()));
    }

    Ok(ScoreDistribution::from_named(
        predictions.iter().map(|entry| {
            let name = entry
                .get("pokemon")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string();
            let confidence = entry.get("confidence").and_then(Value::as_f64).unwrap_or(0.0);
            (name, (confidence as f32).max(0.0))
        }),
    ))
}

/// Like `parse_reply`, but a bad reply degrades to the single sentinel entry.
pub fn reply_to_distribution(text: &str) -> ScoreDistribution {
    match parse_reply(text) {
        Ok(distribution) => distribution,
        Err(failure) => {
            error!(reason = %failure.reason, raw = %failure.raw, "Failed to parse remote response");
            ScoreDistribution::from_named([(PARSE_FAILURE_LABEL, 0.0)])
        }
    }
}
