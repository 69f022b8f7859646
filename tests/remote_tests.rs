//! Remote backend against a canned local HTTP responder.

mod common;

use common::{png_bytes, serve_once, serve_once_after, unreachable_url};
use poke_lens_lib::models::config_types::RemoteConfig;
use poke_lens_lib::services::classifier::remote::{
    RemoteClassifier, RemoteInferenceError, PARSE_FAILURE_LABEL,
};
use poke_lens_lib::services::classifier::InferenceError;
use poke_lens_lib::{ImageSource, InferencePipeline, PredictionError};
use std::sync::Arc;
use std::time::Duration;

fn pipeline_for(endpoint: String, timeout_secs: u64) -> InferencePipeline {
    let config = RemoteConfig {
        api_key: Some("sk-test-key".to_string()),
        model: "test/vision-model".to_string(),
        endpoint,
        timeout_secs,
        ..RemoteConfig::default()
    };
    InferencePipeline::new(Arc::new(RemoteClassifier::new(&config).unwrap()))
}

fn chat_reply(content: &str) -> String {
    serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    })
    .to_string()
}

fn png_upload() -> ImageSource {
    ImageSource::Upload {
        bytes: png_bytes(),
        mime_type: Some("image/png".to_string()),
        file_name: None,
    }
}

#[test]
fn test_fenced_pikachu_reply() {
    let content = "```json\n{\"predictions\":[{\"pokemon\":\"Pikachu\",\"confidence\":0.9}]}\n```";
    let (url, requests) = serve_once("200 OK", &chat_reply(content));
    let pipeline = pipeline_for(url, 5);

    let predictions = pipeline.predict(png_upload(), 5).unwrap();
    assert_eq!(
        serde_json::to_value(&predictions).unwrap(),
        serde_json::json!([
            {"class_name": "Pikachu", "confidence": "0.9000", "percentage": "90.00%"}
        ])
    );

    let request = requests.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(request.starts_with("POST /chat/completions"));
    assert!(request.to_lowercase().contains("authorization: bearer sk-test-key"));
    assert!(request.to_lowercase().contains("x-title: pokemon detector demo"));
    assert!(request.contains("data:image/png;base64,"));
    assert!(request.contains("test/vision-model"));
    assert!(request.contains("top 5 most likely"));
}

#[test]
fn test_reply_is_ranked_and_truncated() {
    let content = r#"{"predictions":[{"pokemon":"Raichu","confidence":0.1},{"pokemon":"Pikachu","confidence":0.8},{"pokemon":"Pichu","confidence":0.1}]}"#;
    let (url, _requests) = serve_once("200 OK", &chat_reply(content));
    let pipeline = pipeline_for(url, 5);

    let predictions = pipeline.predict(png_upload(), 2).unwrap();
    let names: Vec<_> = predictions.iter().map(|p| p.class_name.as_str()).collect();
    assert_eq!(names, vec!["Pikachu", "Raichu"]);
    assert!(predictions.iter().all(|p| p.class_index.is_none()));
}

#[test]
fn test_best_entry_survives_when_reply_exceeds_top_k() {
    let content = r#"{"predictions":[{"pokemon":"Raichu","confidence":0.05},{"pokemon":"Pikachu","confidence":0.9},{"pokemon":"Pichu","confidence":0.05}]}"#;
    let (url, _requests) = serve_once("200 OK", &chat_reply(content));
    let pipeline = pipeline_for(url, 5);

    let predictions = pipeline.predict(png_upload(), 1).unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].class_name, "Pikachu");
    assert_eq!(predictions[0].confidence, "0.9000");
}

#[test]
fn test_garbage_reply_yields_sentinel() {
    let (url, _requests) = serve_once("200 OK", &chat_reply("It looks like a yellow mouse to me."));
    let pipeline = pipeline_for(url, 5);

    let predictions = pipeline.predict(png_upload(), 5).unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].class_name, PARSE_FAILURE_LABEL);
    assert_eq!(predictions[0].confidence, "0.0000");
    assert_eq!(predictions[0].percentage, "0.00%");
}

#[test]
fn test_http_error_status_is_remote_error() {
    let (url, _requests) = serve_once("500 Internal Server Error", r#"{"error":"upstream exploded"}"#);
    let pipeline = pipeline_for(url, 5);

    let err = pipeline.predict(png_upload(), 5).unwrap_err();
    match err {
        PredictionError::Inference(InferenceError::Remote(RemoteInferenceError::Status {
            status,
            body,
        })) => {
            assert_eq!(status, 500);
            assert!(body.contains("upstream exploded"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_unreachable_service_is_remote_error() {
    let pipeline = pipeline_for(unreachable_url(), 5);

    let err = pipeline.predict(png_upload(), 5).unwrap_err();
    assert!(matches!(
        err,
        PredictionError::Inference(InferenceError::Remote(RemoteInferenceError::Transport(_)))
    ));
}

#[test]
fn test_slow_service_times_out() {
    let (url, _requests) = serve_once_after("200 OK", &chat_reply("{}"), Duration::from_secs(4));
    let pipeline = pipeline_for(url, 1);

    let err = pipeline.predict(png_upload(), 5).unwrap_err();
    assert!(matches!(
        err,
        PredictionError::Inference(InferenceError::Remote(RemoteInferenceError::Timeout(_)))
    ));
}

#[test]
fn test_empty_choices_is_remote_error() {
    let (url, _requests) = serve_once("200 OK", r#"{"choices": []}"#);
    let pipeline = pipeline_for(url, 5);

    let err = pipeline.predict(png_upload(), 5).unwrap_err();
    assert!(matches!(
        err,
        PredictionError::Inference(InferenceError::Remote(RemoteInferenceError::EmptyReply))
    ));
}

#[test]
fn test_corrupt_upload_never_reaches_service() {
    let pipeline = pipeline_for(unreachable_url(), 5);

    let err = pipeline
        .predict(
            ImageSource::Upload {
                bytes: b"\x89PNG broken".to_vec(),
                mime_type: Some("image/png".to_string()),
                file_name: Some("broken.png".to_string()),
            },
            5,
        )
        .unwrap_err();
    assert!(matches!(err, PredictionError::Decode(_)));
}
