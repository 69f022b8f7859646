#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use poke_lens_lib::models::config_types::BackendKind;
use poke_lens_lib::services::classifier::{Classifier, InferenceError, ScoreDistribution};
use poke_lens_lib::{ImageInput, LabelCatalog};
use std::io::{Cursor, Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Local-style classifier that ignores the image and returns fixed probabilities.
pub struct StubClassifier {
    pub catalog: LabelCatalog,
    pub probabilities: Vec<f32>,
}

impl StubClassifier {
    pub fn starters(probabilities: Vec<f32>) -> Self {
        Self {
            catalog: LabelCatalog::from_labels(["Bulbasaur", "Charmander", "Squirtle"]),
            probabilities,
        }
    }
}

impl Classifier for StubClassifier {
    fn infer(&self, _input: &ImageInput, _top_k: usize) -> Result<ScoreDistribution, InferenceError> {
        ScoreDistribution::from_probabilities(&self.catalog, &self.probabilities)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn model_id(&self) -> &str {
        "stub"
    }
}

/// Classifier whose forward pass always fails.
pub struct FailingClassifier;

impl Classifier for FailingClassifier {
    fn infer(&self, _input: &ImageInput, _top_k: usize) -> Result<ScoreDistribution, InferenceError> {
        Err(InferenceError::Session("device removed".to_string()))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn model_id(&self) -> &str {
        "failing"
    }
}

pub fn encode_image(format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(32, 24, |x, y| Rgb([(x * 8) as u8, (y * 10) as u8, 200]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

pub fn png_bytes() -> Vec<u8> {
    encode_image(ImageFormat::Png)
}

pub fn dir_is_empty(dir: &std::path::Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

/// Serve exactly one canned HTTP response on a random local port.
///
/// Returns the base URL and a receiver that yields the raw request once it
/// has been read in full.
pub fn serve_once(status: &str, body: &str) -> (String, mpsc::Receiver<String>) {
    serve_once_after(status, body, Duration::ZERO)
}

pub fn serve_once_after(
    status: &str,
    body: &str,
    delay: Duration,
) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let status = status.to_string();
    let body = body.to_string();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let request = read_request(&mut stream);
        let _ = tx.send(request);

        thread::sleep(delay);
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes());
        let _ = stream.flush();
    });

    (format!("http://{}", addr), rx)
}

fn read_request(stream: &mut std::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
            let content_length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= pos + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// A local URL nothing is listening on.
pub fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}
