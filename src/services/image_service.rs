//! Image intake: turns a path or an upload into a decoded `ImageInput`.

use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Image data is empty")]
    EmptyData,

    #[error("Unsupported image format")]
    UnsupportedFormat,

    #[error("Failed to decode image: {0}")]
    DecodeFailed(String),

    #[error("Failed to read image {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where a request's image comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Upload {
        bytes: Vec<u8>,
        mime_type: Option<String>,
        file_name: Option<String>,
    },
}

/// A decoded image together with the encoded bytes it came from.
///
/// The local backend reads `image`; the remote backend forwards `bytes`
/// as-is under `mime_type`.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub image: DynamicImage,
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub mime_type: String,
}

impl ImageInput {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Read and decode an image file. `fallback` is used when the magic bytes
/// are not recognised.
pub fn load_image(path: &Path, fallback: Option<ImageFormat>) -> Result<ImageInput, DecodeError> {
    let bytes = std::fs::read(path).map_err(|source| DecodeError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let fallback = fallback.or_else(|| {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(ImageFormat::from_extension)
    });
    decode_image_bytes(bytes, fallback)
}

/// Decode raw image bytes.
pub fn decode_image_bytes(
    bytes: Vec<u8>,
    fallback: Option<ImageFormat>,
) -> Result<ImageInput, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyData);
    }

    let format = detect_format(&bytes)
        .or(fallback)
        .ok_or(DecodeError::UnsupportedFormat)?;

    let image = image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| DecodeError::DecodeFailed(e.to_string()))?;

    Ok(ImageInput {
        image,
        bytes,
        format,
        mime_type: format.to_mime_type().to_string(),
    })
}

/// Detect image format from magic bytes.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.len() < 4 {
        return None;
    }

    match bytes {
        // PNG: 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => Some(ImageFormat::Png),

        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),

        // WebP: RIFF .... WEBP
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some(ImageFormat::WebP),

        // GIF87a / GIF89a
        [0x47, 0x49, 0x46, 0x38, x, ..] if *x == 0x37 || *x == 0x39 => Some(ImageFormat::Gif),

        // BMP: BM
        [0x42, 0x4D, ..] => Some(ImageFormat::Bmp),

        // TIFF: II or MM
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => Some(ImageFormat::Tiff),

        _ => None,
    }
}

/// Format implied by a MIME type such as `image/png`.
pub fn format_from_mime(mime_type: &str) -> Option<ImageFormat> {
    ImageFormat::from_mime_type(mime_type.trim())
}
