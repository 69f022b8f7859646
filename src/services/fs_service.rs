use crate::error::AppError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif"];

/// Extensions the upload form accepts.
const UPLOAD_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp"];

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn is_allowed_upload(file_name: &str) -> bool {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| UPLOAD_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Image files directly inside `dir`, sorted by name.
pub fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    if !dir.exists() {
        return Err(format!("Path does not exist: {}", dir.display()).into());
    }

    let read_dir = std::fs::read_dir(dir).map_err(|e| AppError {
        message: format!("Cannot read directory {}: {}", dir.display(), e),
    })?;

    let mut images = Vec::new();
    for entry in read_dir {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };

        let ft = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };

        let path = entry.path();
        if ft.is_file() && is_image_file(&path) {
            images.push(path);
        }
    }

    images.sort();
    Ok(images)
}

/// Expand CLI arguments: files pass through, directories become their images.
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, AppError> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            paths.extend(list_image_files(input)?);
        } else {
            paths.push(input.clone());
        }
    }
    Ok(paths)
}

/// Write an upload to a scratch file that is deleted when the handle drops.
pub fn spool_upload(
    bytes: &[u8],
    file_name: Option<&str>,
    scratch_dir: Option<&Path>,
) -> std::io::Result<NamedTempFile> {
    let suffix = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_else(|| ".img".to_string());

    let mut builder = tempfile::Builder::new();
    builder.prefix("poke-upload-").suffix(&suffix);
    let mut file = match scratch_dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}
