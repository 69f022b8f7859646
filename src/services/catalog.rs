use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CatalogLoadError {
    #[error("Class names file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read class names file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse class names JSON {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid class names in {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Class names in model output order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCatalog {
    labels: Vec<String>,
}

impl LabelCatalog {
    /// Load from either a JSON list of names or a config with an `id2label` map.
    pub fn load(path: &Path) -> Result<Self, CatalogLoadError> {
        if !path.exists() {
            return Err(CatalogLoadError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|source| CatalogLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let value: Value =
            serde_json::from_str(&content).map_err(|source| CatalogLoadError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let labels = labels_from_value(&value).map_err(|reason| CatalogLoadError::Invalid {
            path: path.to_path_buf(),
            reason,
        })?;

        info!(path = %path.display(), classes = labels.len(), "Class names loaded");
        Ok(Self { labels })
    }

    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

fn labels_from_value(value: &Value) -> Result<Vec<String>, String> {
    let labels = match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("entry {} is not a string", i))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Value::Object(map) => {
            let id2label = map
                .get("id2label")
                .and_then(Value::as_object)
                .ok_or("expected a list of strings or an object with id2label")?;

            let mut indexed = Vec::with_capacity(id2label.len());
            for (key, label) in id2label {
                let idx = key
                    .parse::<usize>()
                    .map_err(|_| format!("id2label key {:?} is not an index", key))?;
                let label = label
                    .as_str()
                    .ok_or_else(|| format!("id2label[{}] is not a string", key))?;
                indexed.push((idx, label.to_string()));
            }
            indexed.sort_by_key(|(idx, _)| *idx);

            if indexed.iter().enumerate().any(|(pos, (idx, _))| pos != *idx) {
                return Err("id2label indices are not contiguous from 0".to_string());
            }
            indexed.into_iter().map(|(_, label)| label).collect()
        }
        _ => return Err("expected a list of strings".to_string()),
    };

    if labels.is_empty() {
        return Err("no class names".to_string());
    }
    Ok(labels)
}
