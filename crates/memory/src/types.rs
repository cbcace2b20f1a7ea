use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Memory file has no parent directory: {0}")]
    InvalidPath(String),
}

/// Persistent context carried across sessions.
///
/// The document is opaque: it is handed to the planner as-is and written back
/// verbatim. Non-JSON memory files are carried as a single JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Memory(serde_json::Value);

impl Memory {
    pub fn new(document: serde_json::Value) -> Self {
        Self(document)
    }

    pub fn document(&self) -> &serde_json::Value {
        &self.0
    }

    /// Decode raw file content. `.json` files must parse; anything else is text.
    pub fn decode(path: &Path, raw: &str) -> Result<Option<Self>, MemoryError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        if is_json_path(path) {
            Ok(Some(Self(serde_json::from_str(raw)?)))
        } else {
            Ok(Some(Self(serde_json::Value::String(raw.to_string()))))
        }
    }

    /// Encode for writing back to `path`, the inverse of [`Memory::decode`].
    pub fn encode(&self, path: &Path) -> Result<String, MemoryError> {
        match (&self.0, is_json_path(path)) {
            (serde_json::Value::String(text), false) => Ok(text.clone()),
            _ => Ok(serde_json::to_string_pretty(&self.0)?),
        }
    }

    /// Human-readable rendering used when the memory is shown to a planner.
    pub fn render(&self) -> String {
        match &self.0 {
            serde_json::Value::String(text) => text.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

fn is_json_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
