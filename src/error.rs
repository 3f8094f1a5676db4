//! Error types for the orchestration layer.
//!
//! Expected conditions (model not found, not loaded, already loaded) are
//! modeled as outcome enums on the registry, not as errors. The variants
//! here are genuine failures: I/O, network, malformed weights, training.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("invalid model weights at {path}: {reason}")]
    InvalidModel { path: String, reason: String },

    #[error("training failed: {0}")]
    Training(String),

    #[error("remote chat endpoint error: {0}")]
    Remote(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_model(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidModel {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
