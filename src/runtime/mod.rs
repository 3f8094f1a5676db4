//! Runtime abstraction layer over the model-execution capability.
//!
//! The orchestrators never talk to an ML library directly; they hold
//! `Arc<dyn TextGenerator>` handles selected explicitly by model origin
//! (fallback, loaded pipeline, remote client) and an `Arc<dyn
//! InferenceEngine>` for load/train operations.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub mod fallback;
pub mod local;
pub mod remote;

pub use fallback::FallbackModel;
pub use local::LocalEngine;
pub use remote::RemoteChatClient;

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

/// A callable text-generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for a fully constructed prompt.
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;
}

/// Fixed LoRA hyperparameters used for every fine-tune run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoraHyperparams {
    pub rank: usize,
    pub alpha: f32,
    pub dropout: f32,
    pub target_modules: Vec<String>,
}

impl Default for LoraHyperparams {
    fn default() -> Self {
        Self {
            rank: 16,
            alpha: 32.0,
            dropout: 0.05,
            target_modules: vec![
                "q_proj".to_string(),
                "k_proj".to_string(),
                "v_proj".to_string(),
                "o_proj".to_string(),
            ],
        }
    }
}

/// Parameters for one adapter training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRun {
    pub epochs: usize,
    pub learning_rate: f32,
    pub batch_size: usize,
    pub lora: LoraHyperparams,
}

impl Default for TrainingRun {
    fn default() -> Self {
        Self {
            epochs: 3,
            learning_rate: 1e-4,
            batch_size: 8,
            lora: LoraHyperparams::default(),
        }
    }
}

/// Summary of a loaded model, reported by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub path: String,
    pub weight_files: usize,
    pub parameters: u64,
}

/// The external model-execution seam: loading weights into a generation
/// capability and training LoRA adapters. Implementations own all device
/// and tensor concerns.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Materialize a generation pipeline from weights on disk.
    async fn load_pipeline(
        &self,
        path: &Path,
        defaults: &GenerationParams,
    ) -> Result<Arc<dyn TextGenerator>>;

    /// Train a LoRA adapter against `base_model` on a formatted corpus,
    /// persisting adapter and tokenizer artifacts under `output_dir`.
    async fn train_adapter(
        &self,
        base_model: &Path,
        corpus: &[String],
        run: &TrainingRun,
        output_dir: &Path,
    ) -> Result<()>;
}

/// File extensions recognized as model weights.
pub const WEIGHT_EXTENSIONS: &[&str] = &["safetensors", "bin"];

/// Whether a directory contains at least one recognized weight file.
pub fn has_weight_files(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| WEIGHT_EXTENSIONS.contains(&ext))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lora_defaults() {
        let lora = LoraHyperparams::default();
        assert_eq!(lora.rank, 16);
        assert_eq!(lora.alpha, 32.0);
        assert_eq!(lora.target_modules.len(), 4);
    }

    #[test]
    fn test_has_weight_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!has_weight_files(dir.path()));

        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        assert!(!has_weight_files(dir.path()));

        std::fs::write(dir.path().join("model.safetensors"), b"x").unwrap();
        assert!(has_weight_files(dir.path()));
    }
}
