//! Model registry and loader.
//!
//! Tracks named model entries and owns at most one loaded pipeline per
//! name. Constructed once at process start and shared via `Arc`; the
//! registry offers no per-name mutual exclusion, so racing load/unload on
//! one name is an accepted limitation of the service.

use crate::config::ModelsConfig;
use crate::runtime::{has_weight_files, FallbackModel, GenerationParams, InferenceEngine, TextGenerator};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Load state of a model entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Loaded,
    Available,
}

/// Where a model entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelOrigin {
    Fallback,
    Pretrained,
    Finetuned,
}

/// One row of the model listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub path: String,
    pub status: LoadStatus,
    #[serde(rename = "type")]
    pub origin: ModelOrigin,
}

/// Result of a load request. Expected conditions are outcomes, not
/// errors; engine failures are caught and reported as messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(String),
    AlreadyLoaded(String),
    NotFound(String),
    Failed(String),
}

impl LoadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Loaded(_) | Self::AlreadyLoaded(_))
    }

    pub fn message(&self) -> String {
        match self {
            Self::Loaded(name) => format!("model {name} loaded successfully"),
            Self::AlreadyLoaded(name) => format!("model {name} is already loaded"),
            Self::NotFound(name) => format!("model {name} does not exist"),
            Self::Failed(message) => message.clone(),
        }
    }
}

/// Result of an unload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnloadOutcome {
    Unloaded(String),
    NotLoaded(String),
}

impl UnloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Unloaded(_))
    }

    pub fn message(&self) -> String {
        match self {
            Self::Unloaded(name) => format!("model {name} unloaded successfully"),
            Self::NotLoaded(name) => format!("model {name} is not loaded"),
        }
    }
}

struct LoadedModel {
    path: String,
    origin: ModelOrigin,
    generator: Arc<dyn TextGenerator>,
}

/// Registry of loaded pipelines plus discovery of on-disk fine-tuned
/// artifacts. Scanning never deletes anything.
pub struct ModelRegistry {
    engine: Arc<dyn InferenceEngine>,
    defaults: GenerationParams,
    finetune_root: PathBuf,
    pretrained: HashMap<String, String>,
    loaded: RwLock<HashMap<String, LoadedModel>>,
}

impl ModelRegistry {
    /// Build the registry and seed the `default` entry with the fallback
    /// generator so the service starts without downloading weights.
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        models: &ModelsConfig,
        defaults: GenerationParams,
    ) -> Self {
        let mut loaded = HashMap::new();
        let default_path = models
            .pretrained
            .get("default")
            .cloned()
            .unwrap_or_else(|| models.default_base.clone());
        loaded.insert(
            "default".to_string(),
            LoadedModel {
                path: default_path,
                origin: ModelOrigin::Fallback,
                generator: Arc::new(FallbackModel),
            },
        );
        info!("seeded registry with fallback default model");

        Self {
            engine,
            defaults,
            finetune_root: models.finetune_output_dir.clone(),
            pretrained: models.pretrained.clone(),
            loaded: RwLock::new(loaded),
        }
    }

    /// All known models: loaded entries plus fine-tuned artifact
    /// directories under the output root. No side effects.
    pub async fn list(&self) -> Vec<ModelEntry> {
        let loaded = self.loaded.read().await;
        let mut entries: Vec<ModelEntry> = loaded
            .iter()
            .map(|(name, model)| ModelEntry {
                name: name.clone(),
                path: model.path.clone(),
                status: LoadStatus::Loaded,
                origin: model.origin,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut discovered = Vec::new();
        if let Ok(dir) = std::fs::read_dir(&self.finetune_root) {
            for entry in dir.flatten() {
                let path = entry.path();
                if !path.is_dir() || !has_weight_files(&path) {
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if loaded.contains_key(name) {
                    continue;
                }
                discovered.push(ModelEntry {
                    name: name.to_string(),
                    path: path.display().to_string(),
                    status: LoadStatus::Available,
                    origin: ModelOrigin::Finetuned,
                });
            }
        }
        discovered.sort_by(|a, b| a.name.cmp(&b.name));
        entries.extend(discovered);
        entries
    }

    /// Load a model by name. Idempotent for already-loaded names; engine
    /// failures (missing files, incompatible weights, out-of-memory) are
    /// converted into a `Failed` outcome, never propagated.
    pub async fn load(&self, name: &str) -> LoadOutcome {
        if self.loaded.read().await.contains_key(name) {
            return LoadOutcome::AlreadyLoaded(name.to_string());
        }

        let finetuned = self.finetune_root.join(name);
        let (path, origin) = if finetuned.is_dir() {
            (finetuned, ModelOrigin::Finetuned)
        } else if let Some(path) = self.pretrained.get(name) {
            (PathBuf::from(path), ModelOrigin::Pretrained)
        } else {
            return LoadOutcome::NotFound(name.to_string());
        };

        match self.engine.load_pipeline(&path, &self.defaults).await {
            Ok(generator) => {
                let mut loaded = self.loaded.write().await;
                loaded.insert(
                    name.to_string(),
                    LoadedModel {
                        path: path.display().to_string(),
                        origin,
                        generator,
                    },
                );
                info!(model = name, path = %path.display(), "model loaded");
                LoadOutcome::Loaded(name.to_string())
            }
            Err(e) => {
                warn!(model = name, error = %e, "model load failed");
                LoadOutcome::Failed(format!("failed to load model {name}: {e}"))
            }
        }
    }

    /// Unload a model, dropping its pipeline and any resident memory it
    /// holds. Absent names are a normal result, not an error. On-disk
    /// weights are never touched.
    pub async fn unload(&self, name: &str) -> UnloadOutcome {
        let mut loaded = self.loaded.write().await;
        if loaded.remove(name).is_some() {
            info!(model = name, "model unloaded");
            UnloadOutcome::Unloaded(name.to_string())
        } else {
            UnloadOutcome::NotLoaded(name.to_string())
        }
    }

    /// The generation capability for a loaded name, if any.
    pub async fn generator(&self, name: &str) -> Option<Arc<dyn TextGenerator>> {
        self.loaded
            .read()
            .await
            .get(name)
            .map(|model| Arc::clone(&model.generator))
    }

    pub async fn is_loaded(&self, name: &str) -> bool {
        self.loaded.read().await.contains_key(name)
    }

    pub fn finetune_root(&self) -> &Path {
        &self.finetune_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::runtime::TrainingRun;
    use async_trait::async_trait;

    /// Engine stub: succeeds for existing directories, fails otherwise.
    struct StubEngine;

    #[async_trait]
    impl InferenceEngine for StubEngine {
        async fn load_pipeline(
            &self,
            path: &Path,
            _defaults: &GenerationParams,
        ) -> Result<Arc<dyn TextGenerator>> {
            if path.is_dir() {
                Ok(Arc::new(FallbackModel))
            } else {
                Err(Error::invalid_model(path.display().to_string(), "missing"))
            }
        }

        async fn train_adapter(
            &self,
            _base_model: &Path,
            _corpus: &[String],
            _run: &TrainingRun,
            _output_dir: &Path,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn registry_with_root(root: &Path) -> ModelRegistry {
        let models = ModelsConfig {
            finetune_output_dir: root.to_path_buf(),
            default_base: "Qwen/Qwen2.5-0.5B-Instruct".to_string(),
            pretrained: HashMap::from([(
                "default".to_string(),
                "Qwen/Qwen2.5-0.5B-Instruct".to_string(),
            )]),
        };
        ModelRegistry::new(Arc::new(StubEngine), &models, GenerationParams::default())
    }

    #[tokio::test]
    async fn test_default_is_seeded_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with_root(&dir.path().join("none"));
        let entries = registry.list().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "default");
        assert_eq!(entries[0].status, LoadStatus::Loaded);
        assert_eq!(entries[0].origin, ModelOrigin::Fallback);
        drop(dir);
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with_root(dir.path());
        let before = registry.list().await.len();

        let outcome = registry.load("default").await;
        assert_eq!(outcome, LoadOutcome::AlreadyLoaded("default".to_string()));
        assert!(outcome.is_success());
        assert_eq!(registry.list().await.len(), before);
    }

    #[tokio::test]
    async fn test_load_unknown_name_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with_root(dir.path());
        let outcome = registry.load("missing-model").await;
        assert_eq!(outcome, LoadOutcome::NotFound("missing-model".to_string()));
        assert!(!outcome.is_success());
        assert!(outcome.message().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_load_finetuned_directory() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("demo_finetuned");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join("adapter_model.safetensors"), b"x").unwrap();

        let registry = registry_with_root(dir.path());
        let listed = registry.list().await;
        assert!(listed
            .iter()
            .any(|e| e.name == "demo_finetuned" && e.status == LoadStatus::Available));

        let outcome = registry.load("demo_finetuned").await;
        assert_eq!(outcome, LoadOutcome::Loaded("demo_finetuned".to_string()));
        assert!(registry.is_loaded("demo_finetuned").await);

        // Now listed once, as loaded.
        let listed = registry.list().await;
        let entries: Vec<_> = listed.iter().filter(|e| e.name == "demo_finetuned").collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, LoadStatus::Loaded);
        assert_eq!(entries[0].origin, ModelOrigin::Finetuned);
    }

    #[tokio::test]
    async fn test_load_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let models = ModelsConfig {
            finetune_output_dir: dir.path().to_path_buf(),
            default_base: "base".to_string(),
            pretrained: HashMap::from([(
                "broken".to_string(),
                "/nonexistent/path".to_string(),
            )]),
        };
        let registry =
            ModelRegistry::new(Arc::new(StubEngine), &models, GenerationParams::default());

        let outcome = registry.load("broken").await;
        assert!(matches!(outcome, LoadOutcome::Failed(_)));
        assert!(outcome.message().contains("failed to load model broken"));
    }

    #[tokio::test]
    async fn test_unload_not_loaded_is_normal() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with_root(dir.path());
        let outcome = registry.unload("nobody").await;
        assert_eq!(outcome, UnloadOutcome::NotLoaded("nobody".to_string()));
        assert!(outcome.message().contains("not loaded"));
    }

    #[tokio::test]
    async fn test_unload_removes_entry_only() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("demo_finetuned");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join("adapter_model.safetensors"), b"x").unwrap();

        let registry = registry_with_root(dir.path());
        registry.load("demo_finetuned").await;
        let outcome = registry.unload("demo_finetuned").await;
        assert!(outcome.is_success());
        assert!(!registry.is_loaded("demo_finetuned").await);
        // Artifacts survive the unload.
        assert!(model_dir.join("adapter_model.safetensors").is_file());
    }
}
