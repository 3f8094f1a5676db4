//! Fine-tune orchestration.
//!
//! Formats instruction/input/output samples into a training corpus,
//! delegates the run to the inference engine, and persists the adapter
//! under `<finetune_root>/<model_name>_finetuned`. Unlike the chat path,
//! failures here are recorded against the task and re-raised: silently
//! reporting success on a corrupted training run is unacceptable.

use crate::error::Result;
use crate::runtime::{InferenceEngine, TrainingRun};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// One instruction-tuning sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineTuneSample {
    pub instruction: String,
    #[serde(default)]
    pub input: String,
    pub output: String,
}

impl FineTuneSample {
    /// Fixed training template applied to every sample.
    pub fn format(&self) -> String {
        format!(
            "### Instruction:\n{}\n### Input:\n{}\n### Output:\n{}",
            self.instruction, self.input, self.output
        )
    }
}

/// Task state: running until the single transition to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Report returned by a successful fine-tune.
#[derive(Debug, Clone)]
pub struct FineTuneReport {
    pub task_id: String,
    pub output_dir: PathBuf,
}

/// Orchestrates fine-tune runs and tracks task status in process-lifetime
/// memory only; statuses are lost on restart.
pub struct FineTuneOrchestrator {
    engine: Arc<dyn InferenceEngine>,
    default_base: String,
    finetune_root: PathBuf,
    tasks: RwLock<HashMap<String, TaskStatus>>,
}

impl FineTuneOrchestrator {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        default_base: String,
        finetune_root: PathBuf,
    ) -> Self {
        Self {
            engine,
            default_base,
            finetune_root,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Run a fine-tune to completion. The task starts `running` and ends
    /// `completed` or `failed`; on failure the error is re-raised to the
    /// caller after the status update.
    pub async fn finetune(
        &self,
        model_name: &str,
        samples: &[FineTuneSample],
        epochs: usize,
        learning_rate: f32,
        batch_size: usize,
    ) -> Result<FineTuneReport> {
        let task_id = {
            let mut tasks = self.tasks.write().await;
            let task_id = format!("finetune_{}", tasks.len() + 1);
            tasks.insert(task_id.clone(), TaskStatus::Running);
            task_id
        };
        info!(task = %task_id, model = model_name, samples = samples.len(), "fine-tune started");

        let result = self
            .run(model_name, samples, epochs, learning_rate, batch_size)
            .await;

        let mut tasks = self.tasks.write().await;
        match result {
            Ok(output_dir) => {
                tasks.insert(task_id.clone(), TaskStatus::Completed);
                info!(task = %task_id, output = %output_dir.display(), "fine-tune completed");
                Ok(FineTuneReport {
                    task_id,
                    output_dir,
                })
            }
            Err(e) => {
                tasks.insert(task_id.clone(), TaskStatus::Failed);
                error!(task = %task_id, error = %e, "fine-tune failed");
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        model_name: &str,
        samples: &[FineTuneSample],
        epochs: usize,
        learning_rate: f32,
        batch_size: usize,
    ) -> Result<PathBuf> {
        let base_model = if model_name == "default" {
            PathBuf::from(&self.default_base)
        } else {
            PathBuf::from(model_name)
        };

        let corpus: Vec<String> = samples.iter().map(FineTuneSample::format).collect();

        let run = TrainingRun {
            epochs,
            learning_rate,
            batch_size,
            ..TrainingRun::default()
        };

        let output_dir = self.finetune_root.join(output_name(model_name));
        self.engine
            .train_adapter(&base_model, &corpus, &run, &output_dir)
            .await?;
        Ok(output_dir)
    }

    /// Recorded task status, or `"unknown"` for unrecognized ids. Pure
    /// lookup, no side effect.
    pub async fn get_status(&self, task_id: &str) -> String {
        self.tasks
            .read()
            .await
            .get(task_id)
            .map(|status| status.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Output directory name for a fine-tune. When `model_name` is a path,
/// only its final component is used so artifacts stay directly under the
/// output root.
fn output_name(model_name: &str) -> String {
    let base = Path::new(model_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(model_name);
    format!("{base}_finetuned")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::runtime::{GenerationParams, TextGenerator};
    use async_trait::async_trait;

    struct RecordingEngine {
        fail: bool,
    }

    #[async_trait]
    impl InferenceEngine for RecordingEngine {
        async fn load_pipeline(
            &self,
            _path: &Path,
            _defaults: &GenerationParams,
        ) -> Result<Arc<dyn TextGenerator>> {
            unreachable!("not used in fine-tune tests")
        }

        async fn train_adapter(
            &self,
            _base_model: &Path,
            corpus: &[String],
            _run: &TrainingRun,
            output_dir: &Path,
        ) -> Result<()> {
            if self.fail {
                return Err(Error::Training("forced failure".to_string()));
            }
            assert!(!corpus.is_empty());
            std::fs::create_dir_all(output_dir)?;
            Ok(())
        }
    }

    fn sample() -> FineTuneSample {
        FineTuneSample {
            instruction: "Translate to French".to_string(),
            input: "hello".to_string(),
            output: "bonjour".to_string(),
        }
    }

    fn orchestrator(fail: bool, root: &Path) -> FineTuneOrchestrator {
        FineTuneOrchestrator::new(
            Arc::new(RecordingEngine { fail }),
            "base-model".to_string(),
            root.to_path_buf(),
        )
    }

    #[test]
    fn test_sample_template() {
        assert_eq!(
            sample().format(),
            "### Instruction:\nTranslate to French\n### Input:\nhello\n### Output:\nbonjour"
        );
    }

    #[test]
    fn test_output_name_uses_final_component() {
        assert_eq!(output_name("demo"), "demo_finetuned");
        assert_eq!(output_name("/models/base/qwen"), "qwen_finetuned");
    }

    #[tokio::test]
    async fn test_task_completes_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(false, dir.path());

        let report = orchestrator
            .finetune("demo", &[sample()], 3, 1e-4, 8)
            .await
            .unwrap();
        assert_eq!(report.task_id, "finetune_1");
        assert_eq!(report.output_dir, dir.path().join("demo_finetuned"));
        assert_eq!(orchestrator.get_status("finetune_1").await, "completed");
    }

    #[tokio::test]
    async fn test_task_fails_and_error_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(true, dir.path());

        let result = orchestrator.finetune("demo", &[sample()], 1, 1e-4, 8).await;
        assert!(matches!(result, Err(Error::Training(_))));
        assert_eq!(orchestrator.get_status("finetune_1").await, "failed");
    }

    #[tokio::test]
    async fn test_task_ids_derive_from_count() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(false, dir.path());

        let first = orchestrator
            .finetune("a", &[sample()], 1, 1e-4, 8)
            .await
            .unwrap();
        let second = orchestrator
            .finetune("b", &[sample()], 1, 1e-4, 8)
            .await
            .unwrap();
        assert_eq!(first.task_id, "finetune_1");
        assert_eq!(second.task_id, "finetune_2");
    }

    #[tokio::test]
    async fn test_unknown_task_status() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(false, dir.path());
        assert_eq!(orchestrator.get_status("finetune_99").await, "unknown");
    }
}
