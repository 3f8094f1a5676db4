//! Shared server state.

use crate::chat::ChatOrchestrator;
use crate::config::ServiceConfig;
use crate::finetune::FineTuneOrchestrator;
use crate::registry::ModelRegistry;
use crate::runtime::{GenerationParams, InferenceEngine, LocalEngine};
use std::sync::Arc;

/// State handed to every route handler. Everything is constructed once
/// at process start and injected; no module-level globals.
#[derive(Clone)]
pub struct ServerState {
    pub registry: Arc<ModelRegistry>,
    pub chat: Arc<ChatOrchestrator>,
    pub finetune: Arc<FineTuneOrchestrator>,
    pub config: Arc<ServiceConfig>,
}

impl ServerState {
    /// Build the state with the default local engine.
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_engine(config, Arc::new(LocalEngine::new()))
    }

    /// Build the state around an injected engine (used by tests).
    pub fn with_engine(config: ServiceConfig, engine: Arc<dyn InferenceEngine>) -> Self {
        let defaults = GenerationParams {
            temperature: config.generation.temperature,
            max_tokens: config.generation.max_tokens,
        };

        let registry = Arc::new(ModelRegistry::new(
            Arc::clone(&engine),
            &config.models,
            defaults.clone(),
        ));

        let chat = Arc::new(ChatOrchestrator::new(
            Arc::clone(&registry),
            config.remote.clone(),
            defaults,
        ));

        let finetune = Arc::new(FineTuneOrchestrator::new(
            engine,
            config.models.default_base.clone(),
            config.models.finetune_output_dir.clone(),
        ));

        Self {
            registry,
            chat,
            finetune,
            config: Arc::new(config),
        }
    }
}
