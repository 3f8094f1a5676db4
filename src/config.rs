//! Configuration management for the lora-serve service.
//!
//! Configuration is loaded from multiple sources, in order of precedence:
//! 1. Default configuration (embedded in the binary)
//! 2. User-specified configuration file (`--config`)
//! 3. Environment variables (prefixed with `LORA_SERVE_`, `__` as separator)
//! 4. Command-line arguments

use crate::error::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Command-line arguments
#[derive(Debug, Parser)]
#[clap(version, about)]
pub struct Args {
    /// Configuration file path
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind the HTTP server to
    #[clap(long)]
    pub host: Option<String>,

    /// Port to bind the HTTP server to
    #[clap(long)]
    pub port: Option<u16>,

    /// Fine-tune output root directory
    #[clap(long)]
    pub finetune_dir: Option<PathBuf>,

    /// Base URL of the remote OpenAI-compatible chat endpoint
    #[clap(long)]
    pub remote_url: Option<String>,

    /// API key for the remote chat endpoint
    #[clap(long, env = "LORA_SERVE_REMOTE_API_KEY", hide_env_values = true)]
    pub remote_api_key: Option<String>,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    #[serde(default)]
    pub generation: GenerationDefaults,
    #[serde(default)]
    pub remote: RemoteConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Model storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Root directory for fine-tuned model artifacts
    pub finetune_output_dir: PathBuf,
    /// Base model used when a fine-tune names "default"
    pub default_base: String,
    /// Registered pretrained models, name -> path or hub identifier
    #[serde(default)]
    pub pretrained: HashMap<String, String>,
}

/// Process-wide generation defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationDefaults {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Remote OpenAI-compatible chat endpoint settings. Endpoint and
/// credentials are process-wide, never per-request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_remote_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_remote_model")]
    pub model: String,
    /// Request model names routed to the remote endpoint
    #[serde(default)]
    pub routed_models: Vec<String>,
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_remote_url(),
            api_key: String::new(),
            model: default_remote_model(),
            routed_models: Vec::new(),
            timeout_secs: default_remote_timeout(),
        }
    }
}

impl RemoteConfig {
    /// Whether chat requests for `model_name` go to the remote endpoint.
    pub fn routes(&self, model_name: &str) -> bool {
        self.enabled && self.routed_models.iter().any(|m| m == model_name)
    }
}

impl ServiceConfig {
    /// Load configuration from all sources
    pub fn load(args: &Args) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(config::File::from_str(
            include_str!("../config/default.toml"),
            config::FileFormat::Toml,
        ));

        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        builder = builder
            .add_source(config::Environment::with_prefix("LORA_SERVE").separator("__"));

        let mut config: ServiceConfig = builder.build()?.try_deserialize()?;

        if let Some(host) = &args.host {
            config.server.host = host.clone();
        }
        if let Some(port) = args.port {
            config.server.port = port;
        }
        if let Some(dir) = &args.finetune_dir {
            config.models.finetune_output_dir = dir.clone();
        }
        if let Some(url) = &args.remote_url {
            config.remote.base_url = url.clone();
        }
        if let Some(key) = &args.remote_api_key {
            config.remote.api_key = key.clone();
        }

        Ok(config)
    }
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> usize {
    1024
}

fn default_remote_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_remote_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_remote_timeout() -> u64 {
    120
}
