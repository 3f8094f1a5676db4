pub mod chat;
pub mod config;
pub mod error;
pub mod finetune;
pub mod registry;
pub mod runtime;
pub mod server;

// Re-export commonly used types
pub use chat::{ChatMessage, ChatOrchestrator, Role};
pub use error::{Error, Result};
pub use finetune::{FineTuneOrchestrator, FineTuneSample, TaskStatus};
pub use registry::{LoadOutcome, ModelEntry, ModelRegistry, UnloadOutcome};
