//! Chat orchestration.
//!
//! Converts a role-tagged message sequence into a single prompt and
//! invokes the resolved generation capability: remote client for names
//! configured as remote-backed, loaded pipeline for registered names,
//! and the static fallback otherwise. No failure crosses this boundary;
//! everything degrades to a textual answer.

use crate::config::RemoteConfig;
use crate::registry::ModelRegistry;
use crate::runtime::remote::{RemoteChatClient, WireMessage};
use crate::runtime::{FallbackModel, GenerationParams, TextGenerator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Message role. Ordering of messages is significant and preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Fixed persona used by the smart-answer endpoint.
const SMART_ANSWER_PERSONA: &str = "You are a professional study assistant \
focused on answering students' learning questions. Follow these rules: \
1. Act as a knowledgeable, patient tutor familiar with computer science, \
mathematics, and physics fundamentals. \
2. Be accurate, concise, and easy to understand; structure answers as \
numbered points. \
3. For concept questions give a definition first, then explanation and an \
example; for problem-solving questions give the approach, the derivation, \
then the answer; for comparison questions list the criteria and conclude. \
4. If unsure, say so explicitly and suggest consulting authoritative \
material or a teacher. \
5. Only answer study-related questions; politely decline anything else.";

/// Orchestrates prompt construction and model resolution for chat.
pub struct ChatOrchestrator {
    registry: Arc<ModelRegistry>,
    remote: Option<RemoteChatClient>,
    remote_config: RemoteConfig,
    fallback: Arc<dyn TextGenerator>,
    defaults: GenerationParams,
}

impl ChatOrchestrator {
    pub fn new(
        registry: Arc<ModelRegistry>,
        remote_config: RemoteConfig,
        defaults: GenerationParams,
    ) -> Self {
        let remote = if remote_config.enabled {
            match RemoteChatClient::new(remote_config.clone()) {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!(error = %e, "remote chat client unavailable");
                    None
                }
            }
        } else {
            None
        };
        Self {
            registry,
            remote,
            remote_config,
            fallback: Arc::new(FallbackModel),
            defaults,
        }
    }

    /// Concatenate messages as `"<role>: <content>\n"` in input order,
    /// then append the trailing assistant cue.
    pub fn build_prompt(messages: &[ChatMessage]) -> String {
        let mut prompt = String::new();
        for message in messages {
            prompt.push_str(message.role.label());
            prompt.push_str(": ");
            prompt.push_str(&message.content);
            prompt.push('\n');
        }
        prompt.push_str("assistant: ");
        prompt
    }

    /// Generate a reply. Degrades to the fallback model for unknown
    /// names and converts every failure into a textual answer.
    pub async fn generate(
        &self,
        messages: &[ChatMessage],
        model_name: &str,
        temperature: Option<f32>,
        max_tokens: Option<usize>,
    ) -> String {
        let params = GenerationParams {
            temperature: temperature.unwrap_or(self.defaults.temperature),
            max_tokens: max_tokens.unwrap_or(self.defaults.max_tokens),
        };

        if self.remote_config.routes(model_name) {
            if let Some(remote) = &self.remote {
                let wire: Vec<WireMessage> = messages
                    .iter()
                    .map(|m| WireMessage {
                        role: m.role.label().to_string(),
                        content: m.content.clone(),
                    })
                    .collect();
                return match remote.chat(&wire, &params).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!(model = model_name, error = %e, "remote chat failed");
                        format!("failed to generate response: {e}")
                    }
                };
            }
        }

        let prompt = Self::build_prompt(messages);
        let generator = match self.registry.generator(model_name).await {
            Some(generator) => generator,
            None => Arc::clone(&self.fallback),
        };

        match generator.generate(&prompt, &params).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(model = model_name, error = %e, "generation failed");
                format!("failed to generate response: {e}")
            }
        }
    }

    /// Wrap a question with the study assistant persona and generate
    /// against the default model.
    pub async fn smart_answer(&self, question: &str) -> String {
        let messages = [
            ChatMessage::new(Role::System, SMART_ANSWER_PERSONA),
            ChatMessage::new(Role::User, question),
        ];
        self.generate(&messages, "default", None, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelsConfig;
    use crate::runtime::LocalEngine;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn orchestrator() -> ChatOrchestrator {
        let models = ModelsConfig {
            finetune_output_dir: PathBuf::from("./does-not-exist"),
            default_base: "base".to_string(),
            pretrained: HashMap::new(),
        };
        let registry = Arc::new(ModelRegistry::new(
            Arc::new(LocalEngine::new()),
            &models,
            GenerationParams::default(),
        ));
        ChatOrchestrator::new(registry, RemoteConfig::default(), GenerationParams::default())
    }

    #[test]
    fn test_prompt_construction_exact() {
        let messages = [
            ChatMessage::new(Role::System, "S"),
            ChatMessage::new(Role::User, "U"),
        ];
        assert_eq!(
            ChatOrchestrator::build_prompt(&messages),
            "system: S\nuser: U\nassistant: "
        );
    }

    #[test]
    fn test_prompt_preserves_order() {
        let messages = [
            ChatMessage::new(Role::User, "first"),
            ChatMessage::new(Role::Assistant, "second"),
            ChatMessage::new(Role::User, "third"),
        ];
        assert_eq!(
            ChatOrchestrator::build_prompt(&messages),
            "user: first\nassistant: second\nuser: third\nassistant: "
        );
    }

    #[tokio::test]
    async fn test_unregistered_model_falls_back() {
        let chat = orchestrator();
        let messages = [ChatMessage::new(Role::User, "what can you do?")];
        let reply = chat.generate(&messages, "no-such-model", None, None).await;
        assert!(!reply.is_empty());
    }

    #[tokio::test]
    async fn test_smart_answer_is_non_empty() {
        let chat = orchestrator();
        let reply = chat.smart_answer("What is ownership in Rust?").await;
        assert!(!reply.is_empty());
    }
}
