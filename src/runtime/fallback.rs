//! Static fallback generation capability.
//!
//! Used when a request names a model that is neither loaded nor routed to
//! the remote endpoint. This is an explicit degraded mode, not an error:
//! the service answers with a canned, keyword-matched response so chat
//! never fails outright.

use crate::error::Result;
use crate::runtime::{GenerationParams, TextGenerator};
use async_trait::async_trait;

/// Keyword-matched canned responses.
pub struct FallbackModel;

const DEFAULT_REPLY: &str =
    "No model is currently loaded for this request. Load a model via \
     POST /api/model/load/{name} or configure a remote endpoint to get \
     real completions.";

impl FallbackModel {
    /// Pick a canned reply for the prompt. Always non-empty.
    fn respond(prompt: &str) -> &'static str {
        let prompt = prompt.to_lowercase();
        if prompt.contains("hello") || prompt.contains("hi ") {
            "Hello! I am running in fallback mode without a loaded model, \
             but I am happy to confirm the service is up."
        } else if prompt.contains("help") {
            "This service exposes chat completion, fine-tuning, and model \
             management endpoints. See /api/model/list for available models."
        } else if prompt.contains("status") || prompt.contains("health") {
            "The service is healthy. No local model is loaded for this \
             request, so responses are canned."
        } else {
            DEFAULT_REPLY
        }
    }
}

#[async_trait]
impl TextGenerator for FallbackModel {
    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
        Ok(Self::respond(prompt).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fallback_never_empty() {
        let model = FallbackModel;
        let params = GenerationParams::default();
        for prompt in ["", "hello there", "help me", "what is rust?", "status?"] {
            let reply = model.generate(prompt, &params).await.unwrap();
            assert!(!reply.is_empty());
        }
    }

    #[tokio::test]
    async fn test_fallback_keyword_match() {
        let model = FallbackModel;
        let params = GenerationParams::default();
        let reply = model.generate("user: hello\nassistant: ", &params).await.unwrap();
        assert!(reply.starts_with("Hello!"));
    }
}
