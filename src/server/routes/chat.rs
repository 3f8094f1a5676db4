//! Chat endpoints.

use crate::chat::ChatMessage;
use crate::server::state::ServerState;
use axum::{
    extract::{Json, Query, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};

/// Create chat router
pub fn create_router() -> Router<ServerState> {
    Router::new()
        .route("/completions", post(chat_completions))
        .route("/smart-answer", post(smart_answer))
}

/// Chat completion request
#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default = "default_model")]
    model: String,
    messages: Vec<ChatMessage>,
    temperature: Option<f32>,
    max_tokens: Option<usize>,
}

fn default_model() -> String {
    "default".to_string()
}

/// Chat completion response
#[derive(Debug, Serialize)]
struct ChatResponse {
    content: String,
}

/// Smart-answer query parameters
#[derive(Debug, Deserialize)]
struct SmartAnswerParams {
    question: String,
}

/// Generate a chat completion. The orchestrator converts every failure
/// into a textual answer, so this handler always returns 200.
async fn chat_completions(
    State(state): State<ServerState>,
    Json(request): Json<ChatRequest>,
) -> impl IntoResponse {
    let content = state
        .chat
        .generate(
            &request.messages,
            &request.model,
            request.temperature,
            request.max_tokens,
        )
        .await;
    Json(ChatResponse { content })
}

/// Answer a study question with the fixed assistant persona.
async fn smart_answer(
    State(state): State<ServerState>,
    Query(params): Query<SmartAnswerParams>,
) -> impl IntoResponse {
    let content = state.chat.smart_answer(&params.question).await;
    Json(ChatResponse { content })
}
