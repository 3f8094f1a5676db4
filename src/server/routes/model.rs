//! Model management endpoints.

use crate::server::state::ServerState;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

/// Create model management router
pub fn create_router() -> Router<ServerState> {
    Router::new()
        .route("/list", get(list_models))
        .route("/load/{model_name}", post(load_model))
        .route("/unload/{model_name}", post(unload_model))
}

/// Load/unload response body
#[derive(Debug, Serialize)]
struct ActionResponse {
    status: &'static str,
    message: String,
}

impl ActionResponse {
    fn new(success: bool, message: String) -> Self {
        Self {
            status: if success { "success" } else { "error" },
            message,
        }
    }
}

/// List loaded models and discovered fine-tuned artifacts.
async fn list_models(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.registry.list().await)
}

/// Load a model by name. Expected conditions (already loaded, unknown
/// name, engine failure) are reported in the body, not as HTTP errors.
async fn load_model(
    State(state): State<ServerState>,
    Path(model_name): Path<String>,
) -> impl IntoResponse {
    let outcome = state.registry.load(&model_name).await;
    Json(ActionResponse::new(outcome.is_success(), outcome.message()))
}

/// Unload a model by name. A non-loaded name is a normal result.
async fn unload_model(
    State(state): State<ServerState>,
    Path(model_name): Path<String>,
) -> impl IntoResponse {
    let outcome = state.registry.unload(&model_name).await;
    Json(ActionResponse::new(outcome.is_success(), outcome.message()))
}
