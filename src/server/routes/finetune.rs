//! Fine-tune endpoints.

use crate::finetune::FineTuneSample;
use crate::server::state::ServerState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Create fine-tune router
pub fn create_router() -> Router<ServerState> {
    Router::new()
        .route("/create", post(create_finetune))
        .route("/status/{task_id}", get(get_status))
}

/// Fine-tune request body
#[derive(Debug, Deserialize)]
struct FineTuneRequest {
    model_name: String,
    data: Vec<FineTuneSample>,
    #[serde(default = "default_epochs")]
    epochs: usize,
    #[serde(default = "default_learning_rate")]
    learning_rate: f32,
    #[serde(default = "default_batch_size")]
    batch_size: usize,
}

fn default_epochs() -> usize {
    3
}

fn default_learning_rate() -> f32 {
    1e-4
}

fn default_batch_size() -> usize {
    8
}

/// Fine-tune response body
#[derive(Debug, Serialize)]
struct FineTuneResponse {
    status: String,
    model_path: String,
    message: String,
}

/// Run a fine-tune to completion. This is the one path that surfaces
/// failures as HTTP 500 instead of degrading.
async fn create_finetune(
    State(state): State<ServerState>,
    Json(request): Json<FineTuneRequest>,
) -> impl IntoResponse {
    match state
        .finetune
        .finetune(
            &request.model_name,
            &request.data,
            request.epochs,
            request.learning_rate,
            request.batch_size,
        )
        .await
    {
        Ok(report) => Json(FineTuneResponse {
            status: "success".to_string(),
            model_path: report.output_dir.display().to_string(),
            message: "model fine-tuned successfully".to_string(),
        })
        .into_response(),
        Err(e) => {
            error!(model = %request.model_name, error = %e, "fine-tune request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Task status lookup; unknown ids are a normal `"unknown"` result.
async fn get_status(
    State(state): State<ServerState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    let status = state.finetune.get_status(&task_id).await;
    Json(serde_json::json!({ "status": status }))
}
