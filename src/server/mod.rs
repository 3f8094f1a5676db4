//! HTTP server assembly.

pub mod routes;
pub mod state;

use axum::{response::IntoResponse, routing::get, Json, Router};
use state::ServerState;
use tower_http::cors::{Any, CorsLayer};

/// Assemble the full application router: API routes, health check, and
/// permissive CORS.
pub fn build_router(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/chat", routes::chat::create_router())
        .nest("/api/finetune", routes::finetune::create_router())
        .nest("/api/model", routes::model::create_router())
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}
