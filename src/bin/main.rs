use clap::Parser;
use lora_serve::config::{Args, ServiceConfig};
use lora_serve::server::{build_router, state::ServerState};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let args = Args::parse();
    let config = ServiceConfig::load(&args)?;
    let addr = format!("{}:{}", config.server.host, config.server.port);

    // Build shared state and router
    let state = ServerState::new(config);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("lora-serve listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
