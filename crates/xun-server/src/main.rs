//! Binary entrypoint for the coordination server.
//!
//! Reads configuration from environment variables:
//! - `XUN_COORDINATOR_PORT`: listen port (default: "7600")

use xun_server::handlers::AppState;
use xun_server::router::build_router;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let port = std::env::var("XUN_COORDINATOR_PORT").unwrap_or_else(|_| "7600".to_string());
    let addr = format!("0.0.0.0:{}", port);

    let app = build_router(AppState::new());
    tracing::info!("xun coordination server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind coordination port");
    axum::serve(listener, app)
        .await
        .expect("coordination server failed");
}
