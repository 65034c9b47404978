//! Router assembly for the coordination API.

use axum::routing::post;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{self, AppState};

/// Builds the axum router with the three protocol routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/assign", post(handlers::assign))
        .route("/await", post(handlers::await_done))
        .route("/done", post(handlers::done))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
