use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handler;
use crate::state::AppState;

/// Build the axum router with all ShareX endpoints.
pub fn build_router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_size());
    Router::new()
        .route("/v1/health", get(handler::health_handler))
        .route("/upload", post(handler::upload_handler))
        .route("/:call_reference", get(handler::download_handler))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
