use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::{covers, health};
use crate::infra::app_state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/covers/{video_id}", get(covers::get_cover))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
