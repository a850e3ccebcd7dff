use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

use crate::infra::app_state::AppState;

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let stats = state.pipeline.stats();
    let workers = json!({
        "claimed": stats.claimed,
        "succeeded": stats.succeeded,
        "retried": stats.retried,
        "abandoned": stats.abandoned,
    });

    match state.pipeline.queue_depth().await {
        Ok(depth) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "timestamp": Utc::now().to_rfc3339(),
                "running": state.pipeline.is_running(),
                "queueDepth": depth,
                "workers": workers,
            })),
        ),
        Err(err) => {
            warn!(error = %err, "health check could not reach the coordination store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "timestamp": Utc::now().to_rfc3339(),
                    "running": state.pipeline.is_running(),
                    "error": err.to_string(),
                    "workers": workers,
                })),
            )
        }
    }
}
