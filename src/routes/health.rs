use axum::{extract::State, routing::get, Json, Router};
use tracing::warn;

use crate::models::{AppState, HealthResponse};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/health", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let count = state.services.index.read().await.chunk_count().await;
    let indexed_chunks = match count {
        Ok(count) => Some(count),
        Err(e) => {
            warn!(error = %e, "Could not count indexed chunks");
            None
        }
    };

    Json(HealthResponse {
        status: if indexed_chunks.is_some() { "ok" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        indexed_chunks,
    })
}
