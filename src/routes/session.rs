use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use crate::dispatcher;
use crate::models::AppState;
use crate::routes::load_session;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/session", get(session_state))
}

/// Current session state as JSON, for scripted clients
async fn session_state(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (_, session, _) = load_session(&state, &headers).await;
    let context = dispatcher::show(&session);
    Json(context).into_response()
}
