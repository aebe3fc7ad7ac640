//! HTTP routes
//!
//! - `/` - The page: `GET` shows the session, `POST` runs a form action
//! - `/api/session` - The same render context as JSON
//! - `/api/health` - Health check

pub mod health;
pub mod session;
pub mod ui;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::AppState;
use crate::session::{session_cookie, session_id_from_headers, SessionState};

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");
    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .merge(ui::router())
        .merge(session::router())
        .merge(health::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Session snapshot for the request's cookie
pub(crate) async fn load_session(state: &AppState, headers: &HeaderMap) -> (Uuid, SessionState, bool) {
    state.sessions.load(session_id_from_headers(headers)).await
}

/// Attach the session cookie when the session was just created
pub(crate) fn with_session_cookie(response: impl IntoResponse, id: Uuid, fresh: bool) -> Response {
    let mut response = response.into_response();
    if fresh {
        match HeaderValue::from_str(&session_cookie(id)) {
            Ok(value) => {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
            Err(e) => warn!(error = %e, "Could not build session cookie"),
        }
    }
    response
}
