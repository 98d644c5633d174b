//! Clock endpoint

use axum::{extract::State, http::header, response::IntoResponse, Json};
use simulive_core::schedule::ServerTime;

use super::AppState;

/// Clients tolerate a cached reading this old
const CACHE_CONTROL: &str = "public, max-age=1";

/// Current server time in ms since the UNIX epoch
///
/// GET /api/time
pub async fn server_time(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.write().clock_request();

    let body = ServerTime {
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    ([(header::CACHE_CONTROL, CACHE_CONTROL)], Json(body))
}
