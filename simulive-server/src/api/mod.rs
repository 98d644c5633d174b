//! HTTP API for the stream server
//!
//! - `GET /api/time` - Authoritative server clock
//! - `GET /api/streams` - Active streams
//! - `GET /api/streams/:id` - One active stream
//! - `GET /api/playback/:playback_id/tokens` - Tokens for a signed stream
//! - `GET|POST /api/admin/streams`, `PUT|DELETE /api/admin/streams/:id` - Admin CRUD
//! - `GET /health` - Liveness

pub mod admin;
pub mod clock;
mod error;
pub mod streams;

use std::sync::Arc;

use axum::{
    routing::{get, put},
    Router,
};
use parking_lot::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::AppError;

use crate::assets::AssetProvider;
use crate::auth::Authorizer;
use crate::metrics::Metrics;
use crate::store::MetadataStore;
use crate::tokens::TokenIssuer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetadataStore>,
    pub assets: Arc<dyn AssetProvider>,
    pub auth: Arc<dyn Authorizer>,
    pub tokens: Arc<dyn TokenIssuer>,
    pub metrics: Arc<RwLock<Metrics>>,
}

/// Build the HTTP API router
pub fn build_router(state: AppState) -> Router {
    // Viewers load the player from other origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/time", get(clock::server_time))
        .route("/api/streams", get(streams::list_streams))
        .route("/api/streams/:id", get(streams::get_stream))
        .route(
            "/api/playback/:playback_id/tokens",
            get(streams::playback_tokens),
        )
        .route(
            "/api/admin/streams",
            get(admin::list_streams).post(admin::create_stream),
        )
        .route(
            "/api/admin/streams/:id",
            put(admin::update_stream).delete(admin::delete_stream),
        )
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
