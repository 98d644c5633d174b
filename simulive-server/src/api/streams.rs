//! Viewer-facing stream endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use simulive_core::schedule::{SignedTokens, StreamRecord};
use tracing::{debug, warn};

use super::{AppError, AppState};

/// Streams open to viewers
///
/// GET /api/streams
pub async fn list_streams(State(state): State<AppState>) -> Json<Vec<StreamRecord>> {
    let streams: Vec<StreamRecord> = state
        .store
        .list()
        .into_iter()
        .filter(|r| r.is_active)
        .collect();
    state.metrics.write().stream_lookups += 1;
    Json(streams)
}

/// One stream. Inactive streams are indistinguishable from missing ones.
///
/// GET /api/streams/:id
pub async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StreamRecord>, AppError> {
    let record = state.store.get(&id).filter(|r| r.is_active);
    state.metrics.write().stream_lookup(&id, record.is_some());

    match record {
        Some(record) => {
            debug!("Serving stream {}", id);
            Ok(Json(record))
        }
        None => Err(AppError::NotFound(format!("stream {}", id))),
    }
}

/// Playback tokens for an active signed stream
///
/// GET /api/playback/:playback_id/tokens
pub async fn playback_tokens(
    State(state): State<AppState>,
    Path(playback_id): Path<String>,
) -> Result<Json<SignedTokens>, AppError> {
    let eligible = state
        .store
        .find_by_playback_id(&playback_id)
        .is_some_and(|r| r.is_active && r.playback_policy.requires_tokens());

    if !eligible {
        state
            .metrics
            .write()
            .token_failed(&playback_id, "no active signed stream");
        return Err(AppError::NotFound(format!("playback {}", playback_id)));
    }

    match state.tokens.issue(&playback_id) {
        Ok(tokens) => {
            state.metrics.write().token_issued(&playback_id);
            Ok(Json(tokens))
        }
        Err(e) => {
            warn!("Token issuance failed for {}: {}", playback_id, e);
            state.metrics.write().token_failed(&playback_id, &e.to_string());
            Err(e.into())
        }
    }
}
