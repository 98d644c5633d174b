//! Admin stream endpoints
//!
//! Every handler checks authorization before touching the store.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use simulive_core::schedule::{
    PlaybackPolicy, StreamRecord, DEFAULT_DRIFT_TOLERANCE_SECS, DEFAULT_SYNC_INTERVAL_MS,
};
use tracing::info;

use super::{AppError, AppState};
use crate::assets::AssetProvider;

/// Length of generated stream ids
const STREAM_ID_LENGTH: usize = 12;

/// Request body for creating or replacing a stream.
///
/// Either `assetId` or both `playbackId` and `duration` must be given.
/// Explicit fields win over what the asset provides.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub playback_id: Option<String>,
    #[serde(default)]
    pub playback_policy: Option<PlaybackPolicy>,
    pub scheduled_start: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub sync_interval: Option<u64>,
    #[serde(default)]
    pub drift_tolerance: Option<f64>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl StreamRequest {
    /// Build a full record, resolving the asset if one is named
    pub fn into_record(self, id: String, assets: &dyn AssetProvider) -> Result<StreamRecord, AppError> {
        let asset = match &self.asset_id {
            Some(asset_id) => Some(
                assets
                    .resolve(asset_id)
                    .ok_or_else(|| AppError::BadRequest(format!("unknown asset {}", asset_id)))?,
            ),
            None => None,
        };

        let playback_id = self
            .playback_id
            .or_else(|| asset.as_ref().map(|a| a.playback_id.clone()))
            .ok_or_else(|| AppError::BadRequest("playbackId or assetId required".to_string()))?;
        let duration = self
            .duration
            .or_else(|| asset.as_ref().map(|a| a.duration))
            .ok_or_else(|| AppError::BadRequest("duration or assetId required".to_string()))?;
        let playback_policy = self
            .playback_policy
            .or_else(|| asset.as_ref().map(|a| a.playback_policy))
            .unwrap_or_default();

        Ok(StreamRecord {
            id,
            title: self.title,
            description: self.description,
            asset_id: self.asset_id,
            playback_id,
            playback_policy,
            scheduled_start: self.scheduled_start,
            duration,
            sync_interval: self.sync_interval.unwrap_or(DEFAULT_SYNC_INTERVAL_MS),
            drift_tolerance: self.drift_tolerance.unwrap_or(DEFAULT_DRIFT_TOLERANCE_SECS),
            is_active: self.is_active.unwrap_or(true),
        })
    }
}

fn new_stream_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STREAM_ID_LENGTH)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

fn authorize(state: &AppState, headers: &HeaderMap, action: &str) -> Result<(), AppError> {
    if state.auth.is_authorized(headers) {
        Ok(())
    } else {
        state.metrics.write().request_rejected(action);
        Err(AppError::Unauthorized)
    }
}

/// All streams, including inactive ones
///
/// GET /api/admin/streams
pub async fn list_streams(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<StreamRecord>>, AppError> {
    authorize(&state, &headers, "list streams")?;
    Ok(Json(state.store.list()))
}

/// POST /api/admin/streams
pub async fn create_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StreamRequest>,
) -> Result<(StatusCode, Json<StreamRecord>), AppError> {
    authorize(&state, &headers, "create stream")?;

    let id = req
        .id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(new_stream_id);
    let record = req.into_record(id, state.assets.as_ref())?;
    let record = state.store.create(record)?;

    info!("Created stream {} starting {}", record.id, record.scheduled_start);
    let count = state.store.list().len();
    state.metrics.write().admin_mutation("Created", &record.id, count);
    Ok((StatusCode::CREATED, Json(record)))
}

/// Replace a stream. Viewers already watching keep their snapshot.
///
/// PUT /api/admin/streams/:id
pub async fn update_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<StreamRequest>,
) -> Result<Json<StreamRecord>, AppError> {
    authorize(&state, &headers, "update stream")?;

    let record = req.into_record(id.clone(), state.assets.as_ref())?;
    let record = state.store.update(&id, record)?;

    info!("Updated stream {}", record.id);
    let count = state.store.list().len();
    state.metrics.write().admin_mutation("Updated", &record.id, count);
    Ok(Json(record))
}

/// DELETE /api/admin/streams/:id
pub async fn delete_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    authorize(&state, &headers, "delete stream")?;

    state.store.delete(&id)?;

    info!("Deleted stream {}", id);
    let count = state.store.list().len();
    state.metrics.write().admin_mutation("Deleted", &id, count);
    Ok(StatusCode::NO_CONTENT)
}
