use super::state::AppState;
use crate::session::SessionStats;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::debug;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ChannelListResponse {
    pub channels: Vec<SessionStats>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /channels
/// Stats of every running channel session
pub async fn list_channels(State(state): State<AppState>) -> impl IntoResponse {
    Json(ChannelListResponse {
        channels: state.registry.all_stats(),
    })
}

/// GET /channels/:channel_id/status
/// Stats of one channel session
pub async fn get_channel_status(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> impl IntoResponse {
    match state.registry.stats(&channel_id) {
        Some(stats) => (StatusCode::OK, Json(stats)).into_response(),
        None => {
            debug!("Status requested for unknown channel {}", channel_id);
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("Channel {} is not being recorded", channel_id),
                }),
            )
                .into_response()
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
