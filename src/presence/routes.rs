//! REST endpoints over the presence tracker.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::ws::protocol::PresenceEntry;

#[derive(Debug, Serialize)]
pub struct AllPresenceResponse {
    pub presence: Vec<PresenceEntry>,
}

/// GET /api/presence — current presence for all tracked users.
pub async fn get_all_presence(State(state): State<AppState>) -> Json<AllPresenceResponse> {
    Json(AllPresenceResponse {
        presence: state.presence.snapshot(),
    })
}

#[derive(Debug, Serialize)]
pub struct UserPresenceResponse {
    pub presence: Option<PresenceEntry>,
}

/// GET /api/presence/{user_id} — one user's presence, null if never seen.
pub async fn get_user_presence(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Json<UserPresenceResponse> {
    Json(UserPresenceResponse {
        presence: state.presence.get(user_id),
    })
}

#[derive(Debug, Deserialize)]
pub struct ReportActivityRequest {
    pub activity_type: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ReportActivityResponse {
    pub status: &'static str,
}

/// POST /api/presence/{user_id}/activity — report activity out of band
/// (same fan-out as the `activity` channel message).
pub async fn report_activity(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(body): Json<ReportActivityRequest>,
) -> Json<ReportActivityResponse> {
    state
        .presence
        .activity(user_id, &body.activity_type, body.details)
        .await;

    Json(ReportActivityResponse {
        status: "activity_reported",
    })
}
