//! REST endpoints over the notification dispatcher.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::RealtimeError;
use crate::state::AppState;
use crate::store::profiles;

#[derive(Debug, Deserialize)]
pub struct SendNotificationRequest {
    pub recipient_id: i64,
    pub notification_type: String,
    pub message: String,
    pub sender_id: Option<i64>,
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct SendNotificationResponse {
    pub status: &'static str,
    pub notification_id: i64,
}

/// POST /api/notifications/send — persist and push a notification.
/// 404 if the recipient is unknown; 500 if the store rejects the write.
pub async fn send_notification(
    State(state): State<AppState>,
    Json(body): Json<SendNotificationRequest>,
) -> Result<Json<SendNotificationResponse>, StatusCode> {
    match profiles::user_exists(&state.db, body.recipient_id).await {
        Ok(true) => {}
        Ok(false) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(recipient_id = body.recipient_id, error = %e, "recipient lookup failed");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    let row = state
        .dispatcher
        .create_and_send(
            body.recipient_id,
            &body.notification_type,
            &body.message,
            body.sender_id,
            body.payload,
        )
        .await
        .map_err(|e| match e {
            RealtimeError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => {
                tracing::error!(error = %e, "notification create failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })?;

    Ok(Json(SendNotificationResponse {
        status: "notification_sent",
        notification_id: row.id,
    }))
}

#[derive(Debug, Serialize)]
pub struct SubscriptionsResponse {
    pub user_id: i64,
    pub subscriptions: Vec<String>,
}

/// GET /api/notifications/subscriptions/{user_id} — current subscription
/// set. Empty when the user has no open channel.
pub async fn get_subscriptions(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Json<SubscriptionsResponse> {
    Json(SubscriptionsResponse {
        user_id,
        subscriptions: state.dispatcher.subscriptions_for(user_id),
    })
}
