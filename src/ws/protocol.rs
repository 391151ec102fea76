//! JSON wire envelopes and inbound message dispatch.
//!
//! Every frame is a JSON object with a `type` discriminator. Unparseable
//! frames are dropped with a warning; the connection stays open.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::models::NotificationRow;
use crate::error::RealtimeError;
use crate::state::AppState;

/// Client → server envelopes.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Liveness probe; the timestamp is echoed back verbatim.
    Ping {
        #[serde(default)]
        timestamp: Value,
    },
    /// Transient activity (typing, viewing, ...) fanned out to peers.
    Activity {
        activity_type: String,
        #[serde(default)]
        details: Value,
    },
    /// Flip a notification's read flag and acknowledge.
    MarkRead { notification_id: i64 },
    /// Add notification types to the caller's subscription set.
    Subscribe { types: Vec<String> },
    /// Remove notification types from the caller's subscription set.
    Unsubscribe { types: Vec<String> },
}

/// Server → client envelopes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Pong { timestamp: Value },
    /// Keepalive probe sent by the reaper's connection sweep.
    Ping { timestamp: String },
    /// Full presence snapshot (list, not delta).
    PresenceUpdate { data: Vec<PresenceEntry> },
    UserActivity { data: ActivityEvent },
    Notification { data: NotificationPayload },
    NotificationRead { data: ReadAck },
}

/// One user's presence as shipped in a snapshot broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: i64,
    pub status: String,
    pub last_seen: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEvent {
    pub user_id: i64,
    pub activity_type: String,
    pub timestamp: String,
    pub details: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationPayload {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub payload: Option<Value>,
    pub created_at: String,
    pub is_read: bool,
    pub sender_id: Option<i64>,
}

impl From<NotificationRow> for NotificationPayload {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.id,
            kind: row.kind,
            message: row.message,
            payload: row.payload,
            created_at: row.created_at,
            is_read: row.is_read,
            sender_id: row.sender_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadAck {
    pub notification_id: i64,
    pub read_at: String,
}

/// Handle one inbound text frame from an authenticated connection.
pub async fn handle_text_message(text: &str, state: &AppState, user_id: i64) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            let err = RealtimeError::MalformedMessage(e.to_string());
            tracing::warn!(user_id, error = %err, "dropping inbound envelope");
            return;
        }
    };

    match message {
        ClientMessage::Ping { timestamp } => {
            if state
                .registry
                .send(user_id, &ServerEvent::Pong { timestamp })
                .is_err()
            {
                state.presence.mark_offline(user_id).await;
            }
        }
        ClientMessage::Activity {
            activity_type,
            details,
        } => {
            state
                .presence
                .activity(user_id, &activity_type, details)
                .await;
        }
        ClientMessage::MarkRead { notification_id } => {
            match state.dispatcher.mark_read(notification_id, user_id).await {
                Ok(_) => {}
                Err(RealtimeError::NotFound(id)) => {
                    tracing::warn!(user_id, notification_id = id, "mark_read for unknown notification");
                }
                Err(e) => {
                    tracing::warn!(user_id, notification_id, error = %e, "mark_read failed");
                }
            }
        }
        ClientMessage::Subscribe { types } => {
            state.dispatcher.subscribe(user_id, types);
        }
        ClientMessage::Unsubscribe { types } => {
            state.dispatcher.unsubscribe(user_id, types);
        }
    }
}
