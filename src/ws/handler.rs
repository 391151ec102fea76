//! WebSocket upgrade endpoint and identity resolution.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};

use crate::state::AppState;
use crate::store::profiles;
use crate::ws::actor;

/// 1008 = policy violation: unknown or unparseable user id.
const CLOSE_INVALID_USER: u16 = 1008;
/// 1011 = internal error during identity lookup.
const CLOSE_LOOKUP_FAILED: u16 = 1011;

/// GET /ws/{user_id}
///
/// The path segment is the user's canonical numeric id as a string; string
/// session ids from external callers must be mapped to it before dialing.
/// Unknown identities are admitted at the socket level and immediately
/// closed with a policy close code, so clients see a reason rather than a
/// failed upgrade.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let Ok(user_id) = user_id.parse::<i64>() else {
        tracing::warn!(raw_id = %user_id, "websocket rejected: non-numeric user id");
        return close_after_upgrade(ws, CLOSE_INVALID_USER, "Invalid user ID");
    };

    match profiles::user_exists(&state.db, user_id).await {
        Ok(true) => ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id)),
        Ok(false) => {
            tracing::warn!(user_id, "websocket rejected: unknown user");
            close_after_upgrade(ws, CLOSE_INVALID_USER, "Unknown user")
        }
        Err(e) => {
            tracing::error!(user_id, error = %e, "identity lookup failed");
            close_after_upgrade(ws, CLOSE_LOOKUP_FAILED, "Identity lookup failed")
        }
    }
}

/// Upgrade the connection, then immediately close with the given code.
fn close_after_upgrade(ws: WebSocketUpgrade, code: u16, reason: &'static str) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}
