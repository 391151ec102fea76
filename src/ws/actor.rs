//! Actor-per-connection: one reader loop and one writer task per channel.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;
use crate::ws::protocol;

/// Run the actor for an admitted WebSocket.
///
/// Splits the socket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: processes incoming frames, dispatches to protocol handlers
///
/// Any part of the system reaches this client by cloning the registered
/// sender. Each inbound frame is processed to completion before the next is
/// read, preserving per-connection ordering.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: i64) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Admission order: register the channel, seed default subscriptions,
    // go online (broadcasts the snapshot), then flush the unread backlog.
    state.registry.admit(user_id, tx.clone());
    state.dispatcher.register(user_id);
    state.presence.connect(user_id).await;

    match state.dispatcher.flush_pending(user_id).await {
        Ok(0) => {}
        Ok(n) => tracing::debug!(user_id, count = n, "flushed pending notifications"),
        Err(e) => tracing::warn!(user_id, error = %e, "pending notification flush failed"),
    }

    tracing::info!(user_id, "websocket actor started");

    // Writer task: forwards mpsc messages to the WebSocket sink.
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(&text, &state, user_id).await;
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Pong(_) => {}
                Message::Binary(_) => {
                    tracing::debug!(user_id, "ignoring binary frame (protocol is JSON text)");
                }
                Message::Close(frame) => {
                    tracing::info!(user_id, reason = ?frame, "client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(user_id, error = %e, "websocket receive error");
                break;
            }
            None => {
                tracing::info!(user_id, "websocket stream ended");
                break;
            }
        }
    }

    writer_handle.abort();

    // Only this actor's own entry may be torn down. If a newer connection
    // replaced it, the user is still online and no transition is broadcast.
    if state.registry.evict_if_owner(user_id, &tx) {
        state.dispatcher.deregister(user_id);
        state.presence.disconnect(user_id).await;
    }

    tracing::info!(user_id, "websocket actor stopped");
}

/// Writer task: receives messages from the mpsc channel and forwards them
/// to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}
