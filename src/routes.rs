use axum::{routing::get, routing::post, Json, Router};

use crate::notify::routes as notify_routes;
use crate::presence::routes as presence_routes;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// GET /health — liveness probe.
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws/{user_id}", get(ws_handler::ws_upgrade))
        .route("/api/presence", get(presence_routes::get_all_presence))
        .route(
            "/api/presence/{user_id}",
            get(presence_routes::get_user_presence),
        )
        .route(
            "/api/presence/{user_id}/activity",
            post(presence_routes::report_activity),
        )
        .route(
            "/api/notifications/send",
            post(notify_routes::send_notification),
        )
        .route(
            "/api/notifications/subscriptions/{user_id}",
            get(notify_routes::get_subscriptions),
        )
        .with_state(state)
}
