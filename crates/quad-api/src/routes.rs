use axum::{
    Router, middleware,
    routing::{get, patch, post, put},
};

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{admin, messages, reactions, requests};

/// GET /health, no auth.
pub async fn health() -> &'static str {
    "ok"
}

/// Every HTTP route except the gateway upgrade.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/chat/requests",
            post(requests::create_request).get(requests::list_requests),
        )
        .route("/chat/requests/{id}", get(requests::get_request))
        .route("/chat/requests/{id}/respond", post(requests::respond))
        .route("/chat/rooms/{room_id}", get(messages::get_room))
        .route(
            "/chat/rooms/{room_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/chat/rooms/{room_id}/messages/{message_id}",
            patch(messages::edit_message).delete(messages::delete_message),
        )
        .route(
            "/chat/rooms/{room_id}/messages/{message_id}/reaction",
            put(reactions::set_reaction).delete(reactions::remove_reaction),
        )
        .route(
            "/admin/chat/requests/{id}/deactivate",
            post(admin::deactivate_request),
        )
        .route("/admin/campus/{campus}/broadcast", post(admin::campus_broadcast))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().route("/health", get(health)).merge(protected)
}
