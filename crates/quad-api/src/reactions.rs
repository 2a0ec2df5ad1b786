use axum::{
    Extension, Json,
    extract::{Path, State},
};
use chrono::Utc;
use uuid::Uuid;

use quad_types::api::{Claims, SetReactionRequest};
use quad_types::models::PrivateMessage;

use crate::error::ApiResult;
use crate::extract::JsonBody;
use crate::messages::{message_in_room, publish_update};
use crate::state::AppState;

/// PUT /chat/rooms/{room_id}/messages/{message_id}/reaction
pub async fn set_reaction(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(String, Uuid)>,
    Extension(claims): Extension<Claims>,
    JsonBody(req): JsonBody<SetReactionRequest>,
) -> ApiResult<Json<PrivateMessage>> {
    let user_id = claims.sub;
    let message = state
        .blocking(move |db| {
            message_in_room(db, &room_id, message_id, user_id)?;
            Ok(db.add_reaction(message_id, user_id, &req.emoji, Utc::now())?)
        })
        .await?;

    publish_update(&state, &message).await;
    Ok(Json(message))
}

/// DELETE /chat/rooms/{room_id}/messages/{message_id}/reaction
pub async fn remove_reaction(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(String, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<PrivateMessage>> {
    let user_id = claims.sub;
    let message = state
        .blocking(move |db| {
            message_in_room(db, &room_id, message_id, user_id)?;
            Ok(db.remove_reaction(message_id, user_id)?)
        })
        .await?;

    publish_update(&state, &message).await;
    Ok(Json(message))
}
