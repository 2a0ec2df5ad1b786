use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use quad_db::messages::DEFAULT_PAGE_SIZE;
use quad_db::{ChatError, Database};
use quad_types::api::{Claims, EditMessageRequest, RoomResponse, SendMessageRequest};
use quad_types::events::GatewayEvent;
use quad_types::models::{PrivateMessage, Profile};

use crate::error::{ApiError, ApiResult};
use crate::extract::{JsonBody, QueryParams};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Id of the oldest message from the previous page.
    pub before: Option<Uuid>,
}

fn default_limit() -> usize {
    DEFAULT_PAGE_SIZE
}

/// GET /chat/rooms/{room_id}
pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<RoomResponse>> {
    let user_id = claims.sub;
    let room = state
        .blocking(move |db| {
            let now = Utc::now();
            let access = db.authorize_room(&room_id, user_id, now).map_err(ApiError::room)?;
            let other = db
                .get_profile(access.other_participant)?
                .unwrap_or_else(|| Profile::unknown(access.other_participant, &access.campus));
            let messages = db.list_messages(&room_id, DEFAULT_PAGE_SIZE, None)?;

            Ok(RoomResponse {
                room_id: access.room_id,
                request_id: access.request_id,
                other_participant: other,
                room_expires_at: access.room_expires_at,
                messages,
            })
        })
        .await?;

    Ok(Json(room))
}

/// GET /chat/rooms/{room_id}/messages
pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    QueryParams(query): QueryParams<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<PrivateMessage>>> {
    let user_id = claims.sub;
    let messages = state
        .blocking(move |db| {
            db.authorize_room(&room_id, user_id, Utc::now())
                .map_err(ApiError::room)?;
            Ok(db.list_messages(&room_id, query.limit, query.before)?)
        })
        .await?;

    Ok(Json(messages))
}

/// POST /chat/rooms/{room_id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Extension(claims): Extension<Claims>,
    JsonBody(req): JsonBody<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let sender = claims.sub;
    let message = state
        .blocking(move |db| {
            let now = Utc::now();
            let access = db.authorize_room(&room_id, sender, now).map_err(ApiError::room)?;
            Ok(db.post_message(&access.room_id, sender, &req.content, now)?)
        })
        .await?;

    let delivered = state
        .dispatcher
        .publish_room(GatewayEvent::MessageCreated {
            room_id: message.room_id.clone(),
            message: message.clone(),
        })
        .await;
    debug!(message_id = %message.id, delivered, "message published");

    Ok((StatusCode::CREATED, Json(message)))
}

/// PATCH /chat/rooms/{room_id}/messages/{message_id}
pub async fn edit_message(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(String, Uuid)>,
    Extension(claims): Extension<Claims>,
    JsonBody(req): JsonBody<EditMessageRequest>,
) -> ApiResult<Json<PrivateMessage>> {
    let user_id = claims.sub;
    let message = state
        .blocking(move |db| {
            let now = Utc::now();
            message_in_room(db, &room_id, message_id, user_id)?;
            Ok(db.edit_message(message_id, user_id, &req.content, now)?)
        })
        .await?;

    publish_update(&state, &message).await;
    Ok(Json(message))
}

/// DELETE /chat/rooms/{room_id}/messages/{message_id}
pub async fn delete_message(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(String, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    let user_id = claims.sub;
    let message = state
        .blocking(move |db| {
            message_in_room(db, &room_id, message_id, user_id)?;
            Ok(db.delete_message(message_id, user_id, Utc::now())?)
        })
        .await?;

    publish_update(&state, &message).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Guard the room, then make sure the message actually lives in it.
pub(crate) fn message_in_room(
    db: &Database,
    room_id: &str,
    message_id: Uuid,
    user_id: Uuid,
) -> ApiResult<PrivateMessage> {
    db.authorize_room(room_id, user_id, Utc::now())
        .map_err(ApiError::room)?;
    let message = db.get_message(message_id)?;
    if message.room_id != room_id {
        return Err(ChatError::NotFound.into());
    }
    Ok(message)
}

pub(crate) async fn publish_update(state: &AppState, message: &PrivateMessage) {
    state
        .dispatcher
        .publish_room(GatewayEvent::MessageUpdated {
            room_id: message.room_id.clone(),
            message: message.clone(),
        })
        .await;
}
