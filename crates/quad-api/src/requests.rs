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

use quad_db::ChatError;
use quad_db::requests::DEFAULT_LIST_LIMIT;
use quad_types::api::{ActiveRoom, Claims, CreateChatRequest, RequestListResponse, RespondRequest};
use quad_types::events::GatewayEvent;
use quad_types::models::RequestStatus;

use crate::error::ApiResult;
use crate::extract::{JsonBody, QueryParams};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

/// POST /chat/requests
pub async fn create_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    JsonBody(req): JsonBody<CreateChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let requester = claims.profile();
    let profile = requester.clone();
    let request = state
        .store(move |db| {
            db.create_request(&profile, req.target_id, req.context_id, &req.message, Utc::now())
        })
        .await?;

    let delivered = state
        .dispatcher
        .send_to_user(
            request.target_id,
            GatewayEvent::RequestCreated {
                request_id: request.id,
                requester,
                context_id: request.context_id,
                message: request.message.clone(),
                request_expires_at: request.request_expires_at,
            },
        )
        .await;
    debug!(request_id = %request.id, delivered, "request notification sent");

    Ok((StatusCode::CREATED, Json(request)))
}

/// GET /chat/requests
pub async fn list_requests(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    QueryParams(query): QueryParams<ListQuery>,
) -> ApiResult<Json<RequestListResponse>> {
    let user_id = claims.sub;
    let lists = state
        .store(move |db| db.list_requests(user_id, query.limit, Utc::now()))
        .await?;

    let active_rooms = lists
        .active_rooms
        .into_iter()
        .filter_map(|r| {
            Some(ActiveRoom {
                other_participant: r.other_participant(user_id)?,
                room_id: r.room_id?,
                room_expires_at: r.room_expires_at?,
                request_id: r.id,
                context_id: r.context_id,
            })
        })
        .collect();

    Ok(Json(RequestListResponse {
        sent: lists.sent,
        received: lists.received,
        active_rooms,
    }))
}

/// GET /chat/requests/{id}
pub async fn get_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let mut request = state.store(move |db| db.get_request(request_id)).await?;

    // Outsiders and deactivated requests look the same as missing ones.
    if !request.is_active || !(request.is_participant(claims.sub) || claims.admin) {
        return Err(ChatError::NotFound.into());
    }
    if request.is_request_expired(Utc::now()) {
        request.status = RequestStatus::Expired;
    }

    Ok(Json(request))
}

/// POST /chat/requests/{id}/respond
pub async fn respond(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    JsonBody(req): JsonBody<RespondRequest>,
) -> ApiResult<impl IntoResponse> {
    let responder = claims.sub;
    let request = state
        .store(move |db| db.respond(request_id, responder, req.decision, Utc::now()))
        .await?;

    state
        .dispatcher
        .send_to_user(
            request.requester_id,
            GatewayEvent::RequestResolved {
                request_id: request.id,
                status: request.status,
                room_id: request.room_id.clone(),
                room_expires_at: request.room_expires_at,
            },
        )
        .await;

    Ok(Json(request))
}
