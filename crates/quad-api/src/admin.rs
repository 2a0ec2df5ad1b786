use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use quad_types::api::{CampusBroadcastRequest, Claims};
use quad_types::models::ChatRequest;

use crate::error::{ApiError, ApiResult};
use crate::extract::JsonBody;
use crate::state::AppState;

fn require_admin(claims: &Claims) -> ApiResult<()> {
    if claims.admin {
        Ok(())
    } else {
        Err(ApiError::AdminOnly)
    }
}

/// POST /admin/chat/requests/{id}/deactivate
pub async fn deactivate_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<ChatRequest>> {
    require_admin(&claims)?;
    let request = state
        .store(move |db| db.deactivate_request(request_id))
        .await?;

    info!(request_id = %request_id, admin = %claims.sub, "request deactivated by admin");
    Ok(Json(request))
}

/// POST /admin/campus/{campus}/broadcast
///
/// Relay for the content service: pushes an opaque notice to every session
/// subscribed to the campus.
pub async fn campus_broadcast(
    State(state): State<AppState>,
    Path(campus): Path<String>,
    Extension(claims): Extension<Claims>,
    JsonBody(req): JsonBody<CampusBroadcastRequest>,
) -> ApiResult<Json<Value>> {
    require_admin(&claims)?;
    let delivered = state
        .dispatcher
        .publish_to_campus(&campus, &req.kind, req.payload)
        .await;

    Ok(Json(json!({ "delivered": delivered })))
}
