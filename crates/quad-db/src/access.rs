use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use quad_types::models::{ChatRequest, RequestStatus};

use crate::{ChatError, ChatResult, Database};

/// Proof that a user may act in a room right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomAccess {
    pub room_id: String,
    pub request_id: Uuid,
    pub context_id: Uuid,
    /// Requester first, target second.
    pub participants: [Uuid; 2],
    pub other_participant: Uuid,
    pub room_expires_at: DateTime<Utc>,
    pub campus: String,
}

/// Decide access against an already loaded request.
pub fn check_room_access(
    request: &ChatRequest,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> ChatResult<RoomAccess> {
    let (Some(room_id), Some(room_expires_at)) = (&request.room_id, request.room_expires_at) else {
        return Err(ChatError::NotFound);
    };
    if !request.is_active || request.status != RequestStatus::Accepted {
        return Err(ChatError::NotFound);
    }

    let other_participant = request
        .other_participant(user_id)
        .ok_or(ChatError::Forbidden)?;

    if request.is_room_expired(now) {
        return Err(ChatError::RoomExpired);
    }

    Ok(RoomAccess {
        room_id: room_id.clone(),
        request_id: request.id,
        context_id: request.context_id,
        participants: [request.requester_id, request.target_id],
        other_participant,
        room_expires_at,
        campus: request.campus.clone(),
    })
}

impl Database {
    /// Gate for every room-scoped operation.
    pub fn authorize_room(
        &self,
        room_id: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> ChatResult<RoomAccess> {
        let request = self
            .find_request_by_room(room_id)?
            .ok_or(ChatError::NotFound)?;

        check_room_access(&request, user_id, now).inspect_err(|e| {
            debug!(room_id, user_id = %user_id, reason = e.code(), "room access denied");
        })
    }
}
