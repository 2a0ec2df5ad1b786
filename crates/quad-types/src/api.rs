use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatRequest, Decision, PrivateMessage, Profile};

// -- JWT Claims --

/// Claims issued by the external auth service. Shared by the REST middleware
/// and the gateway handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub campus: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub admin: bool,
    pub exp: usize,
}

impl Claims {
    pub fn profile(&self) -> Profile {
        Profile {
            user_id: self.sub,
            display_name: self.name.clone(),
            avatar_url: self.avatar_url.clone(),
            campus: self.campus.clone(),
        }
    }
}

// -- Requests --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChatRequest {
    pub target_id: Uuid,
    pub context_id: Uuid,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RespondRequest {
    pub decision: Decision,
}

#[derive(Debug, Serialize)]
pub struct ActiveRoom {
    pub room_id: String,
    pub request_id: Uuid,
    pub context_id: Uuid,
    pub other_participant: Uuid,
    pub room_expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RequestListResponse {
    pub sent: Vec<ChatRequest>,
    pub received: Vec<ChatRequest>,
    pub active_rooms: Vec<ActiveRoom>,
}

// -- Rooms & messages --

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    pub room_id: String,
    pub request_id: Uuid,
    pub other_participant: Profile,
    pub room_expires_at: DateTime<Utc>,
    pub messages: Vec<PrivateMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditMessageRequest {
    pub content: String,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetReactionRequest {
    pub emoji: String,
}

// -- Campus relay --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CampusBroadcastRequest {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

// -- Errors --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}
