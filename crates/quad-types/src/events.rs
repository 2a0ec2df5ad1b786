use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{PrivateMessage, Profile, RequestStatus};

/// A fan-out key a gateway session can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Room(String),
    Campus(String),
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    #[serde(rename = "ready")]
    Ready {
        user_id: Uuid,
        display_name: String,
        campus: String,
    },

    /// Someone asked the receiving user for a private chat
    #[serde(rename = "chat.request.created")]
    RequestCreated {
        request_id: Uuid,
        requester: Profile,
        context_id: Uuid,
        message: String,
        request_expires_at: DateTime<Utc>,
    },

    /// The target answered one of the receiving user's requests
    #[serde(rename = "chat.request.resolved")]
    RequestResolved {
        request_id: Uuid,
        status: RequestStatus,
        room_id: Option<String>,
        room_expires_at: Option<DateTime<Utc>>,
    },

    /// A new message was stored in a room
    #[serde(rename = "chat.message.created")]
    MessageCreated { room_id: String, message: PrivateMessage },

    /// A message was edited, deleted or reacted to
    #[serde(rename = "chat.message.updated")]
    MessageUpdated { room_id: String, message: PrivateMessage },

    /// The other participant is typing (never persisted)
    #[serde(rename = "chat.typing")]
    Typing { room_id: String, user_id: Uuid },

    /// Opaque campus-wide notice relayed for the content service
    #[serde(rename = "campus.broadcast")]
    CampusBroadcast {
        campus: String,
        kind: String,
        payload: serde_json::Value,
    },

    #[serde(rename = "subscribed")]
    Subscribed { scope: Scope },

    #[serde(rename = "unsubscribed")]
    Unsubscribed { scope: Scope },

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl GatewayEvent {
    /// Room this event belongs to, if it is room-scoped.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::MessageCreated { room_id, .. }
            | Self::MessageUpdated { room_id, .. }
            | Self::Typing { room_id, .. } => Some(room_id),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe to a room's live events. Requires room access.
    JoinRoom { room_id: String },

    LeaveRoom { room_id: String },

    /// Subscribe to campus-wide broadcasts for the caller's own campus.
    JoinCampus { campus: String },

    /// Indicate typing in a room
    Typing { room_id: String },
}
