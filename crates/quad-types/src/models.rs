use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a chat request. Once a request leaves `Pending` it
/// never returns to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// The target's answer to a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
}

/// A proposal from one user to another to open a time-boxed private room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub target_id: Uuid,
    /// The post this request was sent from.
    pub context_id: Uuid,
    pub message: String,
    pub status: RequestStatus,
    pub room_id: Option<String>,
    pub request_expires_at: DateTime<Utc>,
    pub room_expires_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    /// Requester's campus at creation time.
    pub campus: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatRequest {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.requester_id == user_id || self.target_id == user_id
    }

    /// The participant on the other side of `user_id`, or `None` if
    /// `user_id` is not part of this request.
    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        if self.requester_id == user_id {
            Some(self.target_id)
        } else if self.target_id == user_id {
            Some(self.requester_id)
        } else {
            None
        }
    }

    /// Pending but past its response window.
    pub fn is_request_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == RequestStatus::Pending && now > self.request_expires_at
    }

    /// A request without a room counts as expired for room purposes.
    pub fn is_room_expired(&self, now: DateTime<Utc>) -> bool {
        self.room_expires_at.is_none_or(|expires_at| now > expires_at)
    }
}

/// A message inside a private room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub id: Uuid,
    pub room_id: String,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_content: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    /// One emoji per reacting user.
    pub reactions: BTreeMap<Uuid, String>,
}

/// Local mirror of a user's identity as issued by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub campus: String,
}

impl Profile {
    /// Stand-in for a participant whose profile row has gone missing.
    pub fn unknown(user_id: Uuid, campus: &str) -> Self {
        Self {
            user_id,
            display_name: "unknown".to_string(),
            avatar_url: None,
            campus: campus.to_string(),
        }
    }
}
