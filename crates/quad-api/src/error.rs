use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use quad_db::ChatError;
use quad_types::api::ErrorBody;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    /// Any failure of the room guard. Callers cannot tell a missing room from
    /// one they may not enter or one that has lapsed.
    #[error("room not found or expired")]
    RoomUnavailable,

    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("admin only")]
    AdminOnly,

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Collapse a guard refusal; other errors pass through.
    pub fn room(err: ChatError) -> Self {
        match err {
            ChatError::NotFound | ChatError::Forbidden | ChatError::RoomExpired => {
                Self::RoomUnavailable
            }
            other => Self::Chat(other),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Chat(err) => match err {
                ChatError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                ChatError::SelfReference => StatusCode::BAD_REQUEST,
                ChatError::Forbidden | ChatError::CrossCampus => StatusCode::FORBIDDEN,
                ChatError::NotFound => StatusCode::NOT_FOUND,
                ChatError::AlreadyResponded | ChatError::DuplicatePending => StatusCode::CONFLICT,
                ChatError::RequestExpired | ChatError::RoomExpired => StatusCode::GONE,
                ChatError::Storage(_) | ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::RoomUnavailable => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::AdminOnly => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        let (code, field) = match self {
            Self::Chat(ChatError::Validation { field, .. }) => ("validation_error", Some(field.to_string())),
            Self::Chat(err) => (err.code(), None),
            Self::RoomUnavailable => ("room_unavailable", None),
            Self::Unauthorized => ("unauthorized", None),
            Self::AdminOnly => ("admin_only", None),
            Self::Internal(_) => ("internal_error", None),
        };
        ErrorBody {
            code: code.to_string(),
            message: self.to_string(),
            field,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "internal server error");
            ErrorBody {
                code: "internal_error".into(),
                message: "internal server error".into(),
                field: None,
            }
        } else {
            self.body()
        };

        (status, Json(body)).into_response()
    }
}
