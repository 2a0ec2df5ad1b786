use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

/// Everything a store or guard operation can refuse with.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("you are not allowed to do that")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("this request has already been answered")]
    AlreadyResponded,

    #[error("this request has expired")]
    RequestExpired,

    #[error("this room has expired")]
    RoomExpired,

    #[error("you already have a pending request for this post")]
    DuplicatePending,

    #[error("you can only chat with people on your campus")]
    CrossCampus,

    #[error("you cannot send a chat request to yourself")]
    SelfReference,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ChatError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::AlreadyResponded => "already_responded",
            Self::RequestExpired => "request_expired",
            Self::RoomExpired => "room_expired",
            Self::DuplicatePending => "duplicate_pending",
            Self::CrossCampus => "cross_campus",
            Self::SelfReference => "self_reference",
            Self::Storage(_) | Self::Internal(_) => "internal_error",
        }
    }

    /// True for failures the caller caused; false for infrastructure faults.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::Internal(_))
    }
}

/// Whether a rusqlite error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Trimmed `value` if its length in chars lies within `min..=max`.
pub(crate) fn bounded_text<'a>(
    field: &'static str,
    value: &'a str,
    min: usize,
    max: usize,
) -> ChatResult<&'a str> {
    let trimmed = value.trim();
    let len = trimmed.chars().count();
    if len < min {
        return Err(ChatError::validation(
            field,
            format!("must be at least {} characters", min),
        ));
    }
    if len > max {
        return Err(ChatError::validation(
            field,
            format!("must be at most {} characters", max),
        ));
    }
    Ok(trimmed)
}
