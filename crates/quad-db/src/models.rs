//! Row mapping between SQLite and the shared domain models.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`)
//! so that lexical comparison in SQL matches chronological order.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use quad_types::models::{ChatRequest, PrivateMessage, Profile, RequestStatus};

pub const REQUEST_COLUMNS: &str = "id, requester_id, target_id, context_id, message, status, room_id, \
     request_expires_at, room_expires_at, responded_at, campus, is_active, created_at";

pub const MESSAGE_COLUMNS: &str = "id, room_id, sender_id, content, created_at, is_edited, edited_at, \
     original_content, is_deleted, deleted_at";

pub const PROFILE_COLUMNS: &str = "user_id, display_name, avatar_url, campus";

pub fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Drop precision the store cannot keep, so returned models match what a
/// later read produces.
pub fn stored_instant(value: DateTime<Utc>) -> DateTime<Utc> {
    value.trunc_subsecs(6)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn get_uuid(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn get_ts(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion_error(idx, e))
}

fn get_opt_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => get_ts(row, idx).map(Some),
        None => Ok(None),
    }
}

#[derive(Debug)]
struct UnknownStatus(String);

impl std::fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown request status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

/// Maps a row selected with [`REQUEST_COLUMNS`].
pub fn request_from_row(row: &Row) -> rusqlite::Result<ChatRequest> {
    let status_raw: String = row.get(5)?;
    let status = RequestStatus::from_db(&status_raw)
        .ok_or_else(|| conversion_error(5, UnknownStatus(status_raw.clone())))?;

    Ok(ChatRequest {
        id: get_uuid(row, 0)?,
        requester_id: get_uuid(row, 1)?,
        target_id: get_uuid(row, 2)?,
        context_id: get_uuid(row, 3)?,
        message: row.get(4)?,
        status,
        room_id: row.get(6)?,
        request_expires_at: get_ts(row, 7)?,
        room_expires_at: get_opt_ts(row, 8)?,
        responded_at: get_opt_ts(row, 9)?,
        campus: row.get(10)?,
        is_active: row.get(11)?,
        created_at: get_ts(row, 12)?,
    })
}

/// Maps a row selected with [`MESSAGE_COLUMNS`]. Reactions are loaded
/// separately and start empty.
pub fn message_from_row(row: &Row) -> rusqlite::Result<PrivateMessage> {
    Ok(PrivateMessage {
        id: get_uuid(row, 0)?,
        room_id: row.get(1)?,
        sender_id: get_uuid(row, 2)?,
        content: row.get(3)?,
        created_at: get_ts(row, 4)?,
        is_edited: row.get(5)?,
        edited_at: get_opt_ts(row, 6)?,
        original_content: row.get(7)?,
        is_deleted: row.get(8)?,
        deleted_at: get_opt_ts(row, 9)?,
        reactions: Default::default(),
    })
}

/// Maps a row selected with [`PROFILE_COLUMNS`].
pub fn profile_from_row(row: &Row) -> rusqlite::Result<Profile> {
    Ok(Profile {
        user_id: get_uuid(row, 0)?,
        display_name: row.get(1)?,
        avatar_url: row.get(2)?,
        campus: row.get(3)?,
    })
}
