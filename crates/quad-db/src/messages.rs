use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use quad_types::models::PrivateMessage;

use crate::error::bounded_text;
use crate::models::{MESSAGE_COLUMNS, message_from_row, parse_ts, stored_instant, ts};
use crate::{ChatError, ChatResult, Database};

pub const CONTENT_MAX_CHARS: usize = 1000;
pub const EMOJI_MAX_CHARS: usize = 16;

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const MAX_PAGE_SIZE: usize = 200;

impl Database {
    pub fn post_message(
        &self,
        room_id: &str,
        sender_id: Uuid,
        content: &str,
        now: DateTime<Utc>,
    ) -> ChatResult<PrivateMessage> {
        if room_id.trim().is_empty() {
            return Err(ChatError::validation("room_id", "must not be empty"));
        }
        let content = bounded_text("content", content, 1, CONTENT_MAX_CHARS)?;

        let message = self.with_conn(|conn| {
            // Listing follows insertion order, so a message never gets a
            // timestamp older than the room's latest one.
            let latest: Option<String> = conn.query_row(
                "SELECT MAX(created_at) FROM private_messages WHERE room_id = ?1",
                [room_id],
                |row| row.get(0),
            )?;
            let mut created_at = stored_instant(now);
            if let Some(latest) = latest {
                let latest = parse_ts(&latest).map_err(anyhow::Error::from)?;
                created_at = created_at.max(latest);
            }

            let message = PrivateMessage {
                id: Uuid::new_v4(),
                room_id: room_id.to_string(),
                sender_id,
                content: content.to_string(),
                created_at,
                is_edited: false,
                edited_at: None,
                original_content: None,
                is_deleted: false,
                deleted_at: None,
                reactions: BTreeMap::new(),
            };

            conn.execute(
                "INSERT INTO private_messages (id, room_id, sender_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    message.id.to_string(),
                    message.room_id,
                    message.sender_id.to_string(),
                    message.content,
                    ts(created_at),
                ],
            )?;
            Ok(message)
        })?;

        debug!(room_id, message_id = %message.id, "message stored");
        Ok(message)
    }

    /// A live (not deleted) message with its reactions.
    pub fn get_message(&self, message_id: Uuid) -> ChatResult<PrivateMessage> {
        self.with_conn(|conn| live_message(conn, message_id))
    }

    /// Replace the content of the caller's own message. The content from
    /// before the first edit is kept in `original_content`.
    pub fn edit_message(
        &self,
        message_id: Uuid,
        requester_id: Uuid,
        new_content: &str,
        now: DateTime<Utc>,
    ) -> ChatResult<PrivateMessage> {
        self.with_conn(|conn| {
            let current = live_message(conn, message_id)?;
            if current.sender_id != requester_id {
                return Err(ChatError::Forbidden);
            }
            let content = bounded_text("content", new_content, 1, CONTENT_MAX_CHARS)?;

            conn.execute(
                "UPDATE private_messages
                 SET original_content = COALESCE(original_content, content),
                     content = ?2, is_edited = 1, edited_at = ?3
                 WHERE id = ?1 AND is_deleted = 0",
                rusqlite::params![message_id.to_string(), content, ts(now)],
            )?;

            live_message(conn, message_id)
        })
    }

    /// Soft delete. The row stays but is hidden from every read.
    pub fn delete_message(
        &self,
        message_id: Uuid,
        requester_id: Uuid,
        now: DateTime<Utc>,
    ) -> ChatResult<PrivateMessage> {
        self.with_conn(|conn| {
            let mut message = live_message(conn, message_id)?;
            if message.sender_id != requester_id {
                return Err(ChatError::Forbidden);
            }

            let updated = conn.execute(
                "UPDATE private_messages SET is_deleted = 1, deleted_at = ?2
                 WHERE id = ?1 AND is_deleted = 0",
                rusqlite::params![message_id.to_string(), ts(now)],
            )?;
            if updated == 0 {
                return Err(ChatError::NotFound);
            }

            message.is_deleted = true;
            message.deleted_at = Some(stored_instant(now));
            Ok(message)
        })
    }

    /// Set the caller's reaction, replacing any earlier one.
    pub fn add_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
        now: DateTime<Utc>,
    ) -> ChatResult<PrivateMessage> {
        let emoji = validate_emoji(emoji)?;

        self.with_conn(|conn| {
            live_message(conn, message_id)?;

            conn.execute(
                "INSERT INTO message_reactions (message_id, user_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(message_id, user_id) DO UPDATE SET
                    emoji = excluded.emoji,
                    created_at = excluded.created_at",
                rusqlite::params![message_id.to_string(), user_id.to_string(), emoji, ts(now)],
            )?;

            live_message(conn, message_id)
        })
    }

    pub fn remove_reaction(&self, message_id: Uuid, user_id: Uuid) -> ChatResult<PrivateMessage> {
        self.with_conn(|conn| {
            live_message(conn, message_id)?;
            conn.execute(
                "DELETE FROM message_reactions WHERE message_id = ?1 AND user_id = ?2",
                [message_id.to_string(), user_id.to_string()],
            )?;
            live_message(conn, message_id)
        })
    }

    /// A page of live messages in ascending order. With `before`, the page
    /// ends just ahead of that message.
    pub fn list_messages(
        &self,
        room_id: &str,
        limit: usize,
        before: Option<Uuid>,
    ) -> ChatResult<Vec<PrivateMessage>> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE) as i64;

        self.with_conn(|conn| {
            let upper = match before {
                Some(cursor) => conn
                    .query_row(
                        "SELECT seq FROM private_messages WHERE id = ?1 AND room_id = ?2",
                        [cursor.to_string(), room_id.to_string()],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?
                    .ok_or_else(|| ChatError::validation("before", "not a message in this room"))?,
                None => i64::MAX,
            };

            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM private_messages
                 WHERE room_id = ?1 AND is_deleted = 0 AND seq < ?2
                 ORDER BY seq DESC LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut messages = stmt
                .query_map(rusqlite::params![room_id, upper, limit], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            messages.reverse();

            attach_reactions(conn, &mut messages)?;
            Ok(messages)
        })
    }
}

fn validate_emoji(emoji: &str) -> ChatResult<&str> {
    let count = emoji.chars().count();
    if count == 0 || count > EMOJI_MAX_CHARS {
        return Err(ChatError::validation(
            "emoji",
            format!("must be 1 to {} characters", EMOJI_MAX_CHARS),
        ));
    }
    if emoji.chars().any(char::is_whitespace) {
        return Err(ChatError::validation("emoji", "must not contain whitespace"));
    }
    Ok(emoji)
}

fn live_message(conn: &Connection, message_id: Uuid) -> ChatResult<PrivateMessage> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM private_messages WHERE id = ?1 AND is_deleted = 0");
    let message = conn
        .query_row(&sql, [message_id.to_string()], message_from_row)
        .optional()?
        .ok_or(ChatError::NotFound)?;

    let mut batch = vec![message];
    attach_reactions(conn, &mut batch)?;
    batch.pop().ok_or(ChatError::NotFound)
}

fn attach_reactions(conn: &Connection, messages: &mut [PrivateMessage]) -> ChatResult<()> {
    if messages.is_empty() {
        return Ok(());
    }

    let ids: Vec<String> = messages.iter().map(|m| m.id.to_string()).collect();
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT message_id, user_id, emoji FROM message_reactions WHERE message_id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (message_id, user_id, emoji) in rows {
        let Ok(user_id) = Uuid::parse_str(&user_id) else {
            continue;
        };
        if let Some(message) = messages.iter_mut().find(|m| m.id.to_string() == message_id) {
            message.reactions.insert(user_id, emoji);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const ROOM: &str = "room_1700000000000_00112233445566778899aabbccddeeff";

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn post_validates_room_and_content() {
        let db = db();
        let sender = Uuid::new_v4();
        assert!(matches!(
            db.post_message("", sender, "hi", Utc::now()),
            Err(ChatError::Validation { field: "room_id", .. })
        ));
        assert!(matches!(
            db.post_message(ROOM, sender, "   ", Utc::now()),
            Err(ChatError::Validation { field: "content", .. })
        ));
        let long = "a".repeat(CONTENT_MAX_CHARS + 1);
        assert!(db.post_message(ROOM, sender, &long, Utc::now()).is_err());

        let stored = db.post_message(ROOM, sender, "  hello  ", Utc::now()).unwrap();
        assert_eq!(stored.content, "hello");
    }

    #[test]
    fn second_edit_keeps_the_first_original() {
        let db = db();
        let sender = Uuid::new_v4();
        let now = Utc::now();
        let msg = db.post_message(ROOM, sender, "A", now).unwrap();

        db.edit_message(msg.id, sender, "B", now + Duration::seconds(1)).unwrap();
        let edited = db.edit_message(msg.id, sender, "C", now + Duration::seconds(2)).unwrap();

        assert_eq!(edited.content, "C");
        assert_eq!(edited.original_content.as_deref(), Some("A"));
        assert!(edited.is_edited);
        // stored with microsecond precision
        assert_eq!(
            edited.edited_at.map(|t| t.timestamp()),
            Some((now + Duration::seconds(2)).timestamp())
        );
    }

    #[test]
    fn only_the_sender_may_edit_or_delete() {
        let db = db();
        let sender = Uuid::new_v4();
        let other = Uuid::new_v4();
        let msg = db.post_message(ROOM, sender, "mine", Utc::now()).unwrap();

        assert!(matches!(
            db.edit_message(msg.id, other, "theirs", Utc::now()),
            Err(ChatError::Forbidden)
        ));
        assert!(matches!(
            db.delete_message(msg.id, other, Utc::now()),
            Err(ChatError::Forbidden)
        ));
    }

    #[test]
    fn deleted_messages_disappear() {
        let db = db();
        let sender = Uuid::new_v4();
        let now = Utc::now();
        let keep = db.post_message(ROOM, sender, "keep", now).unwrap();
        let gone = db.post_message(ROOM, sender, "gone", now).unwrap();

        let deleted = db.delete_message(gone.id, sender, now).unwrap();
        assert!(deleted.is_deleted);

        let page = db.list_messages(ROOM, DEFAULT_PAGE_SIZE, None).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, keep.id);

        assert!(matches!(db.delete_message(gone.id, sender, now), Err(ChatError::NotFound)));
        assert!(matches!(db.edit_message(gone.id, sender, "x", now), Err(ChatError::NotFound)));
        assert!(matches!(db.get_message(gone.id), Err(ChatError::NotFound)));
    }

    #[test]
    fn identical_timestamps_keep_insertion_order() {
        let db = db();
        let sender = Uuid::new_v4();
        let now = Utc::now();
        let ids: Vec<Uuid> = (0..5)
            .map(|i| db.post_message(ROOM, sender, &format!("m{i}"), now).unwrap().id)
            .collect();

        let page = db.list_messages(ROOM, DEFAULT_PAGE_SIZE, None).unwrap();
        let listed: Vec<Uuid> = page.iter().map(|m| m.id).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn late_writer_never_goes_back_in_time() {
        let db = db();
        let sender = Uuid::new_v4();
        let t0 = Utc::now();

        // the second writer read its clock first but reached the store last
        db.post_message(ROOM, sender, "A", t0 + Duration::milliseconds(1)).unwrap();
        let late = db.post_message(ROOM, sender, "B", t0).unwrap();
        assert_eq!(late.created_at, stored_instant(t0 + Duration::milliseconds(1)));

        let page = db.list_messages(ROOM, DEFAULT_PAGE_SIZE, None).unwrap();
        assert_eq!(page.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), ["A", "B"]);
        assert!(page.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        // other rooms are not held back
        let elsewhere = db.post_message("room_other", sender, "C", t0).unwrap();
        assert_eq!(elsewhere.created_at, stored_instant(t0));
    }

    #[test]
    fn returned_message_matches_the_stored_one() {
        let db = db();
        let sender = Uuid::new_v4();
        let now = Utc::now() + Duration::nanoseconds(123);
        let posted = db.post_message(ROOM, sender, "exact", now).unwrap();

        let listed = db.list_messages(ROOM, DEFAULT_PAGE_SIZE, None).unwrap();
        assert_eq!(listed[0].created_at, posted.created_at);
        assert_eq!(posted.created_at.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn before_cursor_pages_backwards() {
        let db = db();
        let sender = Uuid::new_v4();
        let now = Utc::now();
        let ids: Vec<Uuid> = (0..6)
            .map(|i| {
                db.post_message(ROOM, sender, &format!("m{i}"), now + Duration::seconds(i))
                    .unwrap()
                    .id
            })
            .collect();

        let latest = db.list_messages(ROOM, 2, None).unwrap();
        assert_eq!(latest.iter().map(|m| m.id).collect::<Vec<_>>(), ids[4..].to_vec());

        let older = db.list_messages(ROOM, 2, Some(latest[0].id)).unwrap();
        assert_eq!(older.iter().map(|m| m.id).collect::<Vec<_>>(), ids[2..4].to_vec());

        assert!(matches!(
            db.list_messages("room_other", 2, Some(ids[0])),
            Err(ChatError::Validation { field: "before", .. })
        ));
    }

    #[test]
    fn reacting_twice_replaces_the_emoji() {
        let db = db();
        let sender = Uuid::new_v4();
        let reactor = Uuid::new_v4();
        let now = Utc::now();
        let msg = db.post_message(ROOM, sender, "react to me", now).unwrap();

        db.add_reaction(msg.id, reactor, "👍", now).unwrap();
        let updated = db.add_reaction(msg.id, reactor, "❤️", now).unwrap();
        assert_eq!(updated.reactions.len(), 1);
        assert_eq!(updated.reactions.get(&reactor).map(String::as_str), Some("❤️"));

        let listed = db.list_messages(ROOM, 10, None).unwrap();
        assert_eq!(listed[0].reactions.len(), 1);

        let cleared = db.remove_reaction(msg.id, reactor).unwrap();
        assert!(cleared.reactions.is_empty());
    }

    #[test]
    fn emoji_rules() {
        assert!(validate_emoji("🔥").is_ok());
        assert!(validate_emoji("").is_err());
        assert!(validate_emoji("a b").is_err());
        assert!(validate_emoji(&"x".repeat(EMOJI_MAX_CHARS + 1)).is_err());
    }
}
