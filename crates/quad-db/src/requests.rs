use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rand::RngCore;
use rusqlite::{Connection, OptionalExtension, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use quad_types::models::{ChatRequest, Decision, Profile, RequestStatus};

use crate::error::{bounded_text, is_unique_violation};
use crate::models::{REQUEST_COLUMNS, request_from_row, stored_instant, ts};
use crate::profiles::query_profile;
use crate::{ChatError, ChatResult, Database};

pub const MESSAGE_MIN_CHARS: usize = 1;
pub const MESSAGE_MAX_CHARS: usize = 200;

pub const DEFAULT_LIST_LIMIT: usize = 30;
pub const MAX_LIST_LIMIT: usize = 50;

/// Fresh room ids are retried this many times on a UNIQUE collision.
const ROOM_ID_ATTEMPTS: usize = 5;

/// A user's requests split the way the inbox shows them. Newest first.
#[derive(Debug, Clone, Default)]
pub struct RequestLists {
    pub sent: Vec<ChatRequest>,
    pub received: Vec<ChatRequest>,
    pub active_rooms: Vec<ChatRequest>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pending requests moved to `expired` by this pass.
    pub requests_expired: usize,
    /// Accepted rooms currently past their expiry. Their status is untouched.
    pub rooms_lapsed: usize,
}

impl Database {
    /// Persist a new pending request from `requester` to `target_id` about
    /// the post `context_id`.
    pub fn create_request(
        &self,
        requester: &Profile,
        target_id: Uuid,
        context_id: Uuid,
        message: &str,
        now: DateTime<Utc>,
    ) -> ChatResult<ChatRequest> {
        let message = bounded_text("message", message, MESSAGE_MIN_CHARS, MESSAGE_MAX_CHARS)?;
        if requester.user_id == target_id {
            return Err(ChatError::SelfReference);
        }
        let now = stored_instant(now);

        let request = ChatRequest {
            id: Uuid::new_v4(),
            requester_id: requester.user_id,
            target_id,
            context_id,
            message: message.to_string(),
            status: RequestStatus::Pending,
            room_id: None,
            request_expires_at: now + self.lifetimes().request,
            room_expires_at: None,
            responded_at: None,
            campus: requester.campus.clone(),
            is_active: true,
            created_at: now,
        };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let target = query_profile(&tx, target_id)?.ok_or(ChatError::NotFound)?;
            if target.campus != requester.campus {
                return Err(ChatError::CrossCampus);
            }

            // A lapsed pending request for the same triple must not block a new one.
            let retired = tx.execute(
                "UPDATE chat_requests SET status = 'expired', responded_at = ?4
                 WHERE requester_id = ?1 AND target_id = ?2 AND context_id = ?3
                   AND status = 'pending' AND request_expires_at < ?4",
                rusqlite::params![
                    request.requester_id.to_string(),
                    request.target_id.to_string(),
                    request.context_id.to_string(),
                    ts(now),
                ],
            )?;
            if retired > 0 {
                debug!(requester = %request.requester_id, target = %target_id, "retired lapsed pending request");
            }

            let inserted = tx.execute(
                "INSERT INTO chat_requests
                    (id, requester_id, target_id, context_id, message, status,
                     request_expires_at, campus, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, 1, ?8)",
                rusqlite::params![
                    request.id.to_string(),
                    request.requester_id.to_string(),
                    request.target_id.to_string(),
                    request.context_id.to_string(),
                    request.message,
                    ts(request.request_expires_at),
                    request.campus,
                    ts(now),
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => return Err(ChatError::DuplicatePending),
                Err(e) => return Err(e.into()),
            }

            tx.commit()?;
            Ok(())
        })?;

        info!(
            request_id = %request.id,
            requester = %request.requester_id,
            target = %request.target_id,
            campus = %request.campus,
            "chat request created"
        );
        Ok(request)
    }

    /// Accept or reject a pending request. Only the target may answer, and
    /// only while the request is still pending and inside its window.
    pub fn respond(
        &self,
        request_id: Uuid,
        responder_id: Uuid,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> ChatResult<ChatRequest> {
        let room_ttl = self.lifetimes().room;
        let now = stored_instant(now);

        let outcome = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let request = query_request(&tx, request_id)?
                .filter(|r| r.is_active)
                .ok_or(ChatError::NotFound)?;

            if request.target_id != responder_id {
                return Err(ChatError::Forbidden);
            }
            match request.status {
                RequestStatus::Pending => {}
                RequestStatus::Expired => return Err(ChatError::RequestExpired),
                RequestStatus::Accepted | RequestStatus::Rejected => {
                    return Err(ChatError::AlreadyResponded);
                }
            }

            if request.is_request_expired(now) {
                expire_pending(&tx, request_id, now)?;
                tx.commit()?;
                return Ok(Err(ChatError::RequestExpired));
            }

            let updated = match decision {
                Decision::Accept => accept_pending(&tx, request, now, room_ttl)?,
                Decision::Reject => reject_pending(&tx, request, now)?,
            };

            tx.commit()?;
            Ok(Ok(updated))
        })?;

        match &outcome {
            Ok(request) => info!(
                request_id = %request.id,
                status = request.status.as_str(),
                room_id = ?request.room_id,
                "chat request answered"
            ),
            Err(_) => info!(request_id = %request_id, "chat request expired on response"),
        }
        outcome
    }

    pub fn get_request(&self, request_id: Uuid) -> ChatResult<ChatRequest> {
        self.with_conn(|conn| query_request(conn, request_id))?
            .ok_or(ChatError::NotFound)
    }

    pub(crate) fn find_request_by_room(&self, room_id: &str) -> ChatResult<Option<ChatRequest>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {REQUEST_COLUMNS} FROM chat_requests WHERE room_id = ?1");
            Ok(conn.query_row(&sql, [room_id], request_from_row).optional()?)
        })
    }

    /// Sent, received and open-room partitions for `user_id`. Pending
    /// requests past their window are reported as expired even if no sweep
    /// has run yet.
    pub fn list_requests(
        &self,
        user_id: Uuid,
        limit: usize,
        now: DateTime<Utc>,
    ) -> ChatResult<RequestLists> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let uid = user_id.to_string();

        let mut lists = self.with_conn(|conn| {
            let sent = query_requests(
                conn,
                "requester_id = ?1 AND is_active = 1 ORDER BY created_at DESC LIMIT ?2",
                rusqlite::params![uid, limit as i64],
            )?;
            let received = query_requests(
                conn,
                "target_id = ?1 AND is_active = 1 ORDER BY created_at DESC LIMIT ?2",
                rusqlite::params![uid, limit as i64],
            )?;
            let active_rooms = query_requests(
                conn,
                "(requester_id = ?1 OR target_id = ?1) AND status = 'accepted'
                   AND is_active = 1 AND room_expires_at >= ?3
                 ORDER BY responded_at DESC LIMIT ?2",
                rusqlite::params![uid, limit as i64, ts(now)],
            )?;
            Ok(RequestLists {
                sent,
                received,
                active_rooms,
            })
        })?;

        for request in lists.sent.iter_mut().chain(lists.received.iter_mut()) {
            if request.is_request_expired(now) {
                request.status = RequestStatus::Expired;
            }
        }
        Ok(lists)
    }

    /// Administrative soft delete. The request keeps its status; its room
    /// stops resolving and it no longer counts as the pending request for
    /// its triple.
    pub fn deactivate_request(&self, request_id: Uuid) -> ChatResult<ChatRequest> {
        let request = self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE chat_requests SET is_active = 0 WHERE id = ?1",
                [request_id.to_string()],
            )?;
            if updated == 0 {
                return Err(ChatError::NotFound);
            }
            query_request(conn, request_id)?.ok_or(ChatError::NotFound)
        })?;

        info!(request_id = %request_id, "chat request deactivated");
        Ok(request)
    }

    /// Move every lapsed pending request to `expired`. Idempotent; access
    /// control never depends on it having run.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> ChatResult<SweepReport> {
        self.with_conn(|conn| {
            let requests_expired = conn.execute(
                "UPDATE chat_requests SET status = 'expired', responded_at = ?1
                 WHERE status = 'pending' AND request_expires_at < ?1",
                [ts(now)],
            )?;
            let rooms_lapsed: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chat_requests
                 WHERE status = 'accepted' AND is_active = 1 AND room_expires_at < ?1",
                [ts(now)],
                |row| row.get(0),
            )?;

            Ok(SweepReport {
                requests_expired,
                rooms_lapsed: rooms_lapsed as usize,
            })
        })
    }
}

/// `room_<unix millis>_<128 random bits as hex>`.
pub fn mint_room_id(now: DateTime<Utc>) -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    format!("room_{}_{}", now.timestamp_millis(), hex::encode(bytes))
}

fn query_request(conn: &Connection, request_id: Uuid) -> ChatResult<Option<ChatRequest>> {
    let sql = format!("SELECT {REQUEST_COLUMNS} FROM chat_requests WHERE id = ?1");
    Ok(conn
        .query_row(&sql, [request_id.to_string()], request_from_row)
        .optional()?)
}

fn query_requests(
    conn: &Connection,
    clause: &str,
    params: impl rusqlite::Params,
) -> ChatResult<Vec<ChatRequest>> {
    let sql = format!("SELECT {REQUEST_COLUMNS} FROM chat_requests WHERE {clause}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, request_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn expire_pending(tx: &Transaction, request_id: Uuid, now: DateTime<Utc>) -> ChatResult<()> {
    tx.execute(
        "UPDATE chat_requests SET status = 'expired', responded_at = ?2
         WHERE id = ?1 AND status = 'pending'",
        rusqlite::params![request_id.to_string(), ts(now)],
    )?;
    Ok(())
}

/// Compare-and-set `pending -> accepted` with a freshly minted room id.
fn accept_pending(
    tx: &Transaction,
    mut request: ChatRequest,
    now: DateTime<Utc>,
    room_ttl: chrono::Duration,
) -> ChatResult<ChatRequest> {
    let room_expires_at = now + room_ttl;

    for attempt in 1..=ROOM_ID_ATTEMPTS {
        let room_id = mint_room_id(now);
        let updated = tx.execute(
            "UPDATE chat_requests
             SET status = 'accepted', room_id = ?2, room_expires_at = ?3, responded_at = ?4
             WHERE id = ?1 AND status = 'pending'",
            rusqlite::params![request.id.to_string(), room_id, ts(room_expires_at), ts(now)],
        );

        match updated {
            Ok(0) => return Err(ChatError::AlreadyResponded),
            Ok(_) => {
                request.status = RequestStatus::Accepted;
                request.room_id = Some(room_id);
                request.room_expires_at = Some(room_expires_at);
                request.responded_at = Some(now);
                return Ok(request);
            }
            Err(e) if is_unique_violation(&e) => {
                warn!(request_id = %request.id, attempt, "room id collision, minting another");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(anyhow!("no unique room id after {} attempts", ROOM_ID_ATTEMPTS).into())
}

/// Compare-and-set `pending -> rejected`.
fn reject_pending(
    tx: &Transaction,
    mut request: ChatRequest,
    now: DateTime<Utc>,
) -> ChatResult<ChatRequest> {
    let updated = tx.execute(
        "UPDATE chat_requests SET status = 'rejected', responded_at = ?2
         WHERE id = ?1 AND status = 'pending'",
        rusqlite::params![request.id.to_string(), ts(now)],
    )?;
    if updated == 0 {
        return Err(ChatError::AlreadyResponded);
    }

    request.status = RequestStatus::Rejected;
    request.responded_at = Some(now);
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn profile(campus: &str) -> Profile {
        Profile {
            user_id: Uuid::new_v4(),
            display_name: "someone".into(),
            avatar_url: None,
            campus: campus.into(),
        }
    }

    fn setup() -> (Database, Profile, Profile) {
        let db = Database::open_in_memory().unwrap();
        let a = profile("north");
        let b = profile("north");
        db.upsert_profile(&a, Utc::now()).unwrap();
        db.upsert_profile(&b, Utc::now()).unwrap();
        (db, a, b)
    }

    #[test]
    fn room_ids_have_timestamp_and_entropy() {
        let now = Utc::now();
        let id = mint_room_id(now);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts[0], "room");
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 32);
        assert_ne!(id, mint_room_id(now));
    }

    #[test]
    fn unknown_target_is_not_found() {
        let (db, a, _) = setup();
        let err = db
            .create_request(&a, Uuid::new_v4(), Uuid::new_v4(), "hi", Utc::now())
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound));
    }

    #[test]
    fn self_request_is_refused_before_lookup() {
        let (db, a, _) = setup();
        let err = db
            .create_request(&a, a.user_id, Uuid::new_v4(), "hi", Utc::now())
            .unwrap_err();
        assert!(matches!(err, ChatError::SelfReference));
    }

    #[test]
    fn message_bounds_are_checked() {
        let (db, a, b) = setup();
        let err = db
            .create_request(&a, b.user_id, Uuid::new_v4(), "  ", Utc::now())
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation { field: "message", .. }));

        let long = "x".repeat(MESSAGE_MAX_CHARS + 1);
        let err = db
            .create_request(&a, b.user_id, Uuid::new_v4(), &long, Utc::now())
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation { .. }));
    }

    #[test]
    fn lapsed_pending_request_does_not_block_a_new_one() {
        let (db, a, b) = setup();
        let post = Uuid::new_v4();
        let start = Utc::now();
        let first = db.create_request(&a, b.user_id, post, "hi", start).unwrap();

        let later = start + Duration::hours(49);
        let second = db.create_request(&a, b.user_id, post, "hi again", later).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(db.get_request(first.id).unwrap().status, RequestStatus::Expired);
    }

    #[test]
    fn reject_never_carries_a_room() {
        let (db, a, b) = setup();
        let now = Utc::now();
        let request = db.create_request(&a, b.user_id, Uuid::new_v4(), "hi", now).unwrap();
        let rejected = db.respond(request.id, b.user_id, Decision::Reject, now).unwrap();
        assert_eq!(rejected.status, RequestStatus::Rejected);
        assert!(rejected.room_id.is_none());
        assert!(rejected.room_expires_at.is_none());

        let err = db.respond(request.id, b.user_id, Decision::Accept, now).unwrap_err();
        assert!(matches!(err, ChatError::AlreadyResponded));
    }

    #[test]
    fn requester_cannot_answer_own_request() {
        let (db, a, b) = setup();
        let now = Utc::now();
        let request = db.create_request(&a, b.user_id, Uuid::new_v4(), "hi", now).unwrap();
        let err = db.respond(request.id, a.user_id, Decision::Accept, now).unwrap_err();
        assert!(matches!(err, ChatError::Forbidden));
        assert_eq!(db.get_request(request.id).unwrap().status, RequestStatus::Pending);
    }

    #[test]
    fn swept_request_still_reports_expired_on_response() {
        let (db, a, b) = setup();
        let now = Utc::now();
        let request = db.create_request(&a, b.user_id, Uuid::new_v4(), "hi", now).unwrap();

        let report = db.sweep_expired(now + Duration::hours(50)).unwrap();
        assert_eq!(report.requests_expired, 1);

        let err = db
            .respond(request.id, b.user_id, Decision::Accept, now + Duration::hours(50))
            .unwrap_err();
        assert!(matches!(err, ChatError::RequestExpired));
    }

    #[test]
    fn sweep_is_idempotent_and_counts_lapsed_rooms() {
        let (db, a, b) = setup();
        let now = Utc::now();
        let stale = db.create_request(&a, b.user_id, Uuid::new_v4(), "one", now).unwrap();
        let accepted = db.create_request(&a, b.user_id, Uuid::new_v4(), "two", now).unwrap();
        db.respond(accepted.id, b.user_id, Decision::Accept, now).unwrap();

        let later = now + Duration::hours(60);
        let first = db.sweep_expired(later).unwrap();
        assert_eq!(
            first,
            SweepReport {
                requests_expired: 1,
                rooms_lapsed: 1
            }
        );
        let second = db.sweep_expired(later).unwrap();
        assert_eq!(second.requests_expired, 0);
        assert_eq!(second.rooms_lapsed, 1);

        assert_eq!(db.get_request(stale.id).unwrap().status, RequestStatus::Expired);
        // room lapse is derived, status stays accepted
        assert_eq!(db.get_request(accepted.id).unwrap().status, RequestStatus::Accepted);
    }

    #[test]
    fn list_partitions_by_role_and_open_room() {
        let (db, a, b) = setup();
        let now = Utc::now();
        let pending = db.create_request(&a, b.user_id, Uuid::new_v4(), "one", now).unwrap();
        let accepted = db
            .create_request(&a, b.user_id, Uuid::new_v4(), "two", now + Duration::seconds(1))
            .unwrap();
        db.respond(accepted.id, b.user_id, Decision::Accept, now + Duration::seconds(2))
            .unwrap();

        let lists = db.list_requests(a.user_id, DEFAULT_LIST_LIMIT, now + Duration::seconds(3)).unwrap();
        assert_eq!(lists.sent.len(), 2);
        assert_eq!(lists.sent[0].id, accepted.id, "newest first");
        assert_eq!(lists.sent[1].id, pending.id);
        assert!(lists.received.is_empty());
        assert_eq!(lists.active_rooms.len(), 1);

        let for_b = db.list_requests(b.user_id, DEFAULT_LIST_LIMIT, now + Duration::seconds(3)).unwrap();
        assert_eq!(for_b.received.len(), 2);
        assert_eq!(for_b.active_rooms.len(), 1);

        let after_room = db.list_requests(b.user_id, DEFAULT_LIST_LIMIT, now + Duration::hours(30)).unwrap();
        assert!(after_room.active_rooms.is_empty());
    }

    #[test]
    fn list_reports_lapsed_pending_as_expired() {
        let (db, a, b) = setup();
        let now = Utc::now();
        db.create_request(&a, b.user_id, Uuid::new_v4(), "hi", now).unwrap();

        let lists = db.list_requests(b.user_id, 10, now + Duration::hours(49)).unwrap();
        assert_eq!(lists.received[0].status, RequestStatus::Expired);
    }

    #[test]
    fn deactivated_pending_request_does_not_block_a_new_one() {
        let (db, a, b) = setup();
        let post = Uuid::new_v4();
        let now = Utc::now();
        let first = db.create_request(&a, b.user_id, post, "hi", now).unwrap();
        db.deactivate_request(first.id).unwrap();
        assert!(db.list_requests(a.user_id, DEFAULT_LIST_LIMIT, now).unwrap().sent.is_empty());

        let second = db.create_request(&a, b.user_id, post, "hi again", now).unwrap();
        assert_ne!(first.id, second.id);
        let lists = db.list_requests(a.user_id, DEFAULT_LIST_LIMIT, now).unwrap();
        assert_eq!(lists.sent.len(), 1);
        assert_eq!(lists.sent[0].id, second.id);

        let err = db.create_request(&a, b.user_id, post, "third", now).unwrap_err();
        assert!(matches!(err, ChatError::DuplicatePending));
    }

    #[test]
    fn returned_timestamps_match_the_stored_ones() {
        let (db, a, b) = setup();
        let now = Utc::now() + Duration::nanoseconds(321);
        let created = db.create_request(&a, b.user_id, Uuid::new_v4(), "hi", now).unwrap();
        let stored = db.get_request(created.id).unwrap();
        assert_eq!(created.created_at, stored.created_at);
        assert_eq!(created.request_expires_at, stored.request_expires_at);

        let accepted = db.respond(created.id, b.user_id, Decision::Accept, now).unwrap();
        let stored = db.get_request(created.id).unwrap();
        assert_eq!(accepted.responded_at, stored.responded_at);
        assert_eq!(accepted.room_expires_at, stored.room_expires_at);
    }

    #[test]
    fn deactivated_request_cannot_be_answered() {
        let (db, a, b) = setup();
        let now = Utc::now();
        let request = db.create_request(&a, b.user_id, Uuid::new_v4(), "hi", now).unwrap();
        let deactivated = db.deactivate_request(request.id).unwrap();
        assert!(!deactivated.is_active);
        assert_eq!(deactivated.status, RequestStatus::Pending);

        let err = db.respond(request.id, b.user_id, Decision::Accept, now).unwrap_err();
        assert!(matches!(err, ChatError::NotFound));
        assert!(matches!(
            db.deactivate_request(Uuid::new_v4()),
            Err(ChatError::NotFound)
        ));
    }
}
