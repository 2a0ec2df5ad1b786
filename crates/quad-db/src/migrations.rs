use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (requests, messages, reactions)");
        conn.execute_batch(
            "
            CREATE TABLE profiles (
                user_id         TEXT PRIMARY KEY,
                display_name    TEXT NOT NULL,
                avatar_url      TEXT,
                campus          TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE chat_requests (
                id                  TEXT PRIMARY KEY,
                requester_id        TEXT NOT NULL,
                target_id           TEXT NOT NULL,
                context_id          TEXT NOT NULL,
                message             TEXT NOT NULL,
                status              TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'accepted', 'rejected', 'expired')),
                room_id             TEXT UNIQUE,
                request_expires_at  TEXT NOT NULL,
                room_expires_at     TEXT,
                responded_at        TEXT,
                campus              TEXT NOT NULL,
                is_active           INTEGER NOT NULL DEFAULT 1,
                created_at          TEXT NOT NULL,
                CHECK (requester_id <> target_id),
                CHECK ((status = 'accepted') = (room_id IS NOT NULL))
            );

            -- At most one live pending request per (requester, target, post)
            CREATE UNIQUE INDEX idx_requests_one_pending
                ON chat_requests(requester_id, target_id, context_id)
                WHERE status = 'pending';

            CREATE INDEX idx_requests_requester
                ON chat_requests(requester_id, created_at);

            CREATE INDEX idx_requests_target
                ON chat_requests(target_id, created_at);

            CREATE INDEX idx_requests_status_expiry
                ON chat_requests(status, request_expires_at);

            CREATE TABLE private_messages (
                seq                 INTEGER PRIMARY KEY AUTOINCREMENT,
                id                  TEXT NOT NULL UNIQUE,
                room_id             TEXT NOT NULL,
                sender_id           TEXT NOT NULL,
                content             TEXT NOT NULL,
                created_at          TEXT NOT NULL,
                is_edited           INTEGER NOT NULL DEFAULT 0,
                edited_at           TEXT,
                original_content    TEXT,
                is_deleted          INTEGER NOT NULL DEFAULT 0,
                deleted_at          TEXT
            );

            CREATE INDEX idx_messages_room
                ON private_messages(room_id, seq);

            CREATE TABLE message_reactions (
                message_id  TEXT NOT NULL REFERENCES private_messages(id),
                user_id     TEXT NOT NULL,
                emoji       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (deactivated requests leave the pending index)");
        conn.execute_batch(
            "
            DROP INDEX idx_requests_one_pending;

            CREATE UNIQUE INDEX idx_requests_one_pending
                ON chat_requests(requester_id, target_id, context_id)
                WHERE status = 'pending' AND is_active = 1;

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
