pub mod access;
pub mod error;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod profiles;
pub mod requests;

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use rusqlite::Connection;
use tracing::info;

pub use access::RoomAccess;
pub use error::{ChatError, ChatResult};
pub use requests::{RequestLists, SweepReport};

/// How long requests and rooms stay usable.
#[derive(Debug, Clone, Copy)]
pub struct Lifetimes {
    pub request: chrono::Duration,
    pub room: chrono::Duration,
}

impl Default for Lifetimes {
    fn default() -> Self {
        Self {
            request: chrono::Duration::hours(48),
            room: chrono::Duration::hours(24),
        }
    }
}

/// Durable request and message store backed by a single SQLite connection.
pub struct Database {
    conn: Mutex<Connection>,
    lifetimes: Lifetimes,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::from_connection(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            lifetimes: Lifetimes::default(),
        })
    }

    pub fn with_lifetimes(mut self, lifetimes: Lifetimes) -> Self {
        self.lifetimes = lifetimes;
        self
    }

    pub fn lifetimes(&self) -> Lifetimes {
        self.lifetimes
    }

    pub fn with_conn<F, T>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&Connection) -> ChatResult<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&mut Connection) -> ChatResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        f(&mut conn)
    }
}
