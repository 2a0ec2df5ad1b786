use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};
use uuid::Uuid;

use quad_types::events::{GatewayEvent, Scope};

/// One live gateway connection.
struct Session {
    user_id: Uuid,
    campus: String,
    scopes: HashSet<Scope>,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

/// Routes events to connected sessions. Each session subscribes explicitly
/// to the rooms and campus it wants to hear about.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// conn_id -> session
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a session for an identified user. Returns (conn_id, receiver).
    /// Other sessions of the same user are left alone.
    pub async fn register_session(
        &self,
        user_id: Uuid,
        campus: &str,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.sessions.write().await.insert(
            conn_id,
            Session {
                user_id,
                campus: campus.to_string(),
                scopes: HashSet::new(),
                tx,
            },
        );
        debug!(%conn_id, %user_id, "session registered");
        (conn_id, rx)
    }

    /// Drop a session and all its subscriptions.
    pub async fn unregister_session(&self, conn_id: Uuid) {
        if self.inner.sessions.write().await.remove(&conn_id).is_some() {
            debug!(%conn_id, "session unregistered");
        }
    }

    /// Add a subscription. Campus scopes are refused unless they match the
    /// session's own campus. Returns whether the session now holds it.
    pub async fn subscribe(&self, conn_id: Uuid, scope: Scope) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        let Some(session) = sessions.get_mut(&conn_id) else {
            return false;
        };
        if let Scope::Campus(campus) = &scope {
            if *campus != session.campus {
                return false;
            }
        }
        session.scopes.insert(scope);
        true
    }

    /// Returns whether the subscription existed.
    pub async fn unsubscribe(&self, conn_id: Uuid, scope: &Scope) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        sessions
            .get_mut(&conn_id)
            .is_some_and(|session| session.scopes.remove(scope))
    }

    pub async fn is_subscribed(&self, conn_id: Uuid, scope: &Scope) -> bool {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(&conn_id)
            .is_some_and(|session| session.scopes.contains(scope))
    }

    /// Reply on a single session.
    pub async fn send_to_session(&self, conn_id: Uuid, event: GatewayEvent) {
        let sessions = self.inner.sessions.read().await;
        if let Some(session) = sessions.get(&conn_id) {
            let _ = session.tx.send(event);
        }
    }

    /// Send to every session of a user. Returns how many sessions got it.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> usize {
        self.deliver(&event, |session| session.user_id == user_id).await
    }

    /// Fan a room-scoped event out to that room's subscribers.
    pub async fn publish_room(&self, event: GatewayEvent) -> usize {
        let Some(room_id) = event.room_id().map(str::to_owned) else {
            debug!("refusing to publish a non-room event to a room");
            return 0;
        };
        let scope = Scope::Room(room_id);
        self.deliver(&event, |session| session.scopes.contains(&scope))
            .await
    }

    /// Relay an opaque notice to everyone subscribed to `campus`.
    pub async fn publish_to_campus(
        &self,
        campus: &str,
        kind: &str,
        payload: serde_json::Value,
    ) -> usize {
        let event = GatewayEvent::CampusBroadcast {
            campus: campus.to_string(),
            kind: kind.to_string(),
            payload,
        };
        let scope = Scope::Campus(campus.to_string());
        self.deliver(&event, |session| session.scopes.contains(&scope))
            .await
    }

    /// Typing goes only to the other participant's sessions that are
    /// watching the room.
    pub async fn typing(&self, room_id: &str, from: Uuid, to: Uuid) -> usize {
        let event = GatewayEvent::Typing {
            room_id: room_id.to_string(),
            user_id: from,
        };
        let scope = Scope::Room(room_id.to_string());
        self.deliver(&event, |session| {
            session.user_id == to && session.scopes.contains(&scope)
        })
        .await
    }

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    async fn deliver(&self, event: &GatewayEvent, matches: impl Fn(&Session) -> bool) -> usize {
        let sessions = self.inner.sessions.read().await;
        let mut delivered = 0;
        for (conn_id, session) in sessions.iter().filter(|(_, s)| matches(s)) {
            if session.tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                trace!(%conn_id, "session closed before delivery");
            }
        }
        delivered
    }
}
