use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use quad_db::{ChatError, Database, RoomAccess};
use quad_types::api::Claims;
use quad_types::events::{GatewayCommand, GatewayEvent, Scope};

use crate::auth::verify_token;
use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a connection whose bearer token was already checked on the
/// upgrade request.
pub async fn handle_connection_authenticated(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    claims: Claims,
) {
    let (sender, receiver) = socket.split();
    start_session(sender, receiver, dispatcher, db, claims).await;
}

/// Handle a connection that must send `identify` before anything else.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: Arc<str>,
) {
    let (mut sender, mut receiver) = socket.split();

    let claims = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(claims) => claims,
        None => {
            warn!("WebSocket client failed to identify, closing");
            let _ = send_event(
                &mut sender,
                &GatewayEvent::Error {
                    code: "unauthorized".into(),
                    message: "identify with a valid token first".into(),
                },
            )
            .await;
            return;
        }
    };

    start_session(sender, receiver, dispatcher, db, claims).await;
}

async fn start_session(
    mut sender: SplitSink<WebSocket, Message>,
    receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    claims: Claims,
) {
    let profile = claims.profile();
    let mirror = Arc::clone(&db);
    let refreshed = tokio::task::spawn_blocking(move || mirror.upsert_profile(&profile, Utc::now())).await;
    match refreshed {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Profile refresh failed for {}: {}", claims.sub, e),
        Err(e) => warn!("Profile refresh task failed for {}: {}", claims.sub, e),
    }

    info!("{} ({}) connected to gateway", claims.name, claims.sub);

    let ready = GatewayEvent::Ready {
        user_id: claims.sub,
        display_name: claims.name.clone(),
        campus: claims.campus.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, db, claims).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    claims: Claims,
) {
    let (conn_id, mut session_rx) = dispatcher
        .register_session(claims.sub, &claims.campus)
        .await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward session events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = session_rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let dispatcher_recv = dispatcher.clone();
    let claims_recv = claims.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_recv, &db, conn_id, &claims_recv, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            claims_recv.name,
                            claims_recv.sub,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        dispatcher_recv
                            .send_to_session(
                                conn_id,
                                GatewayEvent::Error {
                                    code: "bad_command".into(),
                                    message: "unrecognised command".into(),
                                },
                            )
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister_session(conn_id).await;
    info!("{} ({}) disconnected from gateway", claims.name, claims.sub);
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Claims> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    return verify_token(&token, jwt_secret);
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify)
        .await
        .ok()
        .flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    conn_id: Uuid,
    claims: &Claims,
    cmd: GatewayCommand,
) {
    let user_id = claims.sub;

    let reply = match cmd {
        GatewayCommand::Identify { .. } => None, // Already handled

        GatewayCommand::JoinRoom { room_id } => match authorize(db, &room_id, user_id).await {
            Ok(_) => {
                let scope = Scope::Room(room_id);
                dispatcher.subscribe(conn_id, scope.clone()).await;
                debug!("{} joined {:?}", user_id, scope);
                Some(GatewayEvent::Subscribed { scope })
            }
            Err(e) => Some(error_event(&e)),
        },

        GatewayCommand::LeaveRoom { room_id } => {
            let scope = Scope::Room(room_id);
            dispatcher.unsubscribe(conn_id, &scope).await;
            Some(GatewayEvent::Unsubscribed { scope })
        }

        GatewayCommand::JoinCampus { campus } => {
            let scope = Scope::Campus(campus);
            if dispatcher.subscribe(conn_id, scope.clone()).await {
                Some(GatewayEvent::Subscribed { scope })
            } else {
                Some(error_event(&ChatError::Forbidden))
            }
        }

        GatewayCommand::Typing { room_id } => match authorize(db, &room_id, user_id).await {
            Ok(access) => {
                dispatcher
                    .typing(&room_id, user_id, access.other_participant)
                    .await;
                None
            }
            Err(e) => Some(error_event(&e)),
        },
    };

    if let Some(event) = reply {
        dispatcher.send_to_session(conn_id, event).await;
    }
}

async fn authorize(db: &Arc<Database>, room_id: &str, user_id: Uuid) -> Result<RoomAccess, ChatError> {
    let db = Arc::clone(db);
    let room_id = room_id.to_string();
    tokio::task::spawn_blocking(move || db.authorize_room(&room_id, user_id, Utc::now()))
        .await
        .map_err(|e| ChatError::Internal(e.into()))?
}

/// Room failures share one code so a client cannot tell which rooms exist.
fn error_event(err: &ChatError) -> GatewayEvent {
    match err {
        ChatError::NotFound | ChatError::Forbidden | ChatError::RoomExpired => GatewayEvent::Error {
            code: "room_unavailable".into(),
            message: "room not found or expired".into(),
        },
        other if other.is_recoverable() => GatewayEvent::Error {
            code: other.code().into(),
            message: other.to_string(),
        },
        other => {
            error!("Gateway command failed: {}", other);
            GatewayEvent::Error {
                code: other.code().into(),
                message: "internal error".into(),
            }
        }
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}
