mod config;
mod sweeper;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use quad_api::{AppState, AppStateInner};
use quad_db::Database;
use quad_gateway::auth::verify_token;
use quad_gateway::connection;
use quad_gateway::dispatcher::Dispatcher;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "quad=debug,quad_api=debug,quad_gateway=debug,quad_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    let db = Arc::new(Database::open(&config.db_path)?.with_lifetimes(config.lifetimes()));
    let dispatcher = Dispatcher::new();
    let state = AppStateInner::new(db.clone(), dispatcher, config.jwt_secret.clone());

    // Background expiry sweep
    tokio::spawn(sweeper::run_sweep_loop(db, config.sweep_interval));

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = quad_api::routes::router(state)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Quad server listening on {}", config.addr);
    info!(
        "Requests live {}h, rooms live {}h, sweep every {}s",
        config.request_ttl_hours,
        config.room_ttl_hours,
        config.sweep_interval.as_secs()
    );

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Clients that put the token on the upgrade request skip `identify`.
async fn ws_upgrade(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let claims = bearer.and_then(|TypedHeader(Authorization(b))| verify_token(b.token(), &state.jwt_secret));
    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();

    ws.on_upgrade(move |socket| async move {
        match claims {
            Some(claims) => {
                connection::handle_connection_authenticated(socket, dispatcher, db, claims).await
            }
            None => {
                let secret: Arc<str> = Arc::from(state.jwt_secret.as_str());
                connection::handle_connection(socket, dispatcher, db, secret).await
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Received Ctrl+C, shutting down...");
    }
}
