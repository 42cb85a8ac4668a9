//! Debate Arena Back binary entrypoint wiring REST, WebSocket and room store layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use debate_arena_back::{
    config::AppConfig,
    dao::room_store::MemoryRoomStore,
    routes,
    state::{AppState, SharedState, registry::CloseReason},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = build_state(config);

    let app = build_router(app_state.clone());

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal(app_state))
        .await
        .context("serving axum")?;

    Ok(())
}

/// Pick the room store: MongoDB when `MONGO_URI` is set, the in-memory store otherwise.
fn build_state(config: AppConfig) -> SharedState {
    #[cfg(feature = "mongo-store")]
    {
        if env::var("MONGO_URI").is_ok() {
            use debate_arena_back::{
                dao::{
                    room_store::{
                        RoomStore,
                        mongodb::{MongoConfig, MongoRoomStore},
                    },
                    storage::StorageError,
                },
                services::storage_supervisor,
            };

            info!("using MongoDB room store; starting in degraded mode until connected");
            let state = AppState::new(config);
            tokio::spawn(storage_supervisor::run(state.clone(), || async {
                let config = MongoConfig::from_env().await.map_err(StorageError::from)?;
                let store = MongoRoomStore::connect(config)
                    .await
                    .map_err(StorageError::from)?;
                Ok(Arc::new(store) as Arc<dyn RoomStore>)
            }));
            return state;
        }
    }

    warn!("MONGO_URI not set; rooms are kept in memory and lost on restart");
    AppState::with_store(config, Arc::new(MemoryRoomStore::new()))
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM, then close every room connection before the server stops.
async fn shutdown_signal(state: SharedState) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    let closed = state.registry().close_all(CloseReason::ServerShutdown);
    info!(closed, "shutdown requested; closed room connections");
}
