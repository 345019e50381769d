mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use huddle_api::bot::AnswerClient;
use huddle_api::files::BlobStore;
use huddle_api::{AppState, AppStateInner};
use huddle_gateway::Gateway;
use huddle_gateway::auth::{Authenticator, JwtVerifier};
use huddle_gateway::connection;
use huddle_gateway::store::MessageStore;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,huddle_gateway=debug,huddle_api=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(huddle_db::Database::open(&config.db_path)?);

    let authenticator = match &config.jwt_secret {
        Some(secret) => Authenticator::new(Arc::new(JwtVerifier::new(secret))),
        None => {
            warn!("HUDDLE_JWT_SECRET not set: accepting any claimed user id (development only)");
            Authenticator::presence_only()
        }
    };

    // One gateway for the whole process; HTTP writes and socket sessions share it
    let gateway = Gateway::new(MessageStore::new(db), authenticator);

    let answers = match &config.answer_url {
        Some(url) => Some(AnswerClient::new(url.clone())?),
        None => {
            info!("HUDDLE_ANSWER_URL not set: /bot is disabled");
            None
        }
    };

    let app_state: AppState = Arc::new(AppStateInner {
        gateway: gateway.clone(),
        blobs: BlobStore::new(&config.upload_dir),
        answers,
    });

    let ws_route = Router::new()
        .route("/socket", get(ws_upgrade))
        .with_state(gateway.clone());

    let app = Router::new()
        .merge(huddle_api::router(app_state))
        .merge(ws_route)
        .nest_service("/files", ServeDir::new(&config.upload_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Huddle server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(gateway))
        .await?;

    info!("Huddle server stopped");
    Ok(())
}

async fn ws_upgrade(State(gateway): State<Gateway>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, gateway))
}

/// Resolves on Ctrl-C, after cancelling every session scope so open sockets
/// close and release their rooms.
async fn shutdown_signal(gateway: Gateway) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested, closing sessions");
    gateway.shutdown();
}
