//! HTTP glue around the realtime gateway: history reads, channel and thread
//! management, uploads and the bot exchange.

pub mod bot;
pub mod channels;
pub mod error;
pub mod files;
pub mod messages;
pub mod middleware;
pub mod threads;
pub mod users;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;

use huddle_gateway::Gateway;

use crate::bot::AnswerClient;
use crate::files::BlobStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    /// The same gateway the socket endpoint uses, so HTTP writes reach
    /// connected sessions.
    pub gateway: Gateway,
    pub blobs: BlobStore,
    /// `None` when no answer generator is configured.
    pub answers: Option<AnswerClient>,
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/channels",
            get(channels::list_channels).post(channels::create_channel),
        )
        .route("/messages", get(messages::list_messages))
        .route("/threads", post(threads::create_thread))
        .route("/threads/{thread_id}/messages", get(threads::thread_messages))
        .route("/users", get(users::list_users))
        .route("/users/{user_id}", get(users::get_user))
        .route("/user/update", post(users::update_user))
        .route(
            "/upload",
            post(files::upload_attachment).layer(DefaultBodyLimit::max(files::MAX_UPLOAD_BODY)),
        )
        .route("/bot", post(bot::ask_bot))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
