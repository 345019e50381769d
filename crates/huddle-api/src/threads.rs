use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use huddle_gateway::auth::Identity;
use huddle_types::api::CreateThreadRequest;

use crate::AppState;
use crate::error::reject;

/// POST /threads: get the thread under a message, creating it on first use.
pub async fn create_thread(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateThreadRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let message_id = req
        .message_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(StatusCode::BAD_REQUEST)?;

    let thread = state
        .gateway
        .store()
        .get_or_create_thread(&message_id, &identity.user_id)
        .await
        .map_err(reject)?;
    Ok(Json(thread))
}

pub async fn thread_messages(
    State(state): State<AppState>,
    Extension(_identity): Extension<Identity>,
    Path(thread_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let messages = state
        .gateway
        .store()
        .thread_messages(&thread_id)
        .await
        .map_err(reject)?;
    Ok(Json(messages))
}
