use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use huddle_gateway::auth::Identity;
use huddle_types::api::CreateChannelRequest;

use crate::AppState;
use crate::error::reject;

pub async fn list_channels(
    State(state): State<AppState>,
    Extension(_identity): Extension<Identity>,
) -> Result<impl IntoResponse, StatusCode> {
    let channels = state.gateway.store().list_channels().await.map_err(reject)?;
    Ok(Json(channels))
}

/// Creating a channel does not subscribe anyone; sessions pick it up on
/// their next `join_channels` or by joining it explicitly.
pub async fn create_channel(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let channel = state
        .gateway
        .store()
        .create_channel(&req.name)
        .await
        .map_err(reject)?;
    info!("{} created channel {} ({})", identity.user_id, channel.name, channel.id);
    Ok((StatusCode::CREATED, Json(channel)))
}
