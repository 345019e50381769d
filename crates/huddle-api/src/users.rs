use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use huddle_gateway::auth::Identity;
use huddle_types::api::UpdateUserRequest;

use crate::AppState;
use crate::error::reject;

pub async fn list_users(
    State(state): State<AppState>,
    Extension(_identity): Extension<Identity>,
) -> Result<impl IntoResponse, StatusCode> {
    let users = state.gateway.store().list_users().await.map_err(reject)?;
    Ok(Json(users))
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(_identity): Extension<Identity>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let user = state.gateway.store().get_user(&user_id).await.map_err(reject)?;
    Ok(Json(user))
}

/// POST /user/update: the caller renames themselves. Returns the profile.
pub async fn update_user(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let display_name = req.display_name.ok_or(StatusCode::BAD_REQUEST)?;
    let user = state
        .gateway
        .store()
        .update_display_name(&identity.user_id, &display_name)
        .await
        .map_err(reject)?;
    Ok(Json(user))
}
