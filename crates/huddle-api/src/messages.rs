use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use huddle_gateway::auth::Identity;
use huddle_gateway::store::Conversation;
use huddle_types::api::MessageQuery;
use huddle_types::error::ChatError;

use crate::AppState;
use crate::error::reject;

/// GET /messages?channelId=... or ?toUserId=...
///
/// Channel history is top-level messages only; replies are read through
/// their thread. Direct history is the conversation between the caller
/// and `toUserId`, in both directions.
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let store = state.gateway.store();

    let conversation = match (query.channel_id, query.to_user_id) {
        (Some(channel_id), None) => {
            if !store.channel_exists(&channel_id).await.map_err(reject)? {
                return Err(reject(ChatError::NotFound("Channel")));
            }
            Conversation::Channel(channel_id)
        }
        (None, Some(other)) => Conversation::Direct(other),
        _ => return Err(StatusCode::BAD_REQUEST),
    };

    let messages = store
        .list_messages(conversation, &identity.user_id)
        .await
        .map_err(reject)?;
    Ok(Json(messages))
}
