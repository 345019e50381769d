use serde::{Deserialize, Serialize};

use crate::models::MessageWithUser;

// -- JWT Claims --

/// Session token claims issued by the identity provider. Shared between
/// huddle-api (REST middleware) and huddle-gateway (socket handshake).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub display_name: Option<String>,
}

// -- Channels --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChannelRequest {
    pub name: String,
}

// -- Messages --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    pub channel_id: Option<String>,
    pub to_user_id: Option<String>,
}

// -- Threads --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateThreadRequest {
    pub message_id: Option<String>,
}

// -- Uploads --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
    pub size: i64,
    pub mime_type: String,
    pub filename: String,
}

// -- Bot --

/// Client request to ask the answer generator something in a conversation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotRequest {
    pub prompt: String,
    pub channel_id: Option<String>,
    pub to_user_id: Option<String>,
    pub thread_id: Option<String>,
}

/// What the answer generator receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub prompt: String,
}

/// What the answer generator returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
}

/// The two messages a bot exchange produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotExchange {
    pub prompt: MessageWithUser,
    pub answer: MessageWithUser,
}
