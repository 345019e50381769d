use serde::{Deserialize, Serialize};

use crate::models::{MessageWithUser, NewAttachment, Reaction, Thread};

/// Credentials presented as the first frame of a connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeAuth {
    pub token: Option<String>,
    pub user_id: Option<String>,
}

/// Payload of an inbound `message` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub content: String,
    /// Optional echo of the author. When present it must match the session.
    pub user_id: Option<String>,
    pub channel_id: Option<String>,
    pub to_user_id: Option<String>,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<NewAttachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayload {
    pub message_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveReactionPayload {
    pub message_id: String,
    pub emoji: String,
    pub user_id: Option<String>,
}

/// Events sent FROM client TO server over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientEvent {
    /// Handshake. Only valid as the first frame.
    #[serde(rename = "auth")]
    Auth(HandshakeAuth),

    /// Join every channel room plus the session's own inbox room.
    #[serde(rename = "join_channels")]
    JoinChannels,

    #[serde(rename = "join_channel")]
    JoinChannel(String),

    #[serde(rename = "thread:join")]
    ThreadJoin(String),

    #[serde(rename = "message")]
    Message(NewMessage),

    #[serde(rename = "reaction:add")]
    ReactionAdd(ReactionPayload),

    #[serde(rename = "reaction:remove")]
    ReactionRemove(RemoveReactionPayload),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::JoinChannels => "join_channels",
            Self::JoinChannel(_) => "join_channel",
            Self::ThreadJoin(_) => "thread:join",
            Self::Message(_) => "message",
            Self::ReactionAdd(_) => "reaction:add",
            Self::ReactionRemove(_) => "reaction:remove",
        }
    }
}

/// Events sent FROM server TO client over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Handshake accepted
    #[serde(rename = "ready")]
    Ready {
        #[serde(rename = "userId")]
        user_id: String,
    },

    /// A new top-level channel message or direct message
    #[serde(rename = "message")]
    Message(MessageWithUser),

    /// A new reply, delivered to thread-room members only
    #[serde(rename = "thread:message")]
    ThreadMessage(MessageWithUser),

    /// Reply to `thread:join` on a message id
    #[serde(rename = "thread:joined")]
    ThreadJoined(Thread),

    #[serde(rename = "reaction:add")]
    ReactionAdd(Reaction),

    #[serde(rename = "reaction:remove")]
    ReactionRemove(Reaction),

    /// Non-fatal, scoped to the session that caused it
    #[serde(rename = "error")]
    Error(String),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Message(_) => "message",
            Self::ThreadMessage(_) => "thread:message",
            Self::ThreadJoined(_) => "thread:joined",
            Self::ReactionAdd(_) => "reaction:add",
            Self::ReactionRemove(_) => "reaction:remove",
            Self::Error(_) => "error",
        }
    }
}
