use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Profile fields of a user, as mirrored from the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Attachment metadata as handed over by the blob store, before it is
/// bound to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAttachment {
    pub filename: String,
    pub url: String,
    pub size: i64,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub message_id: String,
    pub filename: String,
    pub url: String,
    pub size: i64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

/// Denormalized user fields carried on every reaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionUser {
    pub display_name: Option<String>,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub id: String,
    pub message_id: String,
    pub emoji: String,
    pub user_id: String,
    pub user: ReactionUser,
    pub created_at: DateTime<Utc>,
}

/// Inlined on a message that has a thread hanging off it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub id: String,
    pub reply_count: i64,
    pub last_reply_at: Option<DateTime<Utc>>,
}

/// A fully hydrated message: author profile, reactions, attachments and,
/// for thread parents, a summary of the thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageWithUser {
    pub id: String,
    pub content: String,
    pub user_id: String,
    pub channel_id: Option<String>,
    pub to_user_id: Option<String>,
    pub thread_id: Option<String>,
    /// Set on an answer written for another user, who owns its side of a
    /// direct conversation.
    #[serde(default)]
    pub on_behalf_of: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user: UserProfile,
    pub reactions: Vec<Reaction>,
    pub attachments: Vec<Attachment>,
    pub thread: Option<ThreadSummary>,
}

impl MessageWithUser {
    pub fn addressing(&self) -> Addressing {
        Addressing {
            author_id: self.user_id.clone(),
            channel_id: self.channel_id.clone(),
            to_user_id: self.to_user_id.clone(),
            thread_id: self.thread_id.clone(),
            on_behalf_of: self.on_behalf_of.clone(),
        }
    }
}

/// Where a persisted message lives. Enough to route the message itself
/// and any reaction made to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addressing {
    pub author_id: String,
    pub channel_id: Option<String>,
    pub to_user_id: Option<String>,
    pub thread_id: Option<String>,
    pub on_behalf_of: Option<String>,
}

impl Addressing {
    /// The user whose side of a direct conversation the message is on.
    pub fn speaker(&self) -> &str {
        self.on_behalf_of.as_deref().unwrap_or(&self.author_id)
    }
}

/// A thread with its parent message inlined and its replies in store order.
/// A thread's id is the id of its parent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub parent_message_id: String,
    pub parent_message: MessageWithUser,
    pub messages: Vec<MessageWithUser>,
    pub participants: Vec<UserProfile>,
    pub created_at: DateTime<Utc>,
}
