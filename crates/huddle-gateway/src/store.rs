use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, warn};
use uuid::Uuid;

use huddle_db::Database;
use huddle_db::models::{
    AttachmentRow, ChannelRow, MessageInsert, MessageRow, NewAttachmentRow, NewMessageRow,
    ReactionInsert, ReactionRow, UserRow, UserUpsert,
};
use huddle_types::error::ChatError;
use huddle_types::events::NewMessage;
use huddle_types::models::{
    Addressing, Attachment, Channel, MessageWithUser, Reaction, ReactionUser, Thread,
    ThreadSummary, UserProfile,
};

use crate::auth::Identity;

/// Which conversation a history read is for.
#[derive(Debug, Clone)]
pub enum Conversation {
    Channel(String),
    /// Direct messages between the reader and this user.
    Direct(String),
}

/// The only writer of messages, attachments, reactions and threads.
///
/// Every call runs its repository work on the blocking pool and returns
/// fully hydrated models. Repository failures surface as
/// `ChatError::Storage`.
#[derive(Clone)]
pub struct MessageStore {
    db: Arc<Database>,
}

impl MessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&Database) -> Result<T, ChatError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ChatError::storage(e)
            })?
    }

    // -- Users --

    /// Make sure an authenticated user has a profile row.
    pub async fn ensure_user(&self, identity: &Identity) -> Result<(), ChatError> {
        let identity = identity.clone();
        self.blocking(move |db| {
            db.upsert_user(&UserUpsert {
                id: &identity.user_id,
                email: identity.email.as_deref(),
                display_name: identity.display_name.as_deref(),
                first_name: identity.first_name.as_deref(),
                last_name: identity.last_name.as_deref(),
                image_url: identity.image_url.as_deref(),
            })
            .map_err(ChatError::storage)
        })
        .await
    }

    /// Replace the user's display name with a trimmed, non-empty one.
    pub async fn update_display_name(
        &self,
        user_id: &str,
        display_name: &str,
    ) -> Result<UserProfile, ChatError> {
        let display_name = display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(ChatError::validation("Display name is required"));
        }
        let user_id = user_id.to_string();
        self.blocking(move |db| {
            db.update_display_name(&user_id, &display_name)
                .map_err(ChatError::storage)?
                .map(profile)
                .ok_or(ChatError::NotFound("User"))
        })
        .await
    }

    pub async fn list_users(&self) -> Result<Vec<UserProfile>, ChatError> {
        self.blocking(|db| {
            let rows = db.list_users().map_err(ChatError::storage)?;
            Ok(rows.into_iter().map(profile).collect())
        })
        .await
    }

    pub async fn get_user(&self, user_id: &str) -> Result<UserProfile, ChatError> {
        let user_id = user_id.to_string();
        self.blocking(move |db| {
            db.get_user(&user_id)
                .map_err(ChatError::storage)?
                .map(profile)
                .ok_or(ChatError::NotFound("User"))
        })
        .await
    }

    // -- Channels --

    pub async fn list_channels(&self) -> Result<Vec<Channel>, ChatError> {
        self.blocking(|db| {
            let rows = db.list_channels().map_err(ChatError::storage)?;
            Ok(rows.into_iter().map(channel).collect())
        })
        .await
    }

    pub async fn channel_exists(&self, channel_id: &str) -> Result<bool, ChatError> {
        let channel_id = channel_id.to_string();
        self.blocking(move |db| {
            Ok(db.get_channel(&channel_id).map_err(ChatError::storage)?.is_some())
        })
        .await
    }

    pub async fn create_channel(&self, name: &str) -> Result<Channel, ChatError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ChatError::validation("Name is required"));
        }
        self.blocking(move |db| {
            let id = Uuid::new_v4().to_string();
            db.create_channel(&id, &name)
                .map_err(ChatError::storage)?
                .map(channel)
                .ok_or_else(|| ChatError::validation("Channel name already taken"))
        })
        .await
    }

    // -- Messages --

    /// Validate addressing, then insert the message and its attachments in
    /// one transaction. Returns the hydrated message.
    pub async fn persist_message(
        &self,
        author_id: &str,
        input: NewMessage,
    ) -> Result<MessageWithUser, ChatError> {
        self.insert(author_id.to_string(), None, input).await
    }

    /// Like `persist_message`, for a message `author_id` writes in answer to
    /// `on_behalf_of`. In a direct conversation it sits on that user's side,
    /// so both participants see it.
    pub async fn persist_message_for(
        &self,
        author_id: &str,
        on_behalf_of: &str,
        input: NewMessage,
    ) -> Result<MessageWithUser, ChatError> {
        self.insert(author_id.to_string(), Some(on_behalf_of.to_string()), input)
            .await
    }

    async fn insert(
        &self,
        author_id: String,
        on_behalf_of: Option<String>,
        input: NewMessage,
    ) -> Result<MessageWithUser, ChatError> {
        validate_new_message(&input)?;

        self.blocking(move |db| {
            let message_id = Uuid::new_v4().to_string();
            let attachment_ids: Vec<String> = input
                .attachments
                .iter()
                .map(|_| Uuid::new_v4().to_string())
                .collect();
            let attachments: Vec<NewAttachmentRow<'_>> = input
                .attachments
                .iter()
                .zip(&attachment_ids)
                .map(|(att, id)| NewAttachmentRow {
                    id,
                    filename: &att.filename,
                    url: &att.url,
                    size: att.size,
                    mime_type: &att.mime_type,
                })
                .collect();

            let outcome = db
                .insert_message(
                    &NewMessageRow {
                        id: &message_id,
                        content: &input.content,
                        user_id: &author_id,
                        channel_id: input.channel_id.as_deref(),
                        to_user_id: input.to_user_id.as_deref(),
                        thread_id: input.thread_id.as_deref(),
                        on_behalf_of: on_behalf_of.as_deref(),
                    },
                    &attachments,
                )
                .map_err(ChatError::storage)?;

            if let MessageInsert::Missing(what) = outcome {
                return Err(ChatError::NotFound(what));
            }

            load_message(db, &message_id)?.ok_or_else(|| {
                ChatError::storage(format!("message {} vanished after insert", message_id))
            })
        })
        .await
    }

    pub async fn get_message(&self, message_id: &str) -> Result<Option<MessageWithUser>, ChatError> {
        let message_id = message_id.to_string();
        self.blocking(move |db| load_message(db, &message_id)).await
    }

    /// History of a channel, or of the direct conversation between `as_user`
    /// and another user. Ascending by creation time, then insertion order.
    pub async fn list_messages(
        &self,
        conversation: Conversation,
        as_user: &str,
    ) -> Result<Vec<MessageWithUser>, ChatError> {
        let as_user = as_user.to_string();
        self.blocking(move |db| {
            let rows = match &conversation {
                Conversation::Channel(channel_id) => db.get_channel_messages(channel_id),
                Conversation::Direct(other) => db.get_direct_messages(&as_user, other),
            }
            .map_err(ChatError::storage)?;
            hydrate(db, rows)
        })
        .await
    }

    pub async fn thread_messages(&self, thread_id: &str) -> Result<Vec<MessageWithUser>, ChatError> {
        let thread_id = thread_id.to_string();
        self.blocking(move |db| {
            let rows = db.get_thread_messages(&thread_id).map_err(ChatError::storage)?;
            hydrate(db, rows)
        })
        .await
    }

    // -- Reactions --

    /// Returns the new reaction and the addressing of the message it is on.
    pub async fn persist_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<(Reaction, Addressing), ChatError> {
        if emoji.trim().is_empty() {
            return Err(ChatError::validation("Emoji is required"));
        }
        let (message_id, user_id, emoji) =
            (message_id.to_string(), user_id.to_string(), emoji.to_string());

        self.blocking(move |db| {
            let id = Uuid::new_v4().to_string();
            let row = match db
                .insert_reaction(&id, &message_id, &user_id, &emoji)
                .map_err(ChatError::storage)?
            {
                ReactionInsert::Inserted(row) => row,
                ReactionInsert::Duplicate => return Err(ChatError::Conflict),
                ReactionInsert::MissingMessage => return Err(ChatError::NotFound("Message")),
            };
            let target = load_addressing(db, &message_id)?;
            Ok((reaction(row), target))
        })
        .await
    }

    /// Delete the reaction keyed by (user, message, emoji). Returns the
    /// deleted reaction and the addressing of the message it was on.
    pub async fn remove_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<(Reaction, Addressing), ChatError> {
        let (message_id, user_id, emoji) =
            (message_id.to_string(), user_id.to_string(), emoji.to_string());

        self.blocking(move |db| {
            let row = db
                .delete_reaction(&message_id, &user_id, &emoji)
                .map_err(ChatError::storage)?
                .ok_or(ChatError::NotFound("Reaction"))?;
            let target = load_addressing(db, &message_id)?;
            Ok((reaction(row), target))
        })
        .await
    }

    // -- Threads --

    /// Upsert keyed on the parent message. The requesting user becomes a
    /// participant when the thread is created.
    pub async fn get_or_create_thread(
        &self,
        parent_message_id: &str,
        requesting_user_id: &str,
    ) -> Result<Thread, ChatError> {
        let parent_message_id = parent_message_id.to_string();
        let requesting_user_id = requesting_user_id.to_string();

        self.blocking(move |db| {
            let row = db
                .get_or_create_thread(&parent_message_id, &requesting_user_id)
                .map_err(ChatError::storage)?
                .ok_or(ChatError::NotFound("Message"))?;

            let parent_message = load_message(db, &row.parent_message_id)?
                .ok_or(ChatError::NotFound("Message"))?;
            let replies = db.get_thread_messages(&row.id).map_err(ChatError::storage)?;
            let messages = hydrate(db, replies)?;
            let participants = db
                .get_thread_participants(&row.id)
                .map_err(ChatError::storage)?
                .into_iter()
                .map(profile)
                .collect();

            Ok(Thread {
                created_at: parse_timestamp(&row.created_at, &row.id),
                id: row.id,
                parent_message_id: row.parent_message_id,
                parent_message,
                messages,
                participants,
            })
        })
        .await
    }
}

/// Content must be present, and a message goes to exactly one of a channel
/// or a user. A reply may omit both, since its thread already places it.
pub fn validate_new_message(input: &NewMessage) -> Result<(), ChatError> {
    if input.content.trim().is_empty() && input.attachments.is_empty() {
        return Err(ChatError::validation("Content is required"));
    }
    match (&input.channel_id, &input.to_user_id, &input.thread_id) {
        (Some(_), Some(_), _) => Err(ChatError::validation(
            "Message cannot target both a channel and a user",
        )),
        (None, None, None) => Err(ChatError::validation(
            "Message must target a channel or a user",
        )),
        _ => Ok(()),
    }
}

fn load_message(db: &Database, message_id: &str) -> Result<Option<MessageWithUser>, ChatError> {
    let Some(row) = db.get_message(message_id).map_err(ChatError::storage)? else {
        return Ok(None);
    };
    Ok(hydrate(db, vec![row])?.into_iter().next())
}

fn load_addressing(db: &Database, message_id: &str) -> Result<Addressing, ChatError> {
    let row = db
        .get_message(message_id)
        .map_err(ChatError::storage)?
        .ok_or(ChatError::NotFound("Message"))?;
    Ok(Addressing {
        author_id: row.user_id,
        channel_id: row.channel_id,
        to_user_id: row.to_user_id,
        thread_id: row.thread_id,
        on_behalf_of: row.on_behalf_of,
    })
}

/// Attach reactions and attachments to message rows, keeping row order.
fn hydrate(db: &Database, rows: Vec<MessageRow>) -> Result<Vec<MessageWithUser>, ChatError> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let reaction_rows = db.get_reactions_for_messages(&ids).map_err(ChatError::storage)?;
    let attachment_rows = db.get_attachments_for_messages(&ids).map_err(ChatError::storage)?;

    let mut reactions: HashMap<String, Vec<Reaction>> = HashMap::new();
    for r in reaction_rows {
        reactions.entry(r.message_id.clone()).or_default().push(reaction(r));
    }
    let mut attachments: HashMap<String, Vec<Attachment>> = HashMap::new();
    for a in attachment_rows {
        attachments.entry(a.message_id.clone()).or_default().push(attachment(a));
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let thread = row.own_thread.map(|t| ThreadSummary {
                last_reply_at: t.last_reply_at.as_deref().map(|ts| parse_timestamp(ts, &row.id)),
                id: t.thread_id,
                reply_count: t.reply_count,
            });
            MessageWithUser {
                created_at: parse_timestamp(&row.created_at, &row.id),
                updated_at: parse_timestamp(&row.updated_at, &row.id),
                reactions: reactions.remove(&row.id).unwrap_or_default(),
                attachments: attachments.remove(&row.id).unwrap_or_default(),
                user: profile(row.author),
                thread,
                id: row.id,
                content: row.content,
                user_id: row.user_id,
                channel_id: row.channel_id,
                to_user_id: row.to_user_id,
                thread_id: row.thread_id,
                on_behalf_of: row.on_behalf_of,
            }
        })
        .collect())
}

fn parse_timestamp(raw: &str, owner: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Rows written by SQLite's datetime('now') have no zone
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on '{}': {}", raw, owner, e);
            DateTime::default()
        })
}

fn profile(row: UserRow) -> UserProfile {
    UserProfile {
        id: row.id,
        email: row.email,
        display_name: row.display_name,
        first_name: row.first_name,
        last_name: row.last_name,
        image_url: row.image_url,
    }
}

fn channel(row: ChannelRow) -> Channel {
    Channel {
        created_at: parse_timestamp(&row.created_at, &row.id),
        updated_at: parse_timestamp(&row.updated_at, &row.id),
        id: row.id,
        name: row.name,
    }
}

fn reaction(row: ReactionRow) -> Reaction {
    Reaction {
        created_at: parse_timestamp(&row.created_at, &row.id),
        id: row.id,
        message_id: row.message_id,
        emoji: row.emoji,
        user_id: row.user_id,
        user: ReactionUser {
            display_name: row.user_display_name,
            email: row.user_email,
        },
    }
}

fn attachment(row: AttachmentRow) -> Attachment {
    Attachment {
        created_at: parse_timestamp(&row.created_at, &row.id),
        id: row.id,
        message_id: row.message_id,
        filename: row.filename,
        url: row.url,
        size: row.size,
        mime_type: row.mime_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_types::models::NewAttachment;

    async fn store() -> MessageStore {
        let store = MessageStore::new(Arc::new(Database::open_in_memory().unwrap()));
        for user in ["alice", "bob"] {
            store
                .ensure_user(&Identity {
                    user_id: user.into(),
                    email: Some(format!("{}@example.com", user)),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        store
    }

    fn to_channel(content: &str, channel: &str) -> NewMessage {
        NewMessage {
            content: content.into(),
            channel_id: Some(channel.into()),
            ..Default::default()
        }
    }

    #[test]
    fn addressing_rules() {
        assert!(validate_new_message(&to_channel("hi", "general")).is_ok());

        let both = NewMessage {
            to_user_id: Some("bob".into()),
            ..to_channel("hi", "general")
        };
        assert!(matches!(validate_new_message(&both), Err(ChatError::Validation(_))));

        let neither = NewMessage {
            content: "hi".into(),
            ..Default::default()
        };
        assert!(matches!(validate_new_message(&neither), Err(ChatError::Validation(_))));

        let reply = NewMessage {
            content: "hi".into(),
            thread_id: Some("m1".into()),
            ..Default::default()
        };
        assert!(validate_new_message(&reply).is_ok());

        let empty = to_channel("  ", "general");
        assert!(matches!(validate_new_message(&empty), Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn persisted_message_is_hydrated() {
        let store = store().await;
        let input = NewMessage {
            attachments: vec![NewAttachment {
                filename: "cat.png".into(),
                url: "/files/abc".into(),
                size: 2048,
                mime_type: "image/png".into(),
            }],
            ..to_channel("look", "general")
        };

        let msg = store.persist_message("alice", input).await.unwrap();
        assert_eq!(msg.content, "look");
        assert_eq!(msg.user.email, "alice@example.com");
        assert!(msg.reactions.is_empty());
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].message_id, msg.id);
        assert!(msg.thread.is_none());
    }

    #[tokio::test]
    async fn double_addressed_message_is_not_persisted() {
        let store = store().await;
        let input = NewMessage {
            to_user_id: Some("bob".into()),
            ..to_channel("hi", "general")
        };
        assert!(matches!(
            store.persist_message("alice", input).await,
            Err(ChatError::Validation(_))
        ));
        let history = store
            .list_messages(Conversation::Channel("general".into()), "alice")
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn unknown_channel_is_not_found() {
        let store = store().await;
        assert_eq!(
            store.persist_message("alice", to_channel("hi", "nope")).await,
            Err(ChatError::NotFound("Channel"))
        );
    }

    #[tokio::test]
    async fn reaction_lifecycle() {
        let store = store().await;
        let msg = store.persist_message("alice", to_channel("hi", "general")).await.unwrap();

        let (added, target) = store.persist_reaction(&msg.id, "bob", "👍").await.unwrap();
        assert_eq!(added.user.email, "bob@example.com");
        assert_eq!(target.channel_id.as_deref(), Some("general"));

        assert_eq!(
            store.persist_reaction(&msg.id, "bob", "👍").await,
            Err(ChatError::Conflict)
        );
        assert_eq!(
            store.persist_reaction("missing", "bob", "👍").await,
            Err(ChatError::NotFound("Message"))
        );

        let hydrated = store.get_message(&msg.id).await.unwrap().unwrap();
        assert_eq!(hydrated.reactions.len(), 1);

        let (removed, _) = store.remove_reaction(&msg.id, "bob", "👍").await.unwrap();
        assert_eq!(removed.id, added.id);
        assert_eq!(
            store.remove_reaction(&msg.id, "bob", "👍").await,
            Err(ChatError::NotFound("Reaction"))
        );
    }

    #[tokio::test]
    async fn concurrent_duplicate_reactions_resolve_to_one_success() {
        let store = store().await;
        let msg = store.persist_message("alice", to_channel("hi", "general")).await.unwrap();

        let (a, b) = tokio::join!(
            store.persist_reaction(&msg.id, "bob", "🔥"),
            store.persist_reaction(&msg.id, "bob", "🔥"),
        );
        let outcomes = [a.is_ok(), b.is_ok()];
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        assert!(matches!(a, Err(ChatError::Conflict)) || matches!(b, Err(ChatError::Conflict)));
    }

    #[tokio::test]
    async fn thread_upsert_returns_parent_and_ordered_replies() {
        let store = store().await;
        let parent = store.persist_message("alice", to_channel("topic", "general")).await.unwrap();

        let thread = store.get_or_create_thread(&parent.id, "alice").await.unwrap();
        assert_eq!(thread.id, parent.id);
        assert_eq!(thread.parent_message.content, "topic");
        assert!(thread.messages.is_empty());
        assert_eq!(thread.participants.len(), 1);

        for text in ["one", "two"] {
            let reply = NewMessage {
                content: text.into(),
                thread_id: Some(thread.id.clone()),
                ..Default::default()
            };
            store.persist_message("bob", reply).await.unwrap();
        }

        let again = store.get_or_create_thread(&parent.id, "bob").await.unwrap();
        let contents: Vec<&str> = again.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
        assert_eq!(again.participants.len(), 2);
        assert_eq!(again.parent_message.thread.as_ref().map(|t| t.reply_count), Some(2));

        assert_eq!(
            store.get_or_create_thread("missing", "bob").await.map(|t| t.id),
            Err(ChatError::NotFound("Message"))
        );
    }

    #[tokio::test]
    async fn direct_history_is_scoped_to_the_pair() {
        let store = store().await;
        let dm = NewMessage {
            content: "psst".into(),
            to_user_id: Some("bob".into()),
            ..Default::default()
        };
        store.persist_message("alice", dm).await.unwrap();
        store.persist_message("alice", to_channel("hi all", "general")).await.unwrap();

        let history = store
            .list_messages(Conversation::Direct("alice".into()), "bob")
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "psst");
    }

    #[tokio::test]
    async fn answer_for_asker_joins_their_direct_conversation() {
        let store = store().await;
        let question = NewMessage {
            content: "q?".into(),
            to_user_id: Some("bob".into()),
            ..Default::default()
        };
        store.persist_message("alice", question.clone()).await.unwrap();

        let answer = NewMessage {
            content: "a.".into(),
            ..question
        };
        let saved = store
            .persist_message_for(huddle_db::BOT_USER_ID, "alice", answer)
            .await
            .unwrap();
        assert_eq!(saved.user_id, huddle_db::BOT_USER_ID);
        assert_eq!(saved.on_behalf_of.as_deref(), Some("alice"));
        assert_eq!(saved.addressing().speaker(), "alice");

        for (reader, other) in [("alice", "bob"), ("bob", "alice")] {
            let history = store
                .list_messages(Conversation::Direct(other.into()), reader)
                .await
                .unwrap();
            let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
            assert_eq!(contents, vec!["q?", "a."], "history as {}", reader);
        }
    }

    #[tokio::test]
    async fn display_name_update_is_trimmed_and_validated() {
        let store = store().await;
        let bob = store.update_display_name("bob", "  Bobby ").await.unwrap();
        assert_eq!(bob.display_name.as_deref(), Some("Bobby"));

        assert!(matches!(
            store.update_display_name("bob", "   ").await,
            Err(ChatError::Validation(_))
        ));
        assert_eq!(
            store.update_display_name("nobody", "Ghost").await,
            Err(ChatError::NotFound("User"))
        );
    }
}
