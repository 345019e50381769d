/// Database row types: these map directly to SQLite rows.
/// Distinct from huddle-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub image_url: Option<String>,
}

pub struct ChannelRow {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A message joined with its author and, if it is a thread parent, the
/// thread aggregates.
pub struct MessageRow {
    pub id: String,
    pub content: String,
    pub user_id: String,
    pub channel_id: Option<String>,
    pub to_user_id: Option<String>,
    pub thread_id: Option<String>,
    /// The participant an answer was given for; its side of a direct pair.
    pub on_behalf_of: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub author: UserRow,
    pub own_thread: Option<ThreadStatsRow>,
}

pub struct ThreadStatsRow {
    pub thread_id: String,
    pub reply_count: i64,
    pub last_reply_at: Option<String>,
}

pub struct NewMessageRow<'a> {
    pub id: &'a str,
    pub content: &'a str,
    pub user_id: &'a str,
    pub channel_id: Option<&'a str>,
    pub to_user_id: Option<&'a str>,
    pub thread_id: Option<&'a str>,
    pub on_behalf_of: Option<&'a str>,
}

pub struct NewAttachmentRow<'a> {
    pub id: &'a str,
    pub filename: &'a str,
    pub url: &'a str,
    pub size: i64,
    pub mime_type: &'a str,
}

pub struct AttachmentRow {
    pub id: String,
    pub message_id: String,
    pub filename: String,
    pub url: String,
    pub size: i64,
    pub mime_type: String,
    pub created_at: String,
}

/// A reaction joined with the reacting user's display fields.
pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
    pub user_display_name: Option<String>,
    pub user_email: String,
}

/// Profile fields to write on upsert. `None` keeps what is stored.
#[derive(Default)]
pub struct UserUpsert<'a> {
    pub id: &'a str,
    pub email: Option<&'a str>,
    pub display_name: Option<&'a str>,
    pub first_name: Option<&'a str>,
    pub last_name: Option<&'a str>,
    pub image_url: Option<&'a str>,
}

pub struct ThreadRow {
    pub id: String,
    pub parent_message_id: String,
    pub created_at: String,
}

/// Result of inserting a message: either it landed, or something it
/// points at does not exist (the name of the missing entity).
#[derive(Debug, PartialEq, Eq)]
pub enum MessageInsert {
    Inserted,
    Missing(&'static str),
}

pub enum ReactionInsert {
    Inserted(ReactionRow),
    Duplicate,
    MissingMessage,
}
