use crate::models::{
    AttachmentRow, ChannelRow, MessageInsert, MessageRow, NewAttachmentRow, NewMessageRow,
    ReactionInsert, ReactionRow, ThreadRow, ThreadStatsRow, UserRow, UserUpsert,
};
use crate::{Database, timestamp_now};
use anyhow::Result;
use rusqlite::{Connection, Row, params};

/// Messages joined with their author and their own thread's aggregates.
const MESSAGE_SELECT: &str = "
    SELECT m.id, m.content, m.user_id, m.channel_id, m.to_user_id, m.thread_id,
           m.created_at, m.updated_at,
           u.email, u.display_name, u.first_name, u.last_name, u.image_url,
           t.id,
           (SELECT COUNT(*) FROM messages r WHERE r.thread_id = t.id),
           (SELECT MAX(r.created_at) FROM messages r WHERE r.thread_id = t.id),
           m.on_behalf_of
    FROM messages m
    JOIN users u ON u.id = m.user_id
    LEFT JOIN threads t ON t.parent_message_id = m.id";

const REACTION_SELECT: &str = "
    SELECT r.id, r.message_id, r.user_id, r.emoji, r.created_at, u.display_name, u.email
    FROM reactions r
    JOIN users u ON u.id = r.user_id";

const USER_SELECT: &str =
    "SELECT id, email, display_name, first_name, last_name, image_url FROM users";

impl Database {
    // -- Users --

    /// Insert a user, or refresh the profile fields that were supplied.
    pub fn upsert_user(&self, user: &UserUpsert<'_>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, display_name, first_name, last_name, image_url, created_at, updated_at)
                 VALUES (?1, COALESCE(?2, ''), ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    email = COALESCE(?2, users.email),
                    display_name = COALESCE(?3, users.display_name),
                    first_name = COALESCE(?4, users.first_name),
                    last_name = COALESCE(?5, users.last_name),
                    image_url = COALESCE(?6, users.image_url),
                    updated_at = ?7",
                params![
                    user.id,
                    user.email,
                    user.display_name,
                    user.first_name,
                    user.last_name,
                    user.image_url,
                    timestamp_now()
                ],
            )?;
            Ok(())
        })
    }

    /// Set the display name the user picked. Returns `None` for an unknown user.
    pub fn update_display_name(&self, id: &str, display_name: &str) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE users SET display_name = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, display_name, timestamp_now()],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            conn.query_row(&format!("{USER_SELECT} WHERE id = ?1"), [id], map_user_row)
                .optional()
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(&format!("{USER_SELECT} WHERE id = ?1"), [id], map_user_row)
                .optional()
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{USER_SELECT} ORDER BY display_name, id"))?;
            let rows = stmt
                .query_map([], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Channels --

    /// All channels, newest first.
    pub fn list_channels(&self) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, created_at, updated_at FROM channels
                 ORDER BY created_at DESC, rowid DESC",
            )?;
            let rows = stmt
                .query_map([], map_channel_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_channel(&self, id: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, created_at, updated_at FROM channels WHERE id = ?1",
                [id],
                map_channel_row,
            )
            .optional()
        })
    }

    /// Returns `None` if the name is already taken.
    pub fn create_channel(&self, id: &str, name: &str) -> Result<Option<ChannelRow>> {
        self.with_conn_mut(|conn| {
            let now = timestamp_now();
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO channels (id, name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![id, name, now],
            )?;
            if inserted == 0 {
                return Ok(None);
            }
            Ok(Some(ChannelRow {
                id: id.to_string(),
                name: name.to_string(),
                created_at: now.clone(),
                updated_at: now,
            }))
        })
    }

    // -- Messages --

    /// Insert a message and its attachments in one transaction. A reply
    /// (`thread_id` set) upserts the thread and records the author as a
    /// participant in the same transaction.
    pub fn insert_message(
        &self,
        msg: &NewMessageRow<'_>,
        attachments: &[NewAttachmentRow<'_>],
    ) -> Result<MessageInsert> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = timestamp_now();

            if !exists(&tx, "SELECT 1 FROM users WHERE id = ?1", msg.user_id)? {
                return Ok(MessageInsert::Missing("User"));
            }
            if let Some(channel_id) = msg.channel_id {
                if !exists(&tx, "SELECT 1 FROM channels WHERE id = ?1", channel_id)? {
                    return Ok(MessageInsert::Missing("Channel"));
                }
            }
            if let Some(to_user_id) = msg.to_user_id {
                if !exists(&tx, "SELECT 1 FROM users WHERE id = ?1", to_user_id)? {
                    return Ok(MessageInsert::Missing("User"));
                }
            }
            if let Some(on_behalf_of) = msg.on_behalf_of {
                if !exists(&tx, "SELECT 1 FROM users WHERE id = ?1", on_behalf_of)? {
                    return Ok(MessageInsert::Missing("User"));
                }
            }
            if let Some(thread_id) = msg.thread_id {
                if !exists(&tx, "SELECT 1 FROM messages WHERE id = ?1", thread_id)? {
                    return Ok(MessageInsert::Missing("Message"));
                }
                tx.execute(
                    "INSERT OR IGNORE INTO threads (id, parent_message_id, created_at)
                     VALUES (?1, ?1, ?2)",
                    params![thread_id, now],
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO thread_participants (thread_id, user_id) VALUES (?1, ?2)",
                    params![thread_id, msg.user_id],
                )?;
            }

            tx.execute(
                "INSERT INTO messages (id, content, user_id, channel_id, to_user_id, thread_id, on_behalf_of, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    msg.id,
                    msg.content,
                    msg.user_id,
                    msg.channel_id,
                    msg.to_user_id,
                    msg.thread_id,
                    msg.on_behalf_of,
                    now
                ],
            )?;

            for att in attachments {
                tx.execute(
                    "INSERT INTO attachments (id, message_id, filename, url, size, mime_type, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![att.id, msg.id, att.filename, att.url, att.size, att.mime_type, now],
                )?;
            }

            tx.commit()?;
            Ok(MessageInsert::Inserted)
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            Ok(query_messages(conn, "m.id = ?1", [id])?.into_iter().next())
        })
    }

    /// Top-level history of a channel. Replies stay in their thread.
    pub fn get_channel_messages(&self, channel_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            query_messages(conn, "m.channel_id = ?1 AND m.thread_id IS NULL", [channel_id])
        })
    }

    /// The direct conversation between two users, both directions. An answer
    /// written for a participant sits on that participant's side.
    pub fn get_direct_messages(&self, user_id: &str, other_user_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            query_messages(
                conn,
                "m.thread_id IS NULL AND (
                    (COALESCE(m.on_behalf_of, m.user_id) = ?1 AND m.to_user_id = ?2) OR
                    (COALESCE(m.on_behalf_of, m.user_id) = ?2 AND m.to_user_id = ?1))",
                [user_id, other_user_id],
            )
        })
    }

    pub fn get_thread_messages(&self, thread_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, "m.thread_id = ?1", [thread_id]))
    }

    /// Batch-fetch attachments for a set of message IDs.
    pub fn get_attachments_for_messages(&self, message_ids: &[String]) -> Result<Vec<AttachmentRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, message_id, filename, url, size, mime_type, created_at
                 FROM attachments WHERE message_id IN ({}) ORDER BY rowid",
                placeholders(message_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(message_ids), |row| {
                    Ok(AttachmentRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        filename: row.get(2)?,
                        url: row.get(3)?,
                        size: row.get(4)?,
                        mime_type: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "{REACTION_SELECT} WHERE r.message_id IN ({}) ORDER BY r.created_at, r.rowid",
                placeholders(message_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(message_ids), map_reaction_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Reactions --

    /// Insert a reaction. Uniqueness of (user, message, emoji) is left to the
    /// unique index: a second insert of the same triple reports `Duplicate`.
    pub fn insert_reaction(
        &self,
        id: &str,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<ReactionInsert> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if !exists(&tx, "SELECT 1 FROM messages WHERE id = ?1", message_id)? {
                return Ok(ReactionInsert::MissingMessage);
            }

            let inserted = tx.execute(
                "INSERT INTO reactions (id, message_id, user_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, message_id, user_id, emoji, timestamp_now()],
            );
            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    return Ok(ReactionInsert::Duplicate);
                }
                Err(e) => return Err(e.into()),
            }

            let row = tx.query_row(
                &format!("{REACTION_SELECT} WHERE r.id = ?1"),
                [id],
                map_reaction_row,
            )?;
            tx.commit()?;
            Ok(ReactionInsert::Inserted(row))
        })
    }

    /// Delete the reaction keyed by the triple. Returns the deleted row.
    pub fn delete_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<Option<ReactionRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let existing = tx
                .query_row(
                    &format!(
                        "{REACTION_SELECT} WHERE r.message_id = ?1 AND r.user_id = ?2 AND r.emoji = ?3"
                    ),
                    params![message_id, user_id, emoji],
                    map_reaction_row,
                )
                .optional()?;

            let Some(row) = existing else {
                return Ok(None);
            };

            tx.execute("DELETE FROM reactions WHERE id = ?1", [&row.id])?;
            tx.commit()?;
            Ok(Some(row))
        })
    }

    // -- Threads --

    /// Get the thread hanging off `parent_message_id`, creating it if needed.
    /// On creation the requesting user becomes its first participant.
    /// Returns `None` if the parent message does not exist.
    pub fn get_or_create_thread(
        &self,
        parent_message_id: &str,
        user_id: &str,
    ) -> Result<Option<ThreadRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if !exists(&tx, "SELECT 1 FROM messages WHERE id = ?1", parent_message_id)? {
                return Ok(None);
            }

            let created = tx.execute(
                "INSERT OR IGNORE INTO threads (id, parent_message_id, created_at)
                 VALUES (?1, ?1, ?2)",
                params![parent_message_id, timestamp_now()],
            )?;
            if created == 1 {
                // Only users with a profile row can be participants
                tx.execute(
                    "INSERT OR IGNORE INTO thread_participants (thread_id, user_id)
                     SELECT ?1, id FROM users WHERE id = ?2",
                    params![parent_message_id, user_id],
                )?;
            }

            let row = tx.query_row(
                "SELECT id, parent_message_id, created_at FROM threads WHERE parent_message_id = ?1",
                [parent_message_id],
                |row| {
                    Ok(ThreadRow {
                        id: row.get(0)?,
                        parent_message_id: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )?;
            tx.commit()?;
            Ok(Some(row))
        })
    }

    pub fn get_thread_participants(&self, thread_id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.email, u.display_name, u.first_name, u.last_name, u.image_url
                 FROM thread_participants p
                 JOIN users u ON u.id = p.user_id
                 WHERE p.thread_id = ?1
                 ORDER BY p.rowid",
            )?;
            let rows = stmt
                .query_map([thread_id], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn exists(conn: &Connection, sql: &str, id: &str) -> Result<bool> {
    Ok(conn.query_row(sql, [id], |_| Ok(())).optional()?.is_some())
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

fn query_messages<P: rusqlite::Params>(
    conn: &Connection,
    filter: &str,
    params: P,
) -> Result<Vec<MessageRow>> {
    let sql = format!("{MESSAGE_SELECT} WHERE {filter} ORDER BY m.created_at ASC, m.rowid ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, map_message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let own_thread = match row.get::<_, Option<String>>(13)? {
        Some(thread_id) => Some(ThreadStatsRow {
            thread_id,
            reply_count: row.get(14)?,
            last_reply_at: row.get(15)?,
        }),
        None => None,
    };

    Ok(MessageRow {
        id: row.get(0)?,
        content: row.get(1)?,
        user_id: row.get(2)?,
        channel_id: row.get(3)?,
        to_user_id: row.get(4)?,
        thread_id: row.get(5)?,
        on_behalf_of: row.get(16)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        author: UserRow {
            id: row.get(2)?,
            email: row.get(8)?,
            display_name: row.get(9)?,
            first_name: row.get(10)?,
            last_name: row.get(11)?,
            image_url: row.get(12)?,
        },
        own_thread,
    })
}

fn map_reaction_row(row: &Row<'_>) -> rusqlite::Result<ReactionRow> {
    Ok(ReactionRow {
        id: row.get(0)?,
        message_id: row.get(1)?,
        user_id: row.get(2)?,
        emoji: row.get(3)?,
        created_at: row.get(4)?,
        user_display_name: row.get(5)?,
        user_email: row.get(6)?,
    })
}

fn map_user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        image_url: row.get(5)?,
    })
}

fn map_channel_row(row: &Row<'_>) -> rusqlite::Result<ChannelRow> {
    Ok(ChannelRow {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_users() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(&UserUpsert {
            id: "alice",
            email: Some("alice@example.com"),
            display_name: Some("Alice"),
            ..Default::default()
        })
        .unwrap();
        db.upsert_user(&UserUpsert {
            id: "bob",
            email: Some("bob@example.com"),
            ..Default::default()
        })
        .unwrap();
        db
    }

    fn post(db: &Database, id: &str, channel: Option<&str>, to: Option<&str>, thread: Option<&str>) -> MessageInsert {
        db.insert_message(
            &NewMessageRow {
                id,
                content: "hello",
                user_id: "alice",
                channel_id: channel,
                to_user_id: to,
                thread_id: thread,
                on_behalf_of: None,
            },
            &[],
        )
        .unwrap()
    }

    #[test]
    fn seeds_default_channels_and_bot() {
        let db = Database::open_in_memory().unwrap();
        let names: Vec<String> = db.list_channels().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"general".to_string()));
        assert!(db.get_user(crate::BOT_USER_ID).unwrap().is_some());
    }

    #[test]
    fn upsert_user_keeps_existing_fields() {
        let db = db_with_users();
        db.upsert_user(&UserUpsert {
            id: "alice",
            image_url: Some("https://img.example.com/alice.png"),
            ..Default::default()
        })
        .unwrap();
        let alice = db.get_user("alice").unwrap().unwrap();
        assert_eq!(alice.email, "alice@example.com");
        assert_eq!(alice.display_name.as_deref(), Some("Alice"));
        assert_eq!(alice.image_url.as_deref(), Some("https://img.example.com/alice.png"));
        assert!(alice.first_name.is_none());
    }

    #[test]
    fn display_name_update() {
        let db = db_with_users();
        let bob = db.update_display_name("bob", "Bobby").unwrap().unwrap();
        assert_eq!(bob.display_name.as_deref(), Some("Bobby"));
        assert_eq!(bob.email, "bob@example.com");
        assert!(db.update_display_name("nobody", "Ghost").unwrap().is_none());
    }

    #[test]
    fn message_with_attachments_is_hydrated() {
        let db = db_with_users();
        let inserted = db
            .insert_message(
                &NewMessageRow {
                    id: "m1",
                    content: "see file",
                    user_id: "alice",
                    channel_id: Some("general"),
                    to_user_id: None,
                    thread_id: None,
                    on_behalf_of: None,
                },
                &[NewAttachmentRow {
                    id: "a1",
                    filename: "notes.txt",
                    url: "/files/a1",
                    size: 12,
                    mime_type: "text/plain",
                }],
            )
            .unwrap();
        assert_eq!(inserted, MessageInsert::Inserted);

        let row = db.get_message("m1").unwrap().unwrap();
        assert_eq!(row.author.display_name.as_deref(), Some("Alice"));
        assert!(row.own_thread.is_none());

        let atts = db.get_attachments_for_messages(&["m1".to_string()]).unwrap();
        assert_eq!(atts.len(), 1);
        assert_eq!(atts[0].filename, "notes.txt");
    }

    #[test]
    fn unknown_channel_is_reported_and_nothing_is_written() {
        let db = db_with_users();
        assert_eq!(post(&db, "m1", Some("nope"), None, None), MessageInsert::Missing("Channel"));
        assert!(db.get_message("m1").unwrap().is_none());
    }

    #[test]
    fn schema_rejects_double_addressing() {
        let db = db_with_users();
        let result = db.insert_message(
            &NewMessageRow {
                id: "m1",
                content: "both",
                user_id: "alice",
                channel_id: Some("general"),
                to_user_id: Some("bob"),
                thread_id: None,
                on_behalf_of: None,
            },
            &[],
        );
        assert!(result.is_err());
    }

    #[test]
    fn channel_history_is_in_insertion_order_without_replies() {
        let db = db_with_users();
        for id in ["m1", "m2", "m3"] {
            post(&db, id, Some("general"), None, None);
        }
        post(&db, "r1", Some("general"), None, Some("m1"));

        let ids: Vec<String> = db
            .get_channel_messages("general")
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn direct_messages_cover_both_directions() {
        let db = db_with_users();
        post(&db, "d1", None, Some("bob"), None);
        db.insert_message(
            &NewMessageRow {
                id: "d2",
                content: "hey",
                user_id: "bob",
                channel_id: None,
                to_user_id: Some("alice"),
                thread_id: None,
                on_behalf_of: None,
            },
            &[],
        )
        .unwrap();

        let ids: Vec<String> = db
            .get_direct_messages("bob", "alice")
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["d1", "d2"]);
    }

    #[test]
    fn answer_for_a_participant_stays_in_their_direct_conversation() {
        let db = db_with_users();
        post(&db, "d1", None, Some("bob"), None);
        db.insert_message(
            &NewMessageRow {
                id: "d2",
                content: "answer",
                user_id: crate::BOT_USER_ID,
                channel_id: None,
                to_user_id: Some("bob"),
                thread_id: None,
                on_behalf_of: Some("alice"),
            },
            &[],
        )
        .unwrap();

        let ids: Vec<String> = db
            .get_direct_messages("bob", "alice")
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["d1", "d2"]);
        assert!(db.get_direct_messages("bob", crate::BOT_USER_ID).unwrap().is_empty());

        let row = db.get_message("d2").unwrap().unwrap();
        assert_eq!(row.on_behalf_of.as_deref(), Some("alice"));
        assert_eq!(row.author.id, crate::BOT_USER_ID);
    }

    #[test]
    fn reaction_triple_is_unique() {
        let db = db_with_users();
        post(&db, "m1", Some("general"), None, None);

        let first = db.insert_reaction("r1", "m1", "bob", "👍").unwrap();
        assert!(matches!(first, ReactionInsert::Inserted(ref r) if r.user_email == "bob@example.com"));

        let second = db.insert_reaction("r2", "m1", "bob", "👍").unwrap();
        assert!(matches!(second, ReactionInsert::Duplicate));

        let other_emoji = db.insert_reaction("r3", "m1", "bob", "🎉").unwrap();
        assert!(matches!(other_emoji, ReactionInsert::Inserted(_)));

        let missing = db.insert_reaction("r4", "zzz", "bob", "👍").unwrap();
        assert!(matches!(missing, ReactionInsert::MissingMessage));

        assert_eq!(db.get_reactions_for_messages(&["m1".to_string()]).unwrap().len(), 2);
    }

    #[test]
    fn delete_reaction_by_triple() {
        let db = db_with_users();
        post(&db, "m1", Some("general"), None, None);
        db.insert_reaction("r1", "m1", "bob", "👍").unwrap();

        let deleted = db.delete_reaction("m1", "bob", "👍").unwrap().unwrap();
        assert_eq!(deleted.id, "r1");
        assert!(db.delete_reaction("m1", "bob", "👍").unwrap().is_none());
    }

    #[test]
    fn thread_upsert_is_idempotent() {
        let db = db_with_users();
        post(&db, "m1", Some("general"), None, None);

        let first = db.get_or_create_thread("m1", "bob").unwrap().unwrap();
        let second = db.get_or_create_thread("m1", "alice").unwrap().unwrap();
        assert_eq!(first.id, "m1");
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);

        let participants = db.get_thread_participants("m1").unwrap();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].id, "bob");

        assert!(db.get_or_create_thread("missing", "bob").unwrap().is_none());
    }

    #[test]
    fn replies_create_thread_and_update_summary() {
        let db = db_with_users();
        post(&db, "m1", Some("general"), None, None);
        post(&db, "r1", None, None, Some("m1"));
        post(&db, "r2", None, None, Some("m1"));

        let replies: Vec<String> = db
            .get_thread_messages("m1")
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(replies, vec!["r1", "r2"]);

        let parent = db.get_message("m1").unwrap().unwrap();
        let stats = parent.own_thread.unwrap();
        assert_eq!(stats.reply_count, 2);
        assert!(stats.last_reply_at.is_some());

        assert_eq!(post(&db, "r3", None, None, Some("nope")), MessageInsert::Missing("Message"));
    }

    #[test]
    fn duplicate_channel_name_is_refused() {
        let db = db_with_users();
        let id = uuid::Uuid::new_v4().to_string();
        assert!(db.create_channel(&id, "general").unwrap().is_none());
        assert!(db.create_channel(&id, "design").unwrap().is_some());
        assert!(db.get_channel(&id).unwrap().is_some());
    }
}
