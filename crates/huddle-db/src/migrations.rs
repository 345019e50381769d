use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                email           TEXT NOT NULL DEFAULT '',
                display_name    TEXT,
                first_name      TEXT,
                last_name       TEXT,
                image_url       TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE channels (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL UNIQUE,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE TABLE messages (
                id          TEXT PRIMARY KEY,
                content     TEXT NOT NULL,
                user_id     TEXT NOT NULL REFERENCES users(id),
                channel_id  TEXT REFERENCES channels(id),
                to_user_id  TEXT REFERENCES users(id),
                thread_id   TEXT REFERENCES threads(id),
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                CHECK (channel_id IS NULL OR to_user_id IS NULL)
            );

            CREATE INDEX idx_messages_channel ON messages(channel_id, created_at);
            CREATE INDEX idx_messages_thread ON messages(thread_id, created_at);
            CREATE INDEX idx_messages_direct ON messages(user_id, to_user_id, created_at);

            CREATE TABLE attachments (
                id          TEXT PRIMARY KEY,
                message_id  TEXT NOT NULL REFERENCES messages(id),
                filename    TEXT NOT NULL,
                url         TEXT NOT NULL,
                size        INTEGER NOT NULL,
                mime_type   TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_attachments_message ON attachments(message_id);

            CREATE TABLE reactions (
                id          TEXT PRIMARY KEY,
                message_id  TEXT NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL REFERENCES users(id),
                emoji       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                UNIQUE(user_id, message_id, emoji)
            );

            CREATE INDEX idx_reactions_message ON reactions(message_id);

            CREATE TABLE threads (
                id                  TEXT PRIMARY KEY,
                parent_message_id   TEXT NOT NULL UNIQUE REFERENCES messages(id),
                created_at          TEXT NOT NULL
            );

            CREATE TABLE thread_participants (
                thread_id   TEXT NOT NULL REFERENCES threads(id),
                user_id     TEXT NOT NULL REFERENCES users(id),
                PRIMARY KEY (thread_id, user_id)
            );

            -- Default channels; their ids are their names
            INSERT INTO channels (id, name, created_at, updated_at) VALUES
                ('general', 'general', strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                ('random', 'random', strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                ('introductions', 'introductions', strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));

            -- Author of generated answers
            INSERT INTO users (id, email, display_name, created_at, updated_at)
                VALUES ('bot', 'bot@huddle.local', 'Bot', strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (answers spoken for a participant)");
        conn.execute_batch(
            "
            ALTER TABLE messages ADD COLUMN on_behalf_of TEXT REFERENCES users(id);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
