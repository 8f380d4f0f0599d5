//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `users`, `chats`, `messages`, and
//! `file_access`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id                   TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    user_name            TEXT NOT NULL COLLATE NOCASE UNIQUE,
    email                TEXT NOT NULL,
    avatar_id            TEXT,                        -- UUID of avatars/<id>.png
    refresh_token        TEXT,                        -- base64, single active value
    refresh_token_expiry TEXT,                        -- RFC-3339
    created_at           TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_refresh_token ON users(refresh_token);

-- ----------------------------------------------------------------
-- Chats (exactly two participants, unique per unordered pair)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id                TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    user1_id          TEXT NOT NULL,              -- FK -> users(id)
    user2_id          TEXT NOT NULL,              -- FK -> users(id)
    block_flag        INTEGER NOT NULL DEFAULT 0, -- 0..=3
    last_message_id   TEXT,
    last_message_time TEXT,
    created_at        TEXT NOT NULL,

    CHECK (user1_id <> user2_id),
    FOREIGN KEY (user1_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (user2_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_chats_pair
    ON chats(min(user1_id, user2_id), max(user1_id, user2_id));

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id             TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    chat_id        TEXT NOT NULL,              -- FK -> chats(id)
    sender_id      TEXT NOT NULL,
    receiver_id    TEXT NOT NULL,
    message_text   TEXT,
    file_flag      INTEGER NOT NULL DEFAULT 0, -- 0 none, 1 audio, 2 image, 3 other
    file_id        TEXT,
    file_extension TEXT,
    timestamp      TEXT NOT NULL,              -- server-assigned, RFC-3339

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, timestamp DESC);

-- ----------------------------------------------------------------
-- File access control entries
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS file_access (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id        TEXT NOT NULL,              -- FK -> users(id)
    chat_id        TEXT NOT NULL,              -- FK -> chats(id)
    file_id        TEXT NOT NULL,
    folder_name    TEXT NOT NULL,
    file_extension TEXT NOT NULL,
    access_level   INTEGER NOT NULL,           -- 0 read, 1 write, 2 full
    updated_at     TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_file_access_lookup
    ON file_access(file_id, folder_name, user_id, access_level);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
