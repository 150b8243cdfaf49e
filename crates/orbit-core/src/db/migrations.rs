//! SQL schema for the project DB. Applied on open.

/// Config key-value store (and source for .orbit/env).
pub const CONFIG: &str = "
CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
";

/// Sessions: one row per session.
pub const SESSIONS: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY NOT NULL,
    repo_root TEXT NOT NULL,
    status_json TEXT NOT NULL,
    config_json TEXT NOT NULL,
    title TEXT,
    summary_message_id TEXT,
    prompt_tokens INTEGER NOT NULL DEFAULT 0,
    completion_tokens INTEGER NOT NULL DEFAULT 0,
    cache_read_tokens INTEGER NOT NULL DEFAULT 0,
    cache_write_tokens INTEGER NOT NULL DEFAULT 0,
    cost REAL NOT NULL DEFAULT 0.0,
    todos_json TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);
";

/// Messages: one row per message, ordered by created_at within a session.
pub const MESSAGES: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY NOT NULL,
    session_id TEXT NOT NULL,
    body_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, created_at);
";

/// Run all migrations on an open connection.
pub fn run_all(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    conn.execute_batch(CONFIG)?;
    conn.execute_batch(SESSIONS)?;
    conn.execute_batch(MESSAGES)?;
    Ok(())
}
