//! SQLite-backed `SessionStore`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};

use crate::error::{CoreError, Result};
use crate::ports::SessionStore;
use crate::session::{Session, SessionId};

pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
        let id: String = row.get(0)?;
        let repo_root: String = row.get(1)?;
        let status_json: String = row.get(2)?;
        let config_json: String = row.get(3)?;
        let title: Option<String> = row.get(4)?;
        let summary_message_id: Option<String> = row.get(5)?;
        let prompt_tokens: i64 = row.get(6)?;
        let completion_tokens: i64 = row.get(7)?;
        let cache_read_tokens: i64 = row.get(8)?;
        let cache_write_tokens: i64 = row.get(9)?;
        let cost: f64 = row.get(10)?;
        let todos_json: String = row.get(11)?;
        let created_at: String = row.get(12)?;

        Ok(Session {
            id: SessionId(id),
            status: serde_json::from_str(&status_json).unwrap_or_default(),
            repo_root: repo_root.into(),
            config: serde_json::from_str(&config_json).expect("valid session config"),
            title,
            summary_message_id,
            todos: serde_json::from_str(&todos_json).unwrap_or_default(),
            prompt_tokens: prompt_tokens as u64,
            completion_tokens: completion_tokens as u64,
            cache_read_tokens: cache_read_tokens as u64,
            cache_write_tokens: cache_write_tokens as u64,
            cost,
            created_at: created_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
        })
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, session_id: &SessionId) -> Result<Session> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, repo_root, status_json, config_json, title, summary_message_id,
                    prompt_tokens, completion_tokens, cache_read_tokens, cache_write_tokens,
                    cost, todos_json, created_at
             FROM sessions WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![session_id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Self::row_to_session(row)?),
            None => Err(CoreError::NotFound(format!("session {}", session_id))),
        }
    }

    async fn save(&self, session: Session) -> Result<Session> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions (id, repo_root, status_json, config_json, title, summary_message_id,
                                    prompt_tokens, completion_tokens, cache_read_tokens, cache_write_tokens,
                                    cost, todos_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                repo_root = excluded.repo_root,
                status_json = excluded.status_json,
                config_json = excluded.config_json,
                title = excluded.title,
                summary_message_id = excluded.summary_message_id,
                prompt_tokens = excluded.prompt_tokens,
                completion_tokens = excluded.completion_tokens,
                cache_read_tokens = excluded.cache_read_tokens,
                cache_write_tokens = excluded.cache_write_tokens,
                cost = excluded.cost,
                todos_json = excluded.todos_json",
            params![
                session.id.as_str(),
                session.repo_root.to_string_lossy(),
                serde_json::to_string(&session.status)?,
                serde_json::to_string(&session.config)?,
                session.title,
                session.summary_message_id,
                session.prompt_tokens as i64,
                session.completion_tokens as i64,
                session.cache_read_tokens as i64,
                session.cache_write_tokens as i64,
                session.cost,
                serde_json::to_string(&session.todos)?,
                session.created_at.to_rfc3339(),
            ],
        )?;
        Ok(session)
    }

    async fn update_title_and_usage(
        &self,
        session_id: &SessionId,
        title: Option<String>,
        prompt_tokens: u64,
        completion_tokens: u64,
        cache_read_tokens: u64,
        cache_write_tokens: u64,
        cost: f64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE sessions SET
                title = COALESCE(?2, title),
                prompt_tokens = ?3,
                completion_tokens = ?4,
                cache_read_tokens = ?5,
                cache_write_tokens = ?6,
                cost = ?7
             WHERE id = ?1",
            params![
                session_id.as_str(),
                title,
                prompt_tokens as i64,
                completion_tokens as i64,
                cache_read_tokens as i64,
                cache_write_tokens as i64,
                cost,
            ],
        )?;
        if updated == 0 {
            return Err(CoreError::NotFound(format!("session {}", session_id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db_at;
    use crate::session::SessionConfig;
    use std::path::PathBuf;

    fn store() -> SqliteSessionStore {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_db_at(dir.path()).unwrap();
        SqliteSessionStore::new(Arc::new(Mutex::new(conn)))
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let store = store();
        let config = SessionConfig::new("claude-sonnet-4", "anthropic");
        let session = Session::new(PathBuf::from("/repo"), config);
        let id = session.id.clone();
        store.save(session).await.unwrap();

        let fetched = store.get(&id).await.unwrap();
        assert_eq!(fetched.id, id);
    }

    #[tokio::test]
    async fn test_update_title_and_usage_only_touches_those_fields() {
        let store = store();
        let config = SessionConfig::new("claude-sonnet-4", "anthropic");
        let mut session = Session::new(PathBuf::from("/repo"), config);
        session.title = Some("original".into());
        let id = session.id.clone();
        store.save(session).await.unwrap();

        store
            .update_title_and_usage(&id, None, 10, 5, 0, 0, 0.001)
            .await
            .unwrap();

        let fetched = store.get(&id).await.unwrap();
        assert_eq!(fetched.title.as_deref(), Some("original"));
        assert_eq!(fetched.prompt_tokens, 10);
    }

    #[tokio::test]
    async fn test_get_missing_session_errors() {
        let store = store();
        assert!(store.get(&SessionId::new()).await.is_err());
    }
}
