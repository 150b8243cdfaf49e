//! SQLite-backed `MessageStore`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};

use crate::error::{CoreError, Result};
use crate::message::Message;
use crate::ports::MessageStore;
use crate::session::SessionId;

pub struct SqliteMessageStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMessageStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn create(&self, message: Message) -> Result<Message> {
        let body = serde_json::to_string(&message)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages (id, session_id, body_json, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                message.id,
                message.session_id,
                body,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(message)
    }

    async fn update(&self, message: Message) -> Result<Message> {
        let body = serde_json::to_string(&message)?;
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE messages SET body_json = ?1 WHERE id = ?2",
            params![body, message.id],
        )?;
        if updated == 0 {
            return Err(CoreError::NotFound(format!("message {}", message.id)));
        }
        Ok(message)
    }

    async fn list(&self, session_id: &SessionId) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT body_json FROM messages WHERE session_id = ?1 ORDER BY created_at")?;
        let rows = stmt.query_map(params![session_id.as_str()], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            let body = row?;
            out.push(serde_json::from_str(&body)?);
        }
        Ok(out)
    }

    async fn delete(&self, session_id: &SessionId, message_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM messages WHERE session_id = ?1 AND id = ?2",
            params![session_id.as_str(), message_id],
        )?;
        Ok(())
    }
}
