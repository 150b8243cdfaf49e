//! In-memory reference implementations of [`MessageStore`]/[`SessionStore`],
//! used by the runtime's own test suite and any caller that doesn't need
//! durability.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{CoreError, Result};
use crate::message::Message;
use crate::ports::{MessageStore, SessionStore};
use crate::session::{Session, SessionId};

#[derive(Default)]
pub struct InMemoryMessageStore {
    by_session: Mutex<HashMap<String, Vec<Message>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn create(&self, message: Message) -> Result<Message> {
        let mut guard = self.by_session.lock().unwrap();
        guard
            .entry(message.session_id.clone())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn update(&self, message: Message) -> Result<Message> {
        let mut guard = self.by_session.lock().unwrap();
        let messages = guard
            .get_mut(&message.session_id)
            .ok_or_else(|| CoreError::NotFound(format!("session {}", message.session_id)))?;
        let existing = messages
            .iter_mut()
            .find(|m| m.id == message.id)
            .ok_or_else(|| CoreError::NotFound(format!("message {}", message.id)))?;
        *existing = message.clone();
        Ok(message)
    }

    async fn list(&self, session_id: &SessionId) -> Result<Vec<Message>> {
        let guard = self.by_session.lock().unwrap();
        Ok(guard.get(session_id.as_str()).cloned().unwrap_or_default())
    }

    async fn delete(&self, session_id: &SessionId, message_id: &str) -> Result<()> {
        let mut guard = self.by_session.lock().unwrap();
        if let Some(messages) = guard.get_mut(session_id.as_str()) {
            messages.retain(|m| m.id != message_id);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &SessionId) -> Result<Session> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id.as_str())
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))
    }

    async fn save(&self, session: Session) -> Result<Session> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.as_str().to_string(), session.clone());
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
        let mut guard = self.sessions.lock().unwrap();
        let session = guard
            .get_mut(session_id.as_str())
            .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))?;
        if let Some(title) = title {
            session.title = Some(title);
        }
        session.prompt_tokens = prompt_tokens;
        session.completion_tokens = completion_tokens;
        session.cache_read_tokens = cache_read_tokens;
        session.cache_write_tokens = cache_write_tokens;
        session.cost = cost;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_message_store_create_and_list() {
        let store = InMemoryMessageStore::new();
        let msg = Message::user("m1", "s1");
        store.create(msg).await.unwrap();
        let messages = store.list(&SessionId("s1".into())).await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn test_message_store_update_missing_errors() {
        let store = InMemoryMessageStore::new();
        let msg = Message::user("ghost", "s1");
        assert!(store.update(msg).await.is_err());
    }

    #[tokio::test]
    async fn test_session_store_update_title_and_usage_is_scoped() {
        let store = InMemorySessionStore::new();
        let config = SessionConfig::new("claude-sonnet-4", "anthropic");
        let mut session = Session::new(PathBuf::from("/repo"), config);
        session.title = Some("keep me".into());
        let id = session.id.clone();
        store.save(session).await.unwrap();

        store
            .update_title_and_usage(&id, None, 5, 2, 0, 0, 0.0)
            .await
            .unwrap();

        let fetched = store.get(&id).await.unwrap();
        assert_eq!(fetched.title.as_deref(), Some("keep me"));
        assert_eq!(fetched.prompt_tokens, 5);
    }
}
