//! The per-session FIFO queue a busy `Run` parks incoming calls behind.
//! Internally serialized the same way the busy registry and keep-alive map
//! are: one `tokio::sync::Mutex` guarding a plain `HashMap`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use orbit_core::QueueEntry;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
pub struct SessionQueues {
    inner: Arc<Mutex<HashMap<String, VecDeque<QueueEntry>>>>,
}

impl SessionQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, session_id: &str, entry: QueueEntry) {
        self.inner
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push_back(entry);
    }

    pub async fn pop_front(&self, session_id: &str) -> Option<QueueEntry> {
        let mut guard = self.inner.lock().await;
        guard.get_mut(session_id).and_then(|q| q.pop_front())
    }

    /// Drains the entire queue in FIFO order, used by `PrepareStep` to
    /// inline any prompts that arrived while this step was being prepared.
    pub async fn drain_all(&self, session_id: &str) -> Vec<QueueEntry> {
        self.inner
            .lock()
            .await
            .get_mut(session_id)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    pub async fn len(&self, session_id: &str) -> usize {
        self.inner
            .lock()
            .await
            .get(session_id)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    pub async fn clear(&self, session_id: &str) {
        self.inner.lock().await.remove(session_id);
    }

    pub async fn list(&self, session_id: &str) -> Vec<QueueEntry> {
        self.inner
            .lock()
            .await
            .get(session_id)
            .cloned()
            .map(|q| q.into_iter().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_core::SessionId;

    #[tokio::test]
    async fn test_fifo_order() {
        let queues = SessionQueues::new();
        queues
            .push("s1", QueueEntry::new(SessionId("s1".into()), "p1"))
            .await;
        queues
            .push("s1", QueueEntry::new(SessionId("s1".into()), "p2"))
            .await;
        assert_eq!(queues.len("s1").await, 2);
        let first = queues.pop_front("s1").await.unwrap();
        assert_eq!(first.prompt, "p1");
        assert_eq!(queues.len("s1").await, 1);
    }

    #[tokio::test]
    async fn test_drain_all_empties_queue() {
        let queues = SessionQueues::new();
        queues
            .push("s1", QueueEntry::new(SessionId("s1".into()), "p1"))
            .await;
        queues
            .push("s1", QueueEntry::new(SessionId("s1".into()), "p2"))
            .await;
        let drained = queues.drain_all("s1").await;
        assert_eq!(drained.len(), 2);
        assert_eq!(queues.len("s1").await, 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let queues = SessionQueues::new();
        queues
            .push("s1", QueueEntry::new(SessionId("s1".into()), "p1"))
            .await;
        queues.clear("s1").await;
        assert_eq!(queues.len("s1").await, 0);
    }
}
