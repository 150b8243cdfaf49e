//! Keep-alive scheduler: one timer per session that re-issues a minimal
//! ping on a fixed interval so the provider's prompt cache doesn't expire
//! between user turns.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::RunnerConfig;

/// A ping is a boxed closure over the prepared message list at the moment
/// of construction; it resolves to `true` on a successful round-trip.
pub type PingFn = Box<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

struct Timer {
    handle: JoinHandle<()>,
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Generalizes the single shared-manager-object pattern this codebase uses
/// for cross-cutting concerns to a per-session timer map, guarded by one
/// `tokio::sync::Mutex` rather than a lock per entry.
#[derive(Clone)]
pub struct KeepAliveScheduler {
    interval: std::time::Duration,
    timers: Arc<Mutex<HashMap<String, Timer>>>,
}

impl KeepAliveScheduler {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            interval: config.keep_alive_interval,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Cancels any existing timer for `session_id` and starts a fresh one.
    /// On fire, `ping` runs on a detached task; success reschedules by
    /// touching again, failure does not retry — the next real request
    /// rebuilds the cache naturally.
    pub async fn touch(&self, session_id: impl Into<String>, ping: PingFn) {
        let session_id = session_id.into();
        let interval = self.interval;
        let scheduler = self.clone();
        let ping = Arc::new(ping);

        let handle = tokio::spawn({
            let session_id = session_id.clone();
            async move {
                tokio::time::sleep(interval).await;
                debug!(session_id = %session_id, "keep-alive firing");
                if ping().await {
                    scheduler.touch(session_id, Box::new(move || ping())).await;
                } else {
                    warn!(session_id = %session_id, "keep-alive ping failed, not rescheduling");
                }
            }
        });

        self.timers
            .lock()
            .await
            .insert(session_id, Timer { handle });
    }

    pub async fn stop(&self, session_id: &str) {
        self.timers.lock().await.remove(session_id);
    }

    pub async fn stop_all(&self) {
        self.timers.lock().await.clear();
    }
}
