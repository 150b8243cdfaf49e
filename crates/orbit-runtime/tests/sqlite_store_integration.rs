//! Proves `SessionAgent` runs end-to-end against the Sqlite-backed stores
//! (`orbit_core::db::{SqliteMessageStore, SqliteSessionStore}`), not just the
//! in-memory ones `scenarios.rs` exercises.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use futures::stream;
use tokio_util::sync::CancellationToken;

use orbit_core::{
    LlmProvider, Message, MessageStore, ModelCallOptions, ProviderEvent, ProviderFinishReason,
    ProviderStream, Role, Session, SessionAgentCall, SessionConfig, SessionStore, StepResult,
    ToolInfo,
};
use orbit_runtime::{RunOutcome, RunnerConfig, SessionAgent};

struct OneShotProvider;

#[async_trait]
impl LlmProvider for OneShotProvider {
    async fn stream(
        &self,
        _ctx: CancellationToken,
        _model: &str,
        _messages: &[Message],
        _system_prompt: &str,
        _tools: &[ToolInfo],
        _options: &ModelCallOptions,
    ) -> orbit_core::Result<ProviderStream> {
        let events = vec![
            ProviderEvent::TextDelta { delta: "hi from sqlite".into() },
            ProviderEvent::Finish {
                result: StepResult {
                    finish_reason: ProviderFinishReason::Stop,
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    cache_read_tokens: 0,
                    cache_write_tokens: 0,
                    provider_metadata: serde_json::Value::Null,
                },
            },
        ];
        Ok(Box::pin(stream::iter(events)))
    }

    async fn complete(
        &self,
        _ctx: CancellationToken,
        _model: &str,
        _messages: &[Message],
        _options: &ModelCallOptions,
    ) -> orbit_core::Result<String> {
        Ok("sqlite summary".to_string())
    }
}

#[tokio::test]
async fn test_session_agent_runs_against_sqlite_stores() {
    let dir = tempfile::tempdir().unwrap();
    let conn = orbit_core::db::open_db(dir.path()).unwrap();
    let conn = Arc::new(StdMutex::new(conn));

    let message_store: Arc<dyn MessageStore> =
        Arc::new(orbit_core::db::SqliteMessageStore::new(conn.clone()));
    let session_store: Arc<dyn SessionStore> =
        Arc::new(orbit_core::db::SqliteSessionStore::new(conn));

    let config = SessionConfig::new("test-model", "anthropic");
    let session = Session::new(dir.path().to_path_buf(), config);
    let session_id = session.id.clone();
    session_store.save(session).await.unwrap();

    let runner_config = RunnerConfig::new(dir.path().to_path_buf());
    let (tx, _rx) = tokio::sync::mpsc::channel(64);
    let agent = SessionAgent::new(
        message_store.clone(),
        session_store.clone(),
        Arc::new(OneShotProvider),
        None,
        None,
        None,
        runner_config,
        Default::default(),
        tx,
    );

    let outcome = agent
        .run(CancellationToken::new(), SessionAgentCall::new(session_id.clone(), "hello"))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    let messages = message_store.list(&session_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    let assistant = &messages[1];
    assert_eq!(assistant.text(), "hi from sqlite");

    let session = session_store.get(&session_id).await.unwrap();
    assert_eq!(session.prompt_tokens, 10);
    assert_eq!(session.completion_tokens, 5);
}
