//! Session Agent: the public entry point. Owns the busy registry, the
//! per-session prompt queue, and the keep-alive scheduler, and drives one
//! `Run` at a time per session through the Stream Runner.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use orbit_core::{
    LlmProvider, LspManager, Message, MessagePart, MessageStore, ModelCallOptions,
    ProviderFinishReason, RunState, Session, SessionAgentCall, SessionEvent, SessionId,
    SessionStatus, SessionStore, StepResult, TitleGenerator, ToolCatalogue, ToolInfo,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use crate::config::RunnerConfig;
use crate::error::{RunError, Result};
use crate::error_finalizer::finalize_error;
use crate::history::place_cache_markers;
use crate::keepalive::{KeepAliveScheduler, PingFn};
use crate::queue::SessionQueues;
use crate::step_handler::StepHandler;
use crate::stream_runner::{continuation_prompt, StreamRunner};
use crate::tidy::{compress_tool_output, identify_bulky_outputs, BULKY_OUTPUT_THRESHOLD_BYTES};
use crate::usage::ModelPricing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The call was appended to the session's queue; a `Run` was already
    /// in flight.
    Queued,
    Completed,
}

type BusyRegistry = Arc<Mutex<HashMap<String, CancellationToken>>>;

pub struct SessionAgent {
    message_store: Arc<dyn MessageStore>,
    session_store: Arc<dyn SessionStore>,
    llm_provider: Arc<dyn LlmProvider>,
    tool_catalogue: Option<Arc<dyn ToolCatalogue>>,
    lsp: Option<Arc<dyn LspManager>>,
    title_generator: Option<Arc<dyn TitleGenerator>>,
    config: Mutex<RunnerConfig>,
    pricing: ModelPricing,
    queues: SessionQueues,
    busy: BusyRegistry,
    keepalive: KeepAliveScheduler,
    system_prompt: Mutex<String>,
    tools: Mutex<Vec<ToolInfo>>,
    event_tx: tokio::sync::mpsc::Sender<SessionEvent>,
}

impl SessionAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        message_store: Arc<dyn MessageStore>,
        session_store: Arc<dyn SessionStore>,
        llm_provider: Arc<dyn LlmProvider>,
        tool_catalogue: Option<Arc<dyn ToolCatalogue>>,
        lsp: Option<Arc<dyn LspManager>>,
        title_generator: Option<Arc<dyn TitleGenerator>>,
        config: RunnerConfig,
        pricing: ModelPricing,
        event_tx: tokio::sync::mpsc::Sender<SessionEvent>,
    ) -> Self {
        let keepalive = KeepAliveScheduler::new(&config);
        Self {
            message_store,
            session_store,
            llm_provider,
            tool_catalogue,
            lsp,
            title_generator,
            keepalive,
            queues: SessionQueues::new(),
            busy: Arc::new(Mutex::new(HashMap::new())),
            system_prompt: Mutex::new(crate::prompt::build_system_prompt(&[])),
            tools: Mutex::new(Vec::new()),
            config: Mutex::new(config),
            pricing,
            event_tx,
        }
    }

    pub async fn is_session_busy(&self, session_id: &str) -> bool {
        self.busy.lock().await.contains_key(session_id)
    }

    pub async fn is_busy(&self) -> bool {
        !self.busy.lock().await.is_empty()
    }

    pub async fn queued_prompts(&self, session_id: &str) -> usize {
        self.queues.len(session_id).await
    }

    pub async fn queued_prompts_list(&self, session_id: &str) -> Vec<SessionAgentCall> {
        self.queues.list(session_id).await
    }

    pub async fn clear_queue(&self, session_id: &str) {
        self.queues.clear(session_id).await;
    }

    pub async fn set_models(&self, model: impl Into<String>) {
        self.config.lock().await.model = model.into();
    }

    pub async fn set_tools(&self, tools: Vec<ToolInfo>) {
        let prompt = crate::prompt::build_system_prompt(&tools);
        *self.tools.lock().await = tools;
        *self.system_prompt.lock().await = prompt;
    }

    pub async fn set_system_prompt(&self, prompt: impl Into<String>) {
        *self.system_prompt.lock().await = prompt.into();
    }

    pub async fn model(&self) -> String {
        self.config.lock().await.model.clone()
    }

    /// Invokes the stream's cancel token. The busy-registry entry is left
    /// in place until the in-flight `Run`'s deferred cleanup removes it.
    pub async fn cancel(&self, session_id: &str) {
        if let Some(token) = self.busy.lock().await.get(session_id) {
            token.cancel();
        }
    }

    pub async fn cancel_all(&self) {
        let ids: Vec<String> = self.busy.lock().await.keys().cloned().collect();
        for id in &ids {
            self.cancel(id).await;
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline && self.is_busy().await {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    fn spawn_title_generation(&self, session_id: SessionId, prompt: String) {
        let Some(generator) = self.title_generator.clone() else {
            return;
        };
        let session_store = self.session_store.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let title = match generator.generate_title(&prompt).await {
                Ok(title) => title,
                Err(err) => {
                    warn!(%err, "title generation failed");
                    return;
                }
            };
            let existing = match session_store.get(&session_id).await {
                Ok(session) => session,
                Err(err) => {
                    warn!(%err, "failed to load session for title update");
                    return;
                }
            };
            if let Err(err) = session_store
                .update_title_and_usage(
                    &session_id,
                    Some(title.clone()),
                    existing.prompt_tokens,
                    existing.completion_tokens,
                    existing.cache_read_tokens,
                    existing.cache_write_tokens,
                    existing.cost,
                )
                .await
            {
                warn!(%err, "failed to persist generated title");
                return;
            }
            let _ = event_tx.send(SessionEvent::title_updated(title)).await;
        });
    }

    /// Builds a keep-alive ping closure around a snapshot of the current
    /// history: appends a single-character follow-up, re-places cache
    /// markers as if no summary existed, and caps the round-trip at one
    /// output token.
    async fn build_keep_alive_ping(&self, session_id: SessionId, mut messages: Vec<Message>) -> PingFn {
        messages.push(
            Message::user(format!("{}-keepalive", uuid::Uuid::new_v4()), session_id.as_str())
                .with_part(MessagePart::text(".")),
        );
        let disable_cache = self.config.lock().await.disable_prompt_cache;
        place_cache_markers(&mut messages, false, disable_cache);

        let provider = self.llm_provider.clone();
        let model = self.config.lock().await.model.clone();
        let options = ModelCallOptions::default().with_max_output_tokens(1);

        Box::new(move || {
            let provider = provider.clone();
            let model = model.clone();
            let messages = messages.clone();
            let options = options.clone();
            Box::pin(async move {
                match provider
                    .complete(CancellationToken::new(), &model, &messages, &options)
                    .await
                {
                    Ok(_) => true,
                    Err(err) => {
                        warn!(%err, "keep-alive ping failed");
                        false
                    }
                }
            })
        })
    }

    /// Validates, atomically gates on busy, and either queues the call or
    /// hands it to [`Self::run_internal`]. The busy check and the
    /// busy-registry insert happen under a single `busy` lock acquisition
    /// with no intervening `.await`, so two concurrent `Run`s for the same
    /// session can never both observe "not busy".
    pub fn run<'a>(
        &'a self,
        parent_ctx: CancellationToken,
        call: SessionAgentCall,
    ) -> BoxFuture<'a, Result<RunOutcome>> {
        Box::pin(async move {
            if call.prompt.trim().is_empty() && call.attachments.is_empty() {
                return Err(RunError::Validation("empty prompt".into()));
            }
            if call.session_id.as_str().is_empty() {
                return Err(RunError::Validation("missing session id".into()));
            }

            let run_state = RunState::new(parent_ctx.clone(), Vec::new());
            {
                let mut busy = self.busy.lock().await;
                if busy.contains_key(call.session_id.as_str()) {
                    drop(busy);
                    self.queues.push(call.session_id.as_str(), call).await;
                    return Ok(RunOutcome::Queued);
                }
                busy.insert(call.session_id.as_str().to_string(), run_state.stream_ctx.clone());
            }

            self.run_internal(parent_ctx, call, run_state).await
        })
    }

    /// Executes a `Run` that has already been granted the busy gate —
    /// either by `run()`'s atomic check-and-insert, or (for a queue-replay
    /// call) by the caller still holding the session's busy entry from its
    /// own `run()` invocation. Must never be called for a session that
    /// isn't already registered busy.
    fn run_internal<'a>(
        &'a self,
        parent_ctx: CancellationToken,
        call: SessionAgentCall,
        mut run_state: RunState,
    ) -> BoxFuture<'a, Result<RunOutcome>> {
        let span = orbit_observability::agent_span!(call.session_id.as_str(), "run");
        Box::pin(async move {
            // Keep the busy-registry token current for this session: on the
            // first call this is the token `run()` just inserted; on a
            // queue-replay call it swaps in the replay's own `stream_ctx` so
            // `cancel()` reaches the run that is actually executing.
            self.busy.lock().await.insert(
                call.session_id.as_str().to_string(),
                run_state.stream_ctx.clone(),
            );

            let mut session = self.session_store.get(&call.session_id).await?;
            let is_first_message = session.title.is_none();
            session.start_run();
            self.session_store.save(session).await?;

            if is_first_message {
                self.spawn_title_generation(call.session_id.clone(), call.prompt.clone());
            }

            let mut user_message =
                Message::user(uuid::Uuid::new_v4().to_string(), call.session_id.as_str())
                    .with_part(MessagePart::text(call.prompt.clone()));
            for attachment in call.attachments.clone() {
                user_message = user_message.with_part(attachment);
            }
            self.message_store.create(user_message).await?;

            let history_snapshot = self
                .message_store
                .list(&call.session_id)
                .await
                .unwrap_or_default();
            let ping = self
                .build_keep_alive_ping(call.session_id.clone(), history_snapshot)
                .await;
            self.keepalive.touch(call.session_id.as_str(), ping).await;

            let run_result = self.run_stream(&mut run_state, &call).await;

            let outcome: Result<()> = match run_result {
                Ok(step_history) => {
                    self.finish_run_success(&parent_ctx, &call, &mut run_state, step_history)
                        .await
                }
                Err(err) => {
                    let mut session = self.session_store.get(&call.session_id).await?;
                    session.finish_run(match &err {
                        RunError::Cancelled => SessionStatus::Cancelled,
                        other => SessionStatus::Failed {
                            error: other.to_string(),
                        },
                    });
                    let _ = self.session_store.save(session).await;
                    Err(err)
                }
            };

            self.keepalive.stop(call.session_id.as_str()).await;

            let next = self.queues.pop_front(call.session_id.as_str()).await;
            let result: Result<RunOutcome> = if outcome.is_err() {
                outcome.map(|_| RunOutcome::Completed)
            } else if let Some(entry) = next {
                let replay_state = RunState::new(parent_ctx.clone(), Vec::new());
                self.run_internal(parent_ctx.clone(), entry, replay_state).await
            } else {
                Ok(RunOutcome::Completed)
            };

            self.busy.lock().await.remove(call.session_id.as_str());
            result
        }
        .instrument(span))
    }

    async fn build_handler(&self) -> StepHandler {
        let provider = self.config.lock().await.provider;
        StepHandler::new(
            self.message_store.clone(),
            self.session_store.clone(),
            self.lsp.clone(),
            self.event_tx.clone(),
            provider,
            self.pricing,
        )
    }

    /// Picks at most one bulky old tool output per loop iteration and
    /// replaces it with a subagent summary in `run_state.tidy_compression`.
    /// Best-effort: a failed compression call is logged and skipped, it
    /// never fails the run.
    async fn tidy_one_bulky_output(&self, run_state: &mut RunState, model: &str) {
        let Some(call_id) = identify_bulky_outputs(
            &run_state.history,
            BULKY_OUTPUT_THRESHOLD_BYTES,
            &run_state.tidy_compression,
        )
        .into_iter()
        .next() else {
            return;
        };

        let output = run_state.history.iter().find_map(|m| {
            m.parts.iter().find_map(|p| match p {
                MessagePart::ToolResult(r) if r.tool_call_id == call_id => {
                    r.output.as_str().map(|s| s.to_string())
                }
                _ => None,
            })
        });
        let Some(output) = output else { return };

        match compress_tool_output(&self.llm_provider, run_state.parent_ctx.clone(), model, &output)
            .await
        {
            Ok(summary) => {
                run_state.tidy_compression.insert(call_id, summary);
            }
            Err(err) => warn!(%err, %call_id, "tidy compression failed, leaving output as-is"),
        }
    }

    async fn run_stream(
        &self,
        run_state: &mut RunState,
        call: &SessionAgentCall,
    ) -> Result<Vec<StepResult>> {
        let config = self.config.lock().await.clone();
        let config_model = config.model.clone();
        let config_billing_url = config.credits_billing_url.clone();
        let stream_runner =
            StreamRunner::new(self.llm_provider.clone(), self.tool_catalogue.clone(), config);
        let mut handler = self.build_handler().await;
        let tools = self.tools.lock().await.clone();
        let system_prompt = self.system_prompt.lock().await.clone();

        let mut step_history: Vec<StepResult> = Vec::new();

        loop {
            let session = self.session_store.get(&call.session_id).await?;
            run_state.history = self.message_store.list(&call.session_id).await?;

            let stream_ctx = run_state.stream_ctx.clone();
            let outcome = stream_runner
                .run_step(
                    &run_state.parent_ctx,
                    &stream_ctx,
                    run_state,
                    &mut handler,
                    &session,
                    &self.queues,
                    &system_prompt,
                    call.template_context.as_deref(),
                    &tools,
                    &call.options,
                    &step_history,
                )
                .await;

            match outcome {
                Ok(step_outcome) => {
                    step_history.push(step_outcome.result);
                    run_state.should_summarize =
                        run_state.should_summarize || step_outcome.should_summarize;
                    if step_outcome.finished_with_tool_calls && !run_state.should_summarize {
                        self.tidy_one_bulky_output(run_state, &config_model).await;
                        continue;
                    }
                    return Ok(step_history);
                }
                Err(err) => {
                    orbit_observability::record_error(&err);
                    run_state.current_assistant_message_id =
                        handler.current_assistant().map(|m| m.id.clone());
                    let _ = finalize_error(&mut handler, &err, &config_model, &config_billing_url)
                        .await;
                    return Err(err);
                }
            }
        }
    }

    async fn finish_run_success(
        &self,
        parent_ctx: &CancellationToken,
        call: &SessionAgentCall,
        run_state: &mut RunState,
        step_history: Vec<StepResult>,
    ) -> Result<()> {
        if run_state.should_summarize {
            let finished_with_tool_calls = step_history
                .last()
                .map(|s| s.finish_reason == ProviderFinishReason::ToolCalls)
                .unwrap_or(false);

            match self
                .summarize(parent_ctx.clone(), call.session_id.clone(), serde_json::Value::Null)
                .await
            {
                Ok(_) if finished_with_tool_calls => {
                    let continuation = continuation_prompt(&call.prompt);
                    self.queues
                        .push(
                            call.session_id.as_str(),
                            SessionAgentCall::new(call.session_id.clone(), continuation),
                        )
                        .await;
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "auto-summarize failed"),
            }
        }

        let mut session = self.session_store.get(&call.session_id).await?;
        session.finish_run(SessionStatus::Completed);
        self.session_store.save(session).await?;
        Ok(())
    }

    /// Fails with *session-busy* if a run is active. Runs a one-step model
    /// invocation over trimmed history, persists the summary as a new
    /// assistant message, points the session at it, and resets
    /// `PromptTokens` to 0 via the narrow usage-update interface so it
    /// cannot race a concurrent step-finish save.
    pub async fn summarize(
        &self,
        parent_ctx: CancellationToken,
        session_id: SessionId,
        _provider_options: serde_json::Value,
    ) -> Result<String> {
        if self.is_session_busy(session_id.as_str()).await {
            return Err(RunError::Session("session busy".into()));
        }

        let session = self.session_store.get(&session_id).await?;
        let history = self.message_store.list(&session_id).await?;
        let model = self.config.lock().await.model.clone();

        let summary_prompt = Message::system(
            format!("{}-summary-prompt", uuid::Uuid::new_v4()),
            session_id.as_str(),
        )
        .with_part(MessagePart::text(
            "Summarize the conversation so far, preserving key decisions, open tasks, \
             and file state. Be concise.",
        ));
        let mut messages = history;
        messages.insert(0, summary_prompt);

        let summary_text = self
            .llm_provider
            .complete(parent_ctx, &model, &messages, &ModelCallOptions::default())
            .await?;

        let summary_message =
            Message::assistant(uuid::Uuid::new_v4().to_string(), session_id.as_str())
                .with_part(MessagePart::text(summary_text.clone()));
        let summary_message = self.message_store.create(summary_message).await?;

        self.session_store
            .update_title_and_usage(
                &session_id,
                None,
                0,
                session.completion_tokens,
                session.cache_read_tokens,
                session.cache_write_tokens,
                session.cost,
            )
            .await?;

        let mut session = self.session_store.get(&session_id).await?;
        session.summary_message_id = Some(summary_message.id.clone());
        self.session_store.save(session).await?;

        info!(session_id = %session_id, "session summarized");
        Ok(summary_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_core::store::{InMemoryMessageStore, InMemorySessionStore};
    use orbit_core::{ProviderEvent, SessionConfig};
    use std::path::PathBuf;

    struct EchoProvider;

    #[async_trait::async_trait]
    impl LlmProvider for EchoProvider {
        async fn stream(
            &self,
            _ctx: CancellationToken,
            _model: &str,
            _messages: &[Message],
            _system_prompt: &str,
            _tools: &[ToolInfo],
            _options: &ModelCallOptions,
        ) -> orbit_core::Result<orbit_core::ProviderStream> {
            use futures::stream;
            let events = vec![
                ProviderEvent::Start,
                ProviderEvent::TextDelta {
                    delta: "hi there".into(),
                },
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
            Ok("ack".to_string())
        }
    }

    async fn build_agent() -> (SessionAgent, SessionId) {
        let message_store: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
        let session_store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let config = SessionConfig::new("test-model", "anthropic");
        let session = Session::new(PathBuf::from("/repo"), config);
        let session_id = session.id.clone();

        let runner_config = RunnerConfig::new(PathBuf::from("/repo"));
        let pricing = ModelPricing::default();
        let (tx, _rx) = tokio::sync::mpsc::channel(64);

        session_store.save(session).await.unwrap();

        let agent = SessionAgent::new(
            message_store,
            session_store,
            Arc::new(EchoProvider),
            None,
            None,
            None,
            runner_config,
            pricing,
            tx,
        );
        (agent, session_id)
    }

    #[tokio::test]
    async fn test_run_completes_and_clears_busy() {
        let (agent, session_id) = build_agent().await;
        let call = SessionAgentCall::new(session_id.clone(), "hello");
        let outcome = agent.run(CancellationToken::new(), call).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert!(!agent.is_session_busy(session_id.as_str()).await);
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected() {
        let (agent, session_id) = build_agent().await;
        let call = SessionAgentCall::new(session_id, "   ");
        let result = agent.run(CancellationToken::new(), call).await;
        assert!(matches!(result, Err(RunError::Validation(_))));
    }

    #[tokio::test]
    async fn test_queue_inspection_empty_after_completion() {
        let (agent, session_id) = build_agent().await;
        let call = SessionAgentCall::new(session_id.clone(), "hello");
        agent.run(CancellationToken::new(), call).await.unwrap();
        assert_eq!(agent.queued_prompts(session_id.as_str()).await, 0);
    }
}
