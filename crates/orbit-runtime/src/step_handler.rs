//! Step Handler: owns the assistant message currently being streamed and
//! implements the ten provider callbacks as methods rather than captured
//! closures, so the mutable state they share lives in one place.

use std::sync::Arc;
use std::time::Duration;

use orbit_core::{
    FinishRecord, LspManager, Message, MessagePart, MessageStore, RunState, Session, SessionEvent,
    SessionStore, ToolCall, ToolCallStatus, ToolResult,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{ProviderKind, RunnerConfig};
use crate::error::{RunError, Result};
use crate::history::{apply_media_workaround, deduplicate_content, place_cache_markers};
use crate::queue::SessionQueues;
use crate::tidy::apply_tidy_compression;
use crate::usage::{update_session_usage, ModelPricing};

/// Provider-specific reasoning signature shapes. Unknown providers carry no
/// signature at all and are silently ignored.
#[derive(Debug, Clone)]
pub enum ReasoningSignature {
    Anthropic { signature: String },
    OpenAiResponses { signature: String, tool_id: String },
    ProviderMetadataBlob(serde_json::Value),
}

fn extract_reasoning_signature(
    provider: &ProviderKind,
    metadata: &serde_json::Value,
) -> Option<ReasoningSignature> {
    match provider {
        ProviderKind::Anthropic => metadata
            .get("signature")
            .and_then(|v| v.as_str())
            .map(|s| ReasoningSignature::Anthropic {
                signature: s.to_string(),
            }),
        ProviderKind::OpenAI => {
            let signature = metadata.get("signature")?.as_str()?.to_string();
            let tool_id = metadata.get("tool_id")?.as_str()?.to_string();
            Some(ReasoningSignature::OpenAiResponses { signature, tool_id })
        }
        ProviderKind::ZAI => metadata
            .get("responses_metadata")
            .cloned()
            .map(ReasoningSignature::ProviderMetadataBlob),
        ProviderKind::Ollama => None,
    }
}

fn format_signature(sig: &ReasoningSignature) -> String {
    match sig {
        ReasoningSignature::Anthropic { signature } => signature.clone(),
        ReasoningSignature::OpenAiResponses { signature, tool_id } => {
            format!("{signature}:{tool_id}")
        }
        ReasoningSignature::ProviderMetadataBlob(value) => value.to_string(),
    }
}

pub struct PreparedStep {
    pub messages: Vec<Message>,
    pub assistant_message_id: String,
    pub supports_images: bool,
    pub model_display_name: String,
}

/// Drives one step of a `Run`. Held exclusively by the task running the
/// stream — never shared across an `.await` boundary to another task.
pub struct StepHandler {
    message_store: Arc<dyn MessageStore>,
    session_store: Arc<dyn SessionStore>,
    lsp: Option<Arc<dyn LspManager>>,
    event_tx: mpsc::Sender<SessionEvent>,
    provider: ProviderKind,
    pricing: ModelPricing,
    current_assistant: Option<Message>,
    lsp_batch: Vec<String>,
}

impl StepHandler {
    pub fn new(
        message_store: Arc<dyn MessageStore>,
        session_store: Arc<dyn SessionStore>,
        lsp: Option<Arc<dyn LspManager>>,
        event_tx: mpsc::Sender<SessionEvent>,
        provider: ProviderKind,
        pricing: ModelPricing,
    ) -> Self {
        Self {
            message_store,
            session_store,
            lsp,
            event_tx,
            provider,
            pricing,
            current_assistant: None,
            lsp_batch: Vec::new(),
        }
    }

    pub fn current_assistant(&self) -> Option<&Message> {
        self.current_assistant.as_ref()
    }

    pub fn current_assistant_mut(&mut self) -> Option<&mut Message> {
        self.current_assistant.as_mut()
    }

    pub(crate) fn message_store(&self) -> &Arc<dyn MessageStore> {
        &self.message_store
    }

    /// Clears stale cache markers, drains the session's prompt queue into
    /// history, applies the media workaround, deduplicator, and tidy
    /// compression, injects the system prompt(s), re-places cache markers,
    /// and opens a fresh assistant message for this step.
    #[allow(clippy::too_many_arguments)]
    pub async fn prepare_step(
        &mut self,
        session: &Session,
        run_state: &mut RunState,
        queues: &SessionQueues,
        system_prompt: &str,
        template_context: Option<&str>,
        config: &RunnerConfig,
    ) -> Result<PreparedStep> {
        for entry in queues.drain_all(session.id.as_str()).await {
            let msg_id = format!("{}-queued", uuid::Uuid::new_v4());
            run_state
                .history
                .push(Message::user(msg_id, session.id.as_str()).with_part(MessagePart::text(entry.prompt)));
        }

        let mut messages = run_state.history.clone();

        apply_media_workaround(&mut messages, &self.provider);
        deduplicate_content(&mut messages);
        apply_tidy_compression(&mut messages, &run_state.tidy_compression);

        if let Some(template_context) = template_context {
            messages.insert(
                0,
                Message::system(format!("{}-template", uuid::Uuid::new_v4()), session.id.as_str())
                    .with_part(MessagePart::text(template_context.to_string())),
            );
        }
        if !system_prompt.is_empty() {
            messages.insert(
                0,
                Message::system(format!("{}-prompt", uuid::Uuid::new_v4()), session.id.as_str())
                    .with_part(MessagePart::text(system_prompt.to_string())),
            );
        }

        place_cache_markers(
            &mut messages,
            session.summary_message_id.is_some(),
            config.disable_prompt_cache,
        );

        let assistant_id = uuid::Uuid::new_v4().to_string();
        let mut assistant = Message::assistant(assistant_id.clone(), session.id.as_str());
        assistant.provider = Some(self.provider.as_str().to_string());
        assistant.model = Some(config.model.clone());

        self.message_store.create(assistant.clone()).await?;
        self.current_assistant = Some(assistant);
        run_state.current_assistant_message_id = Some(assistant_id.clone());
        self.lsp_batch.clear();

        Ok(PreparedStep {
            messages,
            assistant_message_id: assistant_id,
            supports_images: self.provider.supports_images(),
            model_display_name: config.model.clone(),
        })
    }

    fn assistant_mut(&mut self) -> Result<&mut Message> {
        self.current_assistant
            .as_mut()
            .ok_or_else(|| RunError::Session("no current assistant message".into()))
    }

    /// The `ReasoningStart` event carries only a block id — providers emit
    /// the reasoning text itself across the `ReasoningDelta` events that
    /// follow, so this just asserts a current assistant exists.
    pub fn on_reasoning_start(&mut self) -> Result<()> {
        self.assistant_mut()?;
        Ok(())
    }

    pub fn on_reasoning_delta(&mut self, delta: &str) -> Result<()> {
        self.assistant_mut()?.push_reasoning_delta(delta);
        Ok(())
    }

    pub fn on_reasoning_end(&mut self, provider_metadata: &serde_json::Value) -> Result<()> {
        if let Some(sig) = extract_reasoning_signature(&self.provider, provider_metadata) {
            let formatted = format_signature(&sig);
            if let Some(MessagePart::Reasoning { signature, .. }) =
                self.assistant_mut()?.parts.last_mut()
            {
                *signature = Some(formatted);
            }
        }
        self.assistant_mut()?.finish_thinking();
        Ok(())
    }

    pub fn on_text_delta(&mut self, text: &str) -> Result<()> {
        let assistant = self.assistant_mut()?;
        let first_delta = assistant.parts.is_empty();
        let text = if first_delta {
            text.strip_prefix('\n').unwrap_or(text)
        } else {
            text
        };
        assistant.push_text_delta(text);
        Ok(())
    }

    /// Idempotent by construction: `Message::add_tool_call` replaces by id,
    /// so a repeated start with the same id is a no-op overwrite.
    pub fn on_tool_input_start(&mut self, id: &str, name: &str) -> Result<()> {
        self.assistant_mut()?.add_tool_call(
            ToolCall::new(id, name, serde_json::Value::Object(Default::default()))
                .with_status(ToolCallStatus::InputStreaming),
        );
        Ok(())
    }

    pub fn on_tool_call(&mut self, call: ToolCall) -> Result<()> {
        let call = call.with_status(ToolCallStatus::Ready);
        let _ = self.event_tx.try_send(SessionEvent::tool_call_start(call.clone()));
        self.assistant_mut()?.add_tool_call(call);
        Ok(())
    }

    pub async fn on_tool_result(&mut self, result: ToolResult) -> Result<()> {
        let _ = self
            .event_tx
            .try_send(SessionEvent::tool_result(result.tool_call_id.clone(), result.clone()));
        self.assistant_mut()?.add_tool_result(result.clone());

        let tool_message = Message::assistant(
            format!("{}-tool-result", uuid::Uuid::new_v4()),
            self.assistant_mut()?.session_id.clone(),
        )
        .with_part(MessagePart::ToolResult(result));
        self.message_store.create(tool_message).await?;
        Ok(())
    }

    pub fn on_retry(&mut self, attempt: u32, reason: &str) {
        warn!(attempt, reason, "provider retry");
        let _ = self.event_tx.try_send(SessionEvent::retry(attempt, reason));
    }

    pub fn register_lsp_touch(&mut self, path: impl Into<String>) {
        self.lsp_batch.push(path.into());
    }

    /// Flushes the LSP batch (notify every touched file, wait up to 5s or
    /// until any client's diagnostics version advances), records the
    /// finish reason, and persists session usage under `session_lock`.
    pub async fn on_step_finish(
        &mut self,
        run_state: &RunState,
        step: &orbit_core::StepResult,
    ) -> Result<()> {
        self.flush_lsp_batch().await;

        let assistant = self.assistant_mut()?;
        assistant.add_finish(FinishRecord::new(orbit_core::map_finish_reason(step.finish_reason)));
        let assistant = assistant.clone();

        {
            let _guard = run_state.session_lock.lock().await;
            let mut session = self.session_store.get(&orbit_core::SessionId(assistant.session_id.clone())).await?;
            update_session_usage(&mut session, &self.provider, &self.pricing, step);
            self.session_store.save(session).await?;
        }

        self.message_store.update(assistant).await?;
        Ok(())
    }

    async fn flush_lsp_batch(&mut self) {
        let Some(lsp) = self.lsp.clone() else {
            self.lsp_batch.clear();
            return;
        };
        let batch = std::mem::take(&mut self.lsp_batch);
        if batch.is_empty() {
            return;
        }

        let starting_version = lsp.diagnostics_version();
        for path in &batch {
            if let Err(err) = lsp.notify_change(path).await {
                debug!(path, %err, "lsp notify_change failed");
            }
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if lsp.diagnostics_version() != starting_version {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
