use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::message::{Message, ProviderFinishReason};
use crate::session::SessionId;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCallOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
}

impl ModelCallOptions {
    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }
}

/// One request to the session agent: a user prompt plus any per-call model
/// and provider overrides. Queued verbatim when the target session is busy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAgentCall {
    pub session_id: SessionId,
    pub prompt: String,
    #[serde(default)]
    pub attachments: Vec<crate::message::MessagePart>,
    #[serde(default)]
    pub options: ModelCallOptions,
    #[serde(default)]
    pub provider_options: serde_json::Value,
    #[serde(default)]
    pub template_context: Option<String>,
}

impl SessionAgentCall {
    pub fn new(session_id: SessionId, prompt: impl Into<String>) -> Self {
        Self {
            session_id,
            prompt: prompt.into(),
            attachments: Vec::new(),
            options: ModelCallOptions::default(),
            provider_options: serde_json::Value::Null,
            template_context: None,
        }
    }
}

/// A `SessionAgentCall` parked behind a busy session, replayed in FIFO
/// order once the in-flight `Run` completes.
pub type QueueEntry = SessionAgentCall;

/// Per-invocation state owned exclusively by the task executing one `Run`.
/// Never cloned and never shared across an `.await` boundary to another
/// task — the `session_lock` is the only piece of it another task may
/// touch, and only indirectly, by acquiring the same mutex.
pub struct RunState {
    pub current_assistant_message_id: Option<String>,
    pub should_summarize: bool,
    /// Cancellation token for cleanup/finalization work. Distinct from the
    /// stream's own token — cancelling the stream must never cancel this
    /// one, or the Error Finalizer could never write its result.
    pub parent_ctx: CancellationToken,
    pub stream_ctx: CancellationToken,
    pub session_lock: Arc<Mutex<()>>,
    pub history: Vec<Message>,
    /// Tool-call id → replacement summary, applied lazily to the outgoing
    /// wire copy of `history` without ever touching the persisted messages.
    pub tidy_compression: TidyCompression,
}

impl RunState {
    pub fn new(parent_ctx: CancellationToken, history: Vec<Message>) -> Self {
        Self {
            current_assistant_message_id: None,
            should_summarize: false,
            stream_ctx: parent_ctx.child_token(),
            parent_ctx,
            session_lock: Arc::new(Mutex::new(())),
            history,
            tidy_compression: TidyCompression::new(),
        }
    }
}

/// Usage and finish-reason summary produced when a step's stream ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub finish_reason: ProviderFinishReason,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    #[serde(default)]
    pub provider_metadata: serde_json::Value,
}

/// Maps a tool-call id to a shorter replacement summary, used by the
/// long-output tidier to keep bulky tool results out of subsequent
/// requests without discarding the fact that the call happened.
pub type TidyCompression = HashMap<String, String>;
