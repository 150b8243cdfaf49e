use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::message::{Message, Role};
use crate::run::{ModelCallOptions, StepResult};
use crate::session::{Session, SessionId};
use crate::tool_call::{ToolCall, ToolInfo, ToolResult};

/// Persists and retrieves messages. The engine never assumes a particular
/// backing store; `store::memory` and `store::sqlite` are the two
/// implementations this crate ships.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, message: Message) -> Result<Message>;
    async fn update(&self, message: Message) -> Result<Message>;
    async fn list(&self, session_id: &SessionId) -> Result<Vec<Message>>;
    async fn delete(&self, session_id: &SessionId, message_id: &str) -> Result<()>;
}

/// Persists and retrieves session state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &SessionId) -> Result<Session>;
    async fn save(&self, session: Session) -> Result<Session>;

    /// Updates exactly the title and usage counters, never the rest of the
    /// session record — callers that hold a stale `Session` elsewhere must
    /// not have their other edits clobbered by a concurrent usage update.
    async fn update_title_and_usage(
        &self,
        session_id: &SessionId,
        title: Option<String>,
        prompt_tokens: u64,
        completion_tokens: u64,
        cache_read_tokens: u64,
        cache_write_tokens: u64,
        cost: f64,
    ) -> Result<()>;
}

/// One event emitted by a provider's stream, as translated by the Stream
/// Runner into `StepHandler` callback invocations.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    Start,
    ReasoningStart { id: String },
    ReasoningDelta { id: String, delta: String, signature: Option<String> },
    ReasoningEnd { id: String },
    TextDelta { delta: String },
    ToolInputStart { id: String, name: String },
    ToolCall { call: ToolCall },
    Finish { result: StepResult },
    Error {
        title: Option<String>,
        message: String,
        status_code: Option<u16>,
        retryable: bool,
    },
}

pub type ProviderStream = BoxStream<'static, ProviderEvent>;

/// A single call to an upstream LLM. Implementations own their own wire
/// format and retry policy; the engine only sees the translated event
/// stream.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn stream(
        &self,
        ctx: CancellationToken,
        model: &str,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolInfo],
        options: &ModelCallOptions,
    ) -> Result<ProviderStream>;

    /// One-shot, non-streaming call used for session title generation and
    /// long-output tidy summaries. `max_output_tokens` in `options` is
    /// honored (the keep-alive ping sets it to 1).
    async fn complete(
        &self,
        ctx: CancellationToken,
        model: &str,
        messages: &[Message],
        options: &ModelCallOptions,
    ) -> Result<String>;
}

/// Convenience used by the Session Agent to generate a session title from
/// its first user prompt.
#[async_trait]
pub trait TitleGenerator: Send + Sync {
    async fn generate_title(&self, prompt: &str) -> Result<String>;
}

/// External tool catalogue. The engine dispatches calls through this trait
/// and only inspects the resulting `ToolResult`'s error/media shape — tool
/// semantics beyond that are this trait implementation's concern.
#[async_trait]
pub trait ToolCatalogue: Send + Sync {
    fn list(&self) -> Vec<ToolInfo>;
    async fn run(&self, ctx: CancellationToken, call: &ToolCall) -> Result<ToolResult>;
}

/// Language server integration, batched per step and flushed on
/// `on_step_finish` (or after a bounded wait, whichever comes first).
#[async_trait]
pub trait LspManager: Send + Sync {
    fn handles_file(&self, path: &str) -> bool;
    async fn open_file_on_demand(&self, path: &str) -> Result<()>;
    async fn notify_change(&self, path: &str) -> Result<()>;
    fn diagnostics_version(&self) -> u64;
}

pub fn next_message_role_after(role: Role) -> Role {
    match role {
        Role::User => Role::Assistant,
        Role::Assistant => Role::User,
        Role::System => Role::User,
    }
}
