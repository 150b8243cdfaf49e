use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool_call::{ToolCall, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One piece of a [`Message`]'s ordered content.
///
/// `FileAttachment` covers both user-supplied attachments and the synthetic
/// follow-up attachment the provider media workaround inserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    Reasoning { text: String, signature: Option<String> },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
    FileAttachment { mime_type: String, data: String, filename: Option<String> },
    Error { message: String },
}

impl MessagePart {
    pub fn text(content: impl Into<String>) -> Self {
        MessagePart::Text { text: content.into() }
    }

    pub fn reasoning(content: impl Into<String>) -> Self {
        MessagePart::Reasoning {
            text: content.into(),
            signature: None,
        }
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            MessagePart::ToolCall(call) => Some(&call.id),
            MessagePart::ToolResult(result) => Some(&result.tool_call_id),
            _ => None,
        }
    }
}

/// The raw reason a provider stream ended, as reported on the wire. Never
/// stored directly on a [`FinishRecord`] — `map_finish_reason` translates it
/// into the domain-level [`FinishReason`] first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFinishReason {
    Stop,
    Length,
    ToolCalls,
    Other,
}

/// The domain-level reason an assistant message finished, as carried on
/// `FinishRecord` and surfaced to callers. Distinct from
/// [`ProviderFinishReason`] since several error classes (cancellation,
/// permission denial, provider errors) never come from a provider stream at
/// all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    Unknown,
    Cancelled,
    PermissionDenied,
    Error,
}

/// Maps a provider's raw finish signal onto the domain `FinishReason`:
/// `length -> max-tokens`, `stop -> end-turn`, `tool-calls -> tool-use`,
/// anything else -> `unknown`.
pub fn map_finish_reason(raw: ProviderFinishReason) -> FinishReason {
    match raw {
        ProviderFinishReason::Length => FinishReason::MaxTokens,
        ProviderFinishReason::Stop => FinishReason::EndTurn,
        ProviderFinishReason::ToolCalls => FinishReason::ToolUse,
        ProviderFinishReason::Other => FinishReason::Unknown,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishRecord {
    pub reason: FinishReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl FinishRecord {
    pub fn new(reason: FinishReason) -> Self {
        Self {
            reason,
            title: None,
            details: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cache_read_tokens: None,
            cache_write_tokens: None,
        }
    }

    pub fn with_cache_read(mut self, tokens: u64) -> Self {
        self.cache_read_tokens = Some(tokens);
        self
    }

    pub fn with_cache_write(mut self, tokens: u64) -> Self {
        self.cache_write_tokens = Some(tokens);
        self
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A marker placed on a part to ask the provider to checkpoint the prompt
/// prefix up to and including it for cache reuse. Not a wire type on its
/// own — it is a property of the message carrying the marked part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheControl {
    pub ephemeral: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish: Option<FinishRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Whether a reasoning block is currently open (between
    /// `on_reasoning_start` and `on_reasoning_end`).
    #[serde(default)]
    pub thinking: bool,
    /// Cache-control markers are carried out-of-band by the placer rather
    /// than stored on the part; this records which part indices are marked
    /// so the marker survives serialization round-trips in tests.
    #[serde(default)]
    pub cache_marked_parts: Vec<usize>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(id: impl Into<String>, session_id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            role,
            parts: Vec::new(),
            finish: None,
            token_usage: None,
            provider: None,
            model: None,
            thinking: false,
            cache_marked_parts: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn user(id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::new(id, session_id, Role::User)
    }

    pub fn assistant(id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::new(id, session_id, Role::Assistant)
    }

    pub fn system(id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::new(id, session_id, Role::System)
    }

    pub fn with_part(mut self, part: MessagePart) -> Self {
        self.parts.push(part);
        self
    }

    pub fn with_token_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = Some(usage);
        self
    }

    /// Appends text, merging into a trailing open `Text` part when one
    /// exists so deltas don't fragment into one part per chunk.
    pub fn push_text_delta(&mut self, delta: &str) {
        if let Some(MessagePart::Text { text }) = self.parts.last_mut() {
            text.push_str(delta);
        } else {
            self.parts.push(MessagePart::text(delta));
        }
    }

    pub fn push_reasoning_delta(&mut self, delta: &str) {
        if let Some(MessagePart::Reasoning { text, .. }) = self.parts.last_mut() {
            text.push_str(delta);
        } else {
            self.parts.push(MessagePart::reasoning(delta));
        }
        self.thinking = true;
    }

    pub fn finish_thinking(&mut self) {
        self.thinking = false;
    }

    /// Replaces any existing `ToolCall` part sharing this id, preserving its
    /// position; otherwise appends. Mirrors provider streams that emit the
    /// same call id repeatedly as its arguments accumulate.
    pub fn add_tool_call(&mut self, call: ToolCall) {
        if let Some(existing) = self.parts.iter_mut().find_map(|p| match p {
            MessagePart::ToolCall(existing) if existing.id == call.id => Some(existing),
            _ => None,
        }) {
            *existing = call;
        } else {
            self.parts.push(MessagePart::ToolCall(call));
        }
    }

    /// Appends a tool result and marks the matching tool-call part finished.
    pub fn add_tool_result(&mut self, result: ToolResult) {
        for part in &mut self.parts {
            if let MessagePart::ToolCall(call) = part {
                if call.id == result.tool_call_id {
                    call.status = crate::tool_call::ToolCallStatus::Finished;
                }
            }
        }
        self.parts.push(MessagePart::ToolResult(result));
    }

    /// Replaces the message's single finish record, as opposed to
    /// accumulating a history of them — a message finishes exactly once.
    pub fn add_finish(&mut self, finish: FinishRecord) {
        self.finish = Some(finish);
    }

    pub fn tool_call(&self, id: &str) -> Option<&ToolCall> {
        self.parts.iter().find_map(|p| match p {
            MessagePart::ToolCall(call) if call.id == id => Some(call),
            _ => None,
        })
    }

    pub fn unfinished_tool_calls(&self) -> Vec<&ToolCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::ToolCall(call)
                    if call.status != crate::tool_call::ToolCallStatus::Finished =>
                {
                    Some(call)
                }
                _ => None,
            })
            .collect()
    }

    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_text_delta_merges() {
        let mut msg = Message::assistant("m1", "s1");
        msg.push_text_delta("Hello");
        msg.push_text_delta(", world");
        assert_eq!(msg.parts.len(), 1);
        assert_eq!(msg.text(), "Hello, world");
    }

    #[test]
    fn test_push_text_delta_after_tool_call_starts_new_part() {
        let mut msg = Message::assistant("m1", "s1");
        msg.push_text_delta("thinking about it");
        msg.add_tool_call(ToolCall::new("t1", "bash", serde_json::json!({})));
        msg.push_text_delta("done");
        assert_eq!(msg.parts.len(), 3);
    }

    #[test]
    fn test_add_tool_call_replaces_by_id() {
        let mut msg = Message::assistant("m1", "s1");
        msg.add_tool_call(ToolCall::new("t1", "bash", serde_json::json!({"command": "l"})));
        msg.add_tool_call(ToolCall::new("t1", "bash", serde_json::json!({"command": "ls -la"})));
        assert_eq!(msg.parts.len(), 1);
        assert_eq!(msg.tool_call("t1").unwrap().args, serde_json::json!({"command": "ls -la"}));
    }

    #[test]
    fn test_add_tool_result_marks_call_finished() {
        let mut msg = Message::assistant("m1", "s1");
        msg.add_tool_call(ToolCall::new("t1", "bash", serde_json::json!({})));
        msg.add_tool_result(ToolResult::success("t1", serde_json::json!({"out": "ok"}), 5));
        assert!(msg.unfinished_tool_calls().is_empty());
        assert_eq!(msg.parts.len(), 2);
    }

    #[test]
    fn test_add_finish_replaces_existing() {
        let mut msg = Message::assistant("m1", "s1");
        msg.add_finish(FinishRecord::new(FinishReason::ToolUse));
        msg.add_finish(FinishRecord::new(FinishReason::EndTurn));
        assert_eq!(msg.finish.unwrap().reason, FinishReason::EndTurn);
    }

    #[test]
    fn test_thinking_flag_lifecycle() {
        let mut msg = Message::assistant("m1", "s1");
        assert!(!msg.thinking);
        msg.push_reasoning_delta("pondering");
        assert!(msg.thinking);
        msg.finish_thinking();
        assert!(!msg.thinking);
    }

    #[test]
    fn test_message_serialization_roundtrip() {
        let mut msg = Message::user("m1", "s1");
        msg.push_text_delta("hello");
        let json = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.text(), "hello");
        assert_eq!(decoded.role, Role::User);
    }
}
