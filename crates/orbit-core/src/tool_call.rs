use serde::{Deserialize, Serialize};

/// A tool invocation requested by the model inside a single assistant message.
///
/// `add_tool_call` on [`crate::message::Message`] replaces any existing part
/// with the same `id` rather than appending a duplicate, so repeated partial
/// deltas for the same call converge on one final entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
    pub status: ToolCallStatus,
    /// Set when the provider executed the tool itself (e.g. a hosted
    /// code-interpreter tool) and the result arrives on the same stream
    /// rather than via a follow-up `ToolCatalogue::run`.
    #[serde(default)]
    pub provider_executed: bool,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
            status: ToolCallStatus::InputStreaming,
            provider_executed: false,
        }
    }

    pub fn with_status(mut self, status: ToolCallStatus) -> Self {
        self.status = status;
        self
    }

    pub fn provider_executed(mut self) -> Self {
        self.provider_executed = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Arguments are still being streamed in (`on_tool_input_start` fired,
    /// `on_tool_call` has not).
    InputStreaming,
    /// Arguments are complete; the call is ready to run or is running.
    Ready,
    /// A matching `ToolResult` part has been appended.
    Finished,
}

/// The outcome of running a tool call, carried as its own message part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub output: serde_json::Value,
    pub is_error: bool,
    pub duration_ms: u64,
    /// Present when the output carries non-text media (image, pdf, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Base64-encoded payload, present alongside `mime_type`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, output: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output,
            is_error: false,
            duration_ms,
            mime_type: None,
            data: None,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, output: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output,
            is_error: true,
            duration_ms,
            mime_type: None,
            data: None,
        }
    }

    pub fn with_media(mut self, mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self.data = Some(data.into());
        self
    }

    pub fn has_media(&self) -> bool {
        self.mime_type.is_some()
    }
}

/// Describes one entry of the tool catalogue, as surfaced to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}
