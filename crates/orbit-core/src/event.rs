use serde::{Deserialize, Serialize};

use crate::message::Role;
use crate::session::SessionStatus;
use crate::tool_call::{ToolCall, ToolResult};

/// Side-effect events a `Run` emits as it streams, independent of the
/// persisted `Message`/`Session` state. Front-ends subscribe to these;
/// the engine itself never reads them back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    TurnStart { role: Role },

    TextDelta { text: String },

    ReasoningDelta { text: String },

    ToolInputStart { tool_call_id: String, name: String },

    ToolCallStart { tool_call: ToolCall },

    ToolResult {
        tool_call_id: String,
        result: ToolResult,
    },

    Retry { attempt: u32, reason: String },

    Status { message: String },

    TitleUpdated { title: String },

    TurnEnd,

    Error { error: String },

    SessionEnd { status: SessionStatus },
}

impl SessionEvent {
    pub fn turn_start(role: Role) -> Self {
        SessionEvent::TurnStart { role }
    }

    pub fn text_delta(text: impl Into<String>) -> Self {
        SessionEvent::TextDelta { text: text.into() }
    }

    pub fn reasoning_delta(text: impl Into<String>) -> Self {
        SessionEvent::ReasoningDelta { text: text.into() }
    }

    pub fn tool_input_start(tool_call_id: impl Into<String>, name: impl Into<String>) -> Self {
        SessionEvent::ToolInputStart {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
        }
    }

    pub fn tool_call_start(tool_call: ToolCall) -> Self {
        SessionEvent::ToolCallStart { tool_call }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, result: ToolResult) -> Self {
        SessionEvent::ToolResult {
            tool_call_id: tool_call_id.into(),
            result,
        }
    }

    pub fn retry(attempt: u32, reason: impl Into<String>) -> Self {
        SessionEvent::Retry {
            attempt,
            reason: reason.into(),
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        SessionEvent::Status {
            message: message.into(),
        }
    }

    pub fn title_updated(title: impl Into<String>) -> Self {
        SessionEvent::TitleUpdated { title: title.into() }
    }

    pub fn turn_end() -> Self {
        SessionEvent::TurnEnd
    }

    pub fn error(error: impl Into<String>) -> Self {
        SessionEvent::Error {
            error: error.into(),
        }
    }

    pub fn session_end(status: SessionStatus) -> Self {
        SessionEvent::SessionEnd { status }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_start() {
        let event = SessionEvent::turn_start(Role::User);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"turn_start"#));
        assert!(json.contains(r#""role":"user"#));
    }

    #[test]
    fn test_text_delta() {
        let event = SessionEvent::text_delta("hello world");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"text_delta"#));
        assert!(json.contains("hello world"));
    }

    #[test]
    fn test_tool_input_start() {
        let event = SessionEvent::tool_input_start("t1", "bash");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_input_start"#));
        assert!(json.contains("bash"));
    }

    #[test]
    fn test_tool_result_event() {
        let result = ToolResult::success("t1", serde_json::json!({"stdout": "ok"}), 100);
        let event = SessionEvent::tool_result("t1", result);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_result"#));
        assert!(json.contains(r#""is_error":false"#));
    }

    #[test]
    fn test_retry() {
        let event = SessionEvent::retry(2, "rate limited");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""attempt":2"#));
    }

    #[test]
    fn test_session_end_failed() {
        let event = SessionEvent::session_end(SessionStatus::Failed {
            error: "timeout".to_string(),
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"session_end"#));
        assert!(json.contains("timeout"));
    }

    #[test]
    fn test_all_event_types_serializable() {
        let events = vec![
            SessionEvent::turn_start(Role::User),
            SessionEvent::text_delta("text"),
            SessionEvent::reasoning_delta("thinking"),
            SessionEvent::tool_input_start("t1", "bash"),
            SessionEvent::tool_call_start(ToolCall::new("t1", "bash", serde_json::json!({}))),
            SessionEvent::tool_result("t1", ToolResult::success("t1", serde_json::json!({}), 0)),
            SessionEvent::retry(1, "retrying"),
            SessionEvent::status("status"),
            SessionEvent::title_updated("Fix the bug"),
            SessionEvent::turn_end(),
            SessionEvent::error("err"),
            SessionEvent::session_end(SessionStatus::Completed),
        ];

        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let decoded: SessionEvent = serde_json::from_str(&json).unwrap();
            let _ = format!("{:?}", decoded);
        }
    }
}
