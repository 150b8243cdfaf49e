pub mod db;
pub mod error;
pub mod event;
pub mod message;
pub mod ports;
pub mod run;
pub mod session;
pub mod store;
pub mod tool_call;

pub use error::{CoreError, Result};
pub use event::SessionEvent;
pub use message::{
    map_finish_reason, CacheControl, FinishReason, FinishRecord, Message, MessagePart,
    ProviderFinishReason, Role, TokenUsage,
};
pub use ports::{LlmProvider, LspManager, MessageStore, ProviderEvent, ProviderStream, SessionStore, TitleGenerator, ToolCatalogue};
pub use run::{ModelCallOptions, QueueEntry, RunState, SessionAgentCall, StepResult, TidyCompression};
pub use session::{SandboxPolicy, Session, SessionConfig, SessionId, SessionStatus, TodoItem};
pub use tool_call::{ToolCall, ToolCallStatus, ToolInfo, ToolResult};
