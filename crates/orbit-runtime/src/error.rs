//! Runtime error types.

use thiserror::Error;

/// A structured error surfaced by a provider mid-stream, distinct from a
/// transport-level failure — carries enough shape for the Error Finalizer
/// to classify it without string-sniffing.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub title: String,
    pub message: String,
    pub status_code: Option<u16>,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("validation error: {0}")]
    Validation(String),

    /// Raised when the stream context is cancelled; the Error Finalizer
    /// always writes a `Cancelled` finish record on `parent_ctx` for this
    /// one, never treats it as a tool/provider failure.
    #[error("run cancelled")]
    Cancelled,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("out of credits")]
    OutOfCredits,

    #[error("provider error: {0:?}")]
    Provider(ProviderError),

    #[error("tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("session error: {0}")]
    Session(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] orbit_core::CoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_display() {
        assert_eq!(RunError::Cancelled.to_string(), "run cancelled");
    }

    #[test]
    fn test_provider_error_display() {
        let err = RunError::Provider(ProviderError {
            title: "rate_limited".into(),
            message: "too many requests".into(),
            status_code: Some(429),
        });
        assert!(err.to_string().contains("too many requests"));
    }

    #[test]
    fn test_tool_failed_display() {
        let err = RunError::ToolFailed {
            tool: "bash".into(),
            message: "exit 1".into(),
        };
        assert_eq!(err.to_string(), "tool 'bash' failed: exit 1");
    }
}
