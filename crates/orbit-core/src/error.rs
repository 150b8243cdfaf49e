use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("session error: {0}")]
    Session(String),

    #[error("message error: {0}")]
    Message(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error() {
        let err = CoreError::Session("test session error".to_string());
        assert_eq!(err.to_string(), "session error: test session error");
    }

    #[test]
    fn test_tool_error() {
        let err = CoreError::Tool("bash failed".to_string());
        assert_eq!(err.to_string(), "tool error: bash failed");
    }

    #[test]
    fn test_not_found_error() {
        let err = CoreError::NotFound("message msg-1".to_string());
        assert_eq!(err.to_string(), "not found: message msg-1");
    }

    #[test]
    fn test_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = CoreError::from(io_err);
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json");
        let err = CoreError::from(json_err.unwrap_err());
        assert!(err.to_string().contains("expected value"));
    }
}
