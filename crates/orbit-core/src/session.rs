use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a session. `Waiting` covers a session parked with a
/// queued prompt while another `Run` is in flight; `Cancelled` is reached
/// only via an explicit `Cancel`/`CancelAll`, never by a provider error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Waiting,
    Running,
    Completed,
    Cancelled,
    Failed { error: String },
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxPolicy {
    pub allowed_paths: Vec<PathBuf>,
    pub command_timeout_secs: u64,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            allowed_paths: Vec::new(),
            command_timeout_secs: 60,
        }
    }
}

impl SandboxPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allowed_path(mut self, path: PathBuf) -> Self {
        self.allowed_paths.push(path);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.command_timeout_secs = secs;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub model: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    pub sandbox_policy: SandboxPolicy,
}

impl SessionConfig {
    pub fn new(model: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            provider: provider.into(),
            max_turns: None,
            sandbox_policy: SandboxPolicy::default(),
        }
    }

    pub fn with_max_turns(mut self, max: u32) -> Self {
        self.max_turns = Some(max);
        self
    }

    pub fn with_sandbox_policy(mut self, policy: SandboxPolicy) -> Self {
        self.sandbox_policy = policy;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub text: String,
    pub done: bool,
}

/// Persisted session state. Token counters and `cost` are last-write-wins
/// per `§4.8` usage accounting — each provider response replaces them
/// rather than adding to a running total, since providers report
/// cumulative-to-date figures for the conversation, not per-step deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub status: SessionStatus,
    pub repo_root: PathBuf,
    pub config: SessionConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_message_id: Option<String>,
    pub todos: Vec<TodoItem>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(repo_root: PathBuf, config: SessionConfig) -> Self {
        Self {
            id: SessionId::new(),
            status: SessionStatus::Active,
            repo_root,
            config,
            title: None,
            summary_message_id: None,
            todos: Vec::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
            cache_read_tokens: 0,
            cache_write_tokens: 0,
            cost: 0.0,
            created_at: Utc::now(),
        }
    }

    pub fn new_continuing(id: SessionId, repo_root: PathBuf, config: SessionConfig) -> Self {
        Self {
            id,
            ..Self::new(repo_root, config)
        }
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, SessionStatus::Active | SessionStatus::Running)
    }

    pub fn start_run(&mut self) {
        self.status = SessionStatus::Running;
    }

    pub fn finish_run(&mut self, status: SessionStatus) {
        self.status = status;
    }

    /// Applies one step's usage report. Token counters and cost replace the
    /// prior value; `Some(cost_override)` (from provider metadata) replaces
    /// the formula-derived figure instead of being added to it.
    pub fn add_llm_usage(
        &mut self,
        prompt_tokens: u64,
        completion_tokens: u64,
        cache_read_tokens: u64,
        cache_write_tokens: u64,
        cost: f64,
    ) {
        self.prompt_tokens = prompt_tokens;
        self.completion_tokens = completion_tokens;
        self.cache_read_tokens = cache_read_tokens;
        self.cache_write_tokens = cache_write_tokens;
        self.cost = cost;
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}
