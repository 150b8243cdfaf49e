//! Runtime configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use orbit_core::SandboxPolicy;

/// LLM provider selection, used only to pick which reasoning-signature and
/// media-support quirks apply — the wire protocol itself lives behind
/// `orbit_core::LlmProvider`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    #[default]
    Anthropic,
    OpenAI,
    Ollama,
    ZAI,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAI => "openai",
            ProviderKind::Ollama => "ollama",
            ProviderKind::ZAI => "zai",
        }
    }

    /// Providers that cannot accept non-text tool-result payloads inline;
    /// the media workaround re-homes them into a synthetic user message.
    pub fn needs_media_workaround(&self) -> bool {
        matches!(self, ProviderKind::Ollama | ProviderKind::ZAI)
    }

    /// Whether the provider's vision models accept inline image attachments.
    pub fn supports_images(&self) -> bool {
        matches!(self, ProviderKind::Anthropic | ProviderKind::OpenAI)
    }
}

impl FromStr for ProviderKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAI),
            "ollama" => Ok(ProviderKind::Ollama),
            "zai" | "z.ai" => Ok(ProviderKind::ZAI),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Engine-wide configuration. One instance is shared across all sessions a
/// `SessionAgent` serves; per-call overrides live in `ModelCallOptions`.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub model: String,
    pub provider: ProviderKind,
    pub max_turns: Option<u32>,
    pub context_limit: u64,
    pub max_tokens: u32,
    pub sandbox: SandboxPolicy,
    pub repo_root: PathBuf,

    /// Context fraction above which auto-summarize becomes eligible once
    /// the window is "large" (see `large_context_window_threshold`).
    pub large_context_window_threshold: u64,
    pub large_context_window_buffer: u64,
    pub small_context_window_ratio: f64,

    pub loop_window_size: usize,
    pub loop_max_repeats: usize,

    pub keep_alive_interval: Duration,

    pub disable_auto_summarize: bool,
    pub disable_prompt_cache: bool,

    /// URL surfaced in the out-of-credits finish record's details.
    pub credits_billing_url: String,
}

impl RunnerConfig {
    pub fn new(repo_root: PathBuf) -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            provider: ProviderKind::default(),
            max_turns: None,
            context_limit: 200_000,
            max_tokens: 8192,
            sandbox: SandboxPolicy::default(),
            repo_root,
            large_context_window_threshold: 200_000,
            large_context_window_buffer: 20_000,
            small_context_window_ratio: 0.2,
            loop_window_size: 6,
            loop_max_repeats: 3,
            keep_alive_interval: Duration::from_secs(4 * 60 + 30),
            disable_auto_summarize: false,
            disable_prompt_cache: false,
            credits_billing_url: "https://example.com/billing".to_string(),
        }
    }

    pub fn with_credits_billing_url(mut self, url: impl Into<String>) -> Self {
        self.credits_billing_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_max_turns(mut self, max: u32) -> Self {
        self.max_turns = Some(max);
        self
    }

    pub fn with_context_limit(mut self, limit: u64) -> Self {
        self.context_limit = limit;
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxPolicy) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_disable_auto_summarize(mut self, disabled: bool) -> Self {
        self.disable_auto_summarize = disabled;
        self
    }

    pub fn with_disable_prompt_cache(mut self, disabled: bool) -> Self {
        self.disable_prompt_cache = disabled;
        self
    }

    /// Returns the remaining-context threshold below which auto-summarize
    /// fires: for a "large" window (> `large_context_window_threshold`) a
    /// fixed `large_context_window_buffer` tokens of headroom; for a window
    /// at or below that threshold a `small_context_window_ratio` fraction of
    /// the whole window, since a fixed buffer would be too small relative to
    /// the window to be useful. Compared against `context_limit - used` by
    /// the caller.
    pub fn summarize_threshold_tokens(&self) -> u64 {
        if self.context_limit > self.large_context_window_threshold {
            self.large_context_window_buffer
        } else {
            (self.context_limit as f64 * self.small_context_window_ratio) as u64
        }
    }

    pub fn from_env(repo_root: PathBuf) -> Self {
        let mut config = Self::new(repo_root);

        if let Ok(model) = std::env::var("ORBIT_MODEL") {
            config.model = model;
        }

        if let Ok(provider_str) = std::env::var("ORBIT_PROVIDER") {
            if let Ok(provider) = provider_str.parse::<ProviderKind>() {
                config.provider = provider;
            }
        } else if std::env::var("ZAI_API_KEY").is_ok() {
            config.provider = ProviderKind::ZAI;
        } else if std::env::var("OPENAI_API_KEY").is_ok() {
            config.provider = ProviderKind::OpenAI;
        } else if std::env::var("ANTHROPIC_API_KEY").is_ok() {
            config.provider = ProviderKind::Anthropic;
        }

        if let Ok(max_turns) = std::env::var("ORBIT_MAX_TURNS") {
            if let Ok(val) = max_turns.parse::<u32>() {
                config.max_turns = Some(val);
            }
        }

        if let Ok(limit) = std::env::var("ORBIT_CONTEXT_LIMIT") {
            if let Ok(val) = limit.parse::<u64>() {
                config.context_limit = val;
            }
        }

        if let Ok(max_tokens) = std::env::var("ORBIT_MAX_TOKENS") {
            if let Ok(val) = max_tokens.parse::<u32>() {
                config.max_tokens = val;
            }
        }

        if std::env::var("ORBIT_DISABLE_AUTO_SUMMARIZE").is_ok() {
            config.disable_auto_summarize = true;
        }

        if std::env::var("ORBIT_DISABLE_PROMPT_CACHE").is_ok() {
            config.disable_prompt_cache = true;
        }

        if let Ok(url) = std::env::var("ORBIT_BILLING_URL") {
            config.credits_billing_url = url;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_from_str() {
        assert_eq!("anthropic".parse(), Ok(ProviderKind::Anthropic));
        assert_eq!("ANTHROPIC".parse(), Ok(ProviderKind::Anthropic));
        assert_eq!("z.ai".parse(), Ok(ProviderKind::ZAI));
        assert!("unknown".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_needs_media_workaround() {
        assert!(ProviderKind::ZAI.needs_media_workaround());
        assert!(!ProviderKind::Anthropic.needs_media_workaround());
    }

    #[test]
    fn test_supports_images() {
        assert!(ProviderKind::Anthropic.supports_images());
        assert!(!ProviderKind::Ollama.supports_images());
    }

    #[test]
    fn test_runner_config_new_defaults() {
        let config = RunnerConfig::new(PathBuf::from("/repo"));
        assert_eq!(config.model, "claude-sonnet-4-20250514");
        assert_eq!(config.context_limit, 200_000);
        assert_eq!(config.loop_window_size, 6);
        assert_eq!(config.loop_max_repeats, 3);
    }

    #[test]
    fn test_summarize_threshold_at_threshold_uses_ratio() {
        let config = RunnerConfig::new(PathBuf::from("/repo")).with_context_limit(200_000);
        assert_eq!(config.summarize_threshold_tokens(), 40_000);
    }

    #[test]
    fn test_summarize_threshold_large_window() {
        let config = RunnerConfig::new(PathBuf::from("/repo")).with_context_limit(200_001);
        assert_eq!(config.summarize_threshold_tokens(), 20_000);
    }

    #[test]
    fn test_summarize_threshold_small_window() {
        let config = RunnerConfig::new(PathBuf::from("/repo")).with_context_limit(50_000);
        assert_eq!(config.summarize_threshold_tokens(), 10_000);
    }

    #[test]
    fn test_runner_config_builder() {
        let config = RunnerConfig::new(PathBuf::from("/repo"))
            .with_model("gpt-4")
            .with_provider(ProviderKind::OpenAI)
            .with_max_turns(10)
            .with_max_tokens(16384);
        assert_eq!(config.model, "gpt-4");
        assert_eq!(config.provider, ProviderKind::OpenAI);
        assert_eq!(config.max_turns, Some(10));
        assert_eq!(config.max_tokens, 16384);
    }
}
