//! Usage accounting: per-step cost derivation and the session counter
//! update, kept as pure functions so the replacement-not-addition rule in
//! `Session::add_llm_usage` is easy to test in isolation from a live run.

use orbit_core::{Session, StepResult};

use crate::config::ProviderKind;

/// Per-million-token pricing for one model. Populated by the caller (a
/// pricing table keyed by model name is out of scope here); this crate only
/// applies the formula.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_read_per_million: f64,
    pub cache_write_per_million: f64,
}

/// `cost = cacheCreation*cCachedIn/1e6 + cacheRead*cCachedOut/1e6 +
/// input*cIn/1e6 + output*cOut/1e6`, forced to zero for the Claude-Code
/// provider, and overridden entirely when the provider reports its own cost
/// in `provider_metadata.cost`.
pub fn compute_step_cost(provider: &ProviderKind, pricing: &ModelPricing, step: &StepResult) -> f64 {
    if matches!(provider, ProviderKind::Anthropic) && is_claude_code(step) {
        return 0.0;
    }

    if let Some(override_cost) = step
        .provider_metadata
        .get("cost")
        .and_then(|v| v.as_f64())
    {
        return override_cost;
    }

    step.cache_write_tokens as f64 * pricing.cache_write_per_million / 1e6
        + step.cache_read_tokens as f64 * pricing.cache_read_per_million / 1e6
        + step.prompt_tokens as f64 * pricing.input_per_million / 1e6
        + step.completion_tokens as f64 * pricing.output_per_million / 1e6
}

fn is_claude_code(step: &StepResult) -> bool {
    step.provider_metadata
        .get("client")
        .and_then(|v| v.as_str())
        == Some("claude-code")
}

/// Applies one step's usage to the session: token counters and cost are
/// last-write-wins per step, never accumulated — see `Session::add_llm_usage`.
/// `PromptTokens` is `inputTokens + cacheReadTokens` per the formula, since a
/// cache-read prefix still counts against the prompt side of the window.
pub fn update_session_usage(
    session: &mut Session,
    provider: &ProviderKind,
    pricing: &ModelPricing,
    step: &StepResult,
) {
    let cost = compute_step_cost(provider, pricing, step);
    let prompt_tokens = step.prompt_tokens + step.cache_read_tokens;
    session.add_llm_usage(
        prompt_tokens,
        step.completion_tokens,
        step.cache_read_tokens,
        step.cache_write_tokens,
        cost,
    );
}
