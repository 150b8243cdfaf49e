//! Stop-condition evaluation: auto-summarize threshold and repeated
//! tool-call loop detection. Both are pure predicates over accumulated step
//! results so they can be unit-tested without a running stream.

use orbit_core::{ProviderFinishReason, StepResult};

use crate::config::RunnerConfig;

/// Auto-summarize fires once the remaining context window drops to or below
/// `RunnerConfig::summarize_threshold_tokens()`. `used` is
/// `session.PromptTokens + session.CompletionTokens` after the step that
/// just finished.
pub fn should_auto_summarize(config: &RunnerConfig, used: u64) -> bool {
    if config.disable_auto_summarize {
        return false;
    }
    let remaining = config.context_limit.saturating_sub(used);
    remaining <= config.summarize_threshold_tokens()
}

/// A tool-call "signature" for loop detection: name plus serialized args.
/// Two calls with the same signature are considered a repeat regardless of
/// call id.
fn tool_call_signature(result: &StepResult) -> Option<String> {
    result
        .provider_metadata
        .get("last_tool_call")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// True if the last `window` step results contain the same tool-call
/// signature at least `repeats` times consecutively, counting from the
/// most recent step backwards.
pub fn detect_tool_call_loop(history: &[StepResult], window: usize, repeats: usize) -> bool {
    if history.len() < window || window == 0 || repeats == 0 {
        return false;
    }

    let tail = &history[history.len() - window..];
    let signatures: Vec<Option<String>> = tail.iter().map(tool_call_signature).collect();

    let Some(last) = signatures.last().cloned().flatten() else {
        return false;
    };

    let mut run = 0;
    for sig in signatures.iter().rev() {
        if sig.as_deref() == Some(last.as_str()) {
            run += 1;
        } else {
            break;
        }
    }
    run >= repeats
}

/// Convenience used by the Stream Runner: true if the step's finish reason
/// leaves unfinished tool calls pending on the wire (tool-calls), which
/// matters when `ShouldSummarize` fires mid tool-use so a continuation
/// prompt can be synthesized.
pub fn finished_with_tool_calls(result: &StepResult) -> bool {
    result.finish_reason == ProviderFinishReason::ToolCalls
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn step(reason: ProviderFinishReason) -> StepResult {
        StepResult {
            finish_reason: reason,
            prompt_tokens: 0,
            completion_tokens: 0,
            cache_read_tokens: 0,
            cache_write_tokens: 0,
            provider_metadata: serde_json::Value::Null,
        }
    }

    fn step_with_sig(sig: &str) -> StepResult {
        StepResult {
            finish_reason: ProviderFinishReason::ToolCalls,
            prompt_tokens: 0,
            completion_tokens: 0,
            cache_read_tokens: 0,
            cache_write_tokens: 0,
            provider_metadata: serde_json::json!({ "last_tool_call": sig }),
        }
    }

    #[test]
    fn test_auto_summarize_large_window_scenario_8() {
        let config = RunnerConfig::new(PathBuf::from("/repo")).with_context_limit(10_000);
        assert_eq!(config.summarize_threshold_tokens(), 2_000);
        assert!(should_auto_summarize(&config, 8_001));
        assert!(!should_auto_summarize(&config, 7_000));
    }

    #[test]
    fn test_auto_summarize_disabled() {
        let config = RunnerConfig::new(PathBuf::from("/repo"))
            .with_context_limit(10_000)
            .with_disable_auto_summarize(true);
        assert!(!should_auto_summarize(&config, 9_999));
    }

    #[test]
    fn test_loop_detection_fires_on_repeats() {
        let history = vec![
            step_with_sig("bash:{}"),
            step_with_sig("bash:{}"),
            step_with_sig("bash:{}"),
        ];
        assert!(detect_tool_call_loop(&history, 3, 3));
    }

    #[test]
    fn test_loop_detection_not_enough_history() {
        let history = vec![step_with_sig("bash:{}"), step_with_sig("bash:{}")];
        assert!(!detect_tool_call_loop(&history, 3, 3));
    }

    #[test]
    fn test_loop_detection_ignores_non_repeating() {
        let history = vec![
            step_with_sig("bash:{}"),
            step_with_sig("grep:{}"),
            step_with_sig("bash:{}"),
        ];
        assert!(!detect_tool_call_loop(&history, 3, 3));
    }

    #[test]
    fn test_finished_with_tool_calls() {
        assert!(finished_with_tool_calls(&step(ProviderFinishReason::ToolCalls)));
        assert!(!finished_with_tool_calls(&step(ProviderFinishReason::Stop)));
    }
}
