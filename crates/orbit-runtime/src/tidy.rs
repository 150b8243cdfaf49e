//! Long-Output Tidier: identifies bulky old tool outputs and replaces them
//! with a subagent-produced summary, applied lazily (only when building the
//! next outgoing prompt, never rewriting the persisted message) via a
//! `TidyCompression` map threaded through `RunState`.

use std::sync::Arc;

use orbit_core::{LlmProvider, Message, MessagePart, ModelCallOptions, TidyCompression};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Fixed template asked of the provider when compressing one tool output.
/// Prompt engineering here is intentionally unremarkable: one output, one
/// short summary, nothing session-specific.
pub const TIDY_PROMPT: &str = "Summarize the following tool output in under 200 words, \
keeping any information a later step would need to continue the task:\n\n";

/// Above this many bytes a tool-result's text output is a tidy candidate.
pub const BULKY_OUTPUT_THRESHOLD_BYTES: usize = 4096;

/// Returns tool-call ids whose tool-result output exceeds `threshold_bytes`,
/// excluding ids already compressed and excluding any tool result that
/// belongs to the last message in `messages` (the step just finished is
/// never "old" yet).
pub fn identify_bulky_outputs(
    messages: &[Message],
    threshold_bytes: usize,
    already_compressed: &TidyCompression,
) -> Vec<String> {
    let last_idx = messages.len().saturating_sub(1);
    let mut found = Vec::new();

    for (idx, message) in messages.iter().enumerate() {
        if idx == last_idx {
            continue;
        }
        for part in &message.parts {
            if let MessagePart::ToolResult(result) = part {
                if already_compressed.contains_key(&result.tool_call_id) {
                    continue;
                }
                if let Some(text) = result.output.as_str() {
                    if text.len() > threshold_bytes {
                        found.push(result.tool_call_id.clone());
                    }
                }
            }
        }
    }

    found
}

/// Calls the provider once to compress a single tool output's text.
pub async fn compress_tool_output(
    provider: &Arc<dyn LlmProvider>,
    ctx: CancellationToken,
    model: &str,
    output: &str,
) -> Result<String> {
    let prompt = Message::user("tidy-request", "tidy").with_part(MessagePart::text(format!(
        "{TIDY_PROMPT}{output}"
    )));
    let summary = provider
        .complete(ctx, model, &[prompt], &ModelCallOptions::default())
        .await?;
    Ok(summary)
}

/// Rewrites any tool-result part whose id is a key in `compression` to carry
/// the replacement summary text instead of the original output. Operates on
/// the outgoing wire copy only — never called on the persisted history.
pub fn apply_tidy_compression(messages: &mut [Message], compression: &TidyCompression) {
    if compression.is_empty() {
        return;
    }
    for message in messages.iter_mut() {
        for part in message.parts.iter_mut() {
            if let MessagePart::ToolResult(result) = part {
                if let Some(summary) = compression.get(&result.tool_call_id) {
                    result.output = serde_json::Value::String(summary.clone());
                    result.mime_type = None;
                    result.data = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_core::ToolResult;
    use std::collections::HashMap;

    fn bulky_message(id: &str, call_id: &str, len: usize) -> Message {
        Message::assistant(id, "s1").with_part(MessagePart::ToolResult(ToolResult::success(
            call_id,
            serde_json::Value::String("x".repeat(len)),
            5,
        )))
    }

    #[test]
    fn test_identify_bulky_outputs_skips_last_message() {
        let messages = vec![
            bulky_message("m1", "t1", 5000),
            bulky_message("m2", "t2", 5000),
        ];
        let found = identify_bulky_outputs(&messages, BULKY_OUTPUT_THRESHOLD_BYTES, &HashMap::new());
        assert_eq!(found, vec!["t1".to_string()]);
    }

    #[test]
    fn test_identify_bulky_outputs_skips_small_and_already_compressed() {
        let messages = vec![
            bulky_message("m1", "t1", 100),
            bulky_message("m2", "t2", 5000),
            bulky_message("m3", "t3", 5000),
        ];
        let mut already = HashMap::new();
        already.insert("t2".to_string(), "summary".to_string());
        let found = identify_bulky_outputs(&messages, BULKY_OUTPUT_THRESHOLD_BYTES, &already);
        assert!(found.is_empty());
    }

    #[test]
    fn test_apply_tidy_compression_rewrites_matching_output() {
        let mut messages = vec![bulky_message("m1", "t1", 5000)];
        let mut compression = HashMap::new();
        compression.insert("t1".to_string(), "short summary".to_string());
        apply_tidy_compression(&mut messages, &compression);
        if let MessagePart::ToolResult(r) = &messages[0].parts[0] {
            assert_eq!(r.output.as_str().unwrap(), "short summary");
        } else {
            panic!("expected tool result part");
        }
    }

    #[test]
    fn test_apply_tidy_compression_noop_when_empty() {
        let mut messages = vec![bulky_message("m1", "t1", 100)];
        apply_tidy_compression(&mut messages, &HashMap::new());
        if let MessagePart::ToolResult(r) = &messages[0].parts[0] {
            assert_eq!(r.output.as_str().unwrap().len(), 100);
        } else {
            panic!("expected tool result part");
        }
    }
}
