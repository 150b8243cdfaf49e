//! Message-history preparation: content deduplication, cache-marker
//! placement, and the non-text-tool-result media workaround.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use base64::Engine;
use orbit_core::{Message, MessagePart, Role};
use tracing::warn;

use crate::config::ProviderKind;

const DEDUP_REFERENCE: &str =
    "<file>\n[Content unchanged - see later in conversation for current state]\n</file>";

/// Matches the teacher's `<file>...</file>` view marker, requiring a
/// non-empty body so an empty or malformed tag never collapses.
fn file_view_hash(text: &str) -> Option<u64> {
    let start = text.find("<file>")?;
    let end = text.rfind("</file>")?;
    if end <= start {
        return None;
    }
    let body = &text[start + "<file>".len()..end];
    if body.trim().is_empty() {
        return None;
    }
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    Some(hasher.finish())
}

/// Replaces every occurrence but the last of a repeated `<file>` tool-result
/// body across the whole message list with a fixed reference string.
/// Mutates `messages` in place; returns the number of parts replaced.
pub fn deduplicate_content(messages: &mut [Message]) -> usize {
    let mut occurrences: Vec<(usize, usize, u64)> = Vec::new();

    for (msg_idx, message) in messages.iter().enumerate() {
        for (part_idx, part) in message.parts.iter().enumerate() {
            if let MessagePart::ToolResult(result) = part {
                if let Some(text) = result.output.as_str() {
                    if let Some(hash) = file_view_hash(text) {
                        occurrences.push((msg_idx, part_idx, hash));
                    }
                }
            }
        }
    }

    let mut by_hash: std::collections::HashMap<u64, Vec<(usize, usize)>> =
        std::collections::HashMap::new();
    for (msg_idx, part_idx, hash) in occurrences {
        by_hash.entry(hash).or_default().push((msg_idx, part_idx));
    }

    let mut replaced = 0;
    for positions in by_hash.values() {
        if positions.len() < 2 {
            continue;
        }
        for &(msg_idx, part_idx) in &positions[..positions.len() - 1] {
            if let MessagePart::ToolResult(result) = &mut messages[msg_idx].parts[part_idx] {
                result.output = serde_json::Value::String(DEDUP_REFERENCE.to_string());
                replaced += 1;
            }
        }
    }

    replaced
}

/// Annotates the outgoing message list with cache-control markers: the last
/// system message, the first user message when a summary is present, and
/// the trailing `k` messages (`k = 1` with a summary, else `2`). Skips all
/// marking when prompt-cache is disabled.
pub fn place_cache_markers(messages: &mut [Message], has_summary: bool, disable_cache: bool) {
    if disable_cache || messages.is_empty() {
        return;
    }

    for message in messages.iter_mut() {
        message.cache_marked_parts.clear();
    }

    if let Some(idx) = messages
        .iter()
        .enumerate()
        .rev()
        .find(|(_, m)| m.role == Role::System)
        .map(|(i, _)| i)
    {
        mark_last_part(&mut messages[idx]);
    }

    if has_summary {
        if let Some(idx) = messages.iter().position(|m| m.role == Role::User) {
            mark_last_part(&mut messages[idx]);
        }
    }

    let k = if has_summary { 1 } else { 2 };
    let len = messages.len();
    for idx in len.saturating_sub(k)..len {
        mark_last_part(&mut messages[idx]);
    }
}

fn mark_last_part(message: &mut Message) {
    if message.parts.is_empty() {
        return;
    }
    let last = message.parts.len() - 1;
    if !message.cache_marked_parts.contains(&last) {
        message.cache_marked_parts.push(last);
    }
}

const MEDIA_PLACEHOLDER: &str = "[Image/media content loaded - see attached file]";

/// For providers lacking native tool-result media support: strips inline
/// media out of the tool-result part and re-homes it as a synthetic
/// follow-up user attachment, so the provider only ever sees text in the
/// tool-result slot.
pub fn apply_media_workaround(messages: &mut Vec<Message>, provider: &ProviderKind) {
    if !provider.needs_media_workaround() {
        return;
    }

    let mut insertions: Vec<(usize, Message)> = Vec::new();

    for (idx, message) in messages.iter_mut().enumerate() {
        let mut attachment: Option<MessagePart> = None;

        for part in &mut message.parts {
            if let MessagePart::ToolResult(result) = part {
                if let (Some(mime), Some(data)) = (result.mime_type.clone(), result.data.clone())
                {
                    if base64::engine::general_purpose::STANDARD
                        .decode(&data)
                        .is_err()
                    {
                        warn!("media workaround: invalid base64 payload, leaving message untouched");
                        continue;
                    }
                    let filename = format!("tool-result-{}", result.tool_call_id);
                    attachment = Some(MessagePart::FileAttachment {
                        mime_type: mime,
                        data,
                        filename: Some(filename),
                    });
                    result.output = serde_json::Value::String(MEDIA_PLACEHOLDER.to_string());
                    result.mime_type = None;
                    result.data = None;
                }
            }
        }

        if let Some(attachment) = attachment {
            let mut follow_up = Message::user(
                format!("{}-media", message.id),
                message.session_id.clone(),
            );
            follow_up = follow_up
                .with_part(MessagePart::text(
                    "Here is the media content from the tool result:",
                ))
                .with_part(attachment);
            insertions.push((idx + 1, follow_up));
        }
    }

    for (offset, (idx, follow_up)) in insertions.into_iter().enumerate() {
        messages.insert(idx + offset, follow_up);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_core::ToolResult;

    fn file_view_message(id: &str, body: &str) -> Message {
        Message::assistant(id, "s1").with_part(MessagePart::ToolResult(ToolResult::success(
            "t1",
            serde_json::Value::String(format!("<file>\n{body}\n</file>")),
            5,
        )))
    }

    #[test]
    fn test_dedup_keeps_last_occurrence() {
        let mut messages = vec![
            file_view_message("m1", "old content"),
            file_view_message("m2", "old content"),
            file_view_message("m3", "old content"),
        ];
        let replaced = deduplicate_content(&mut messages);
        assert_eq!(replaced, 2);
        assert!(messages[0].parts[0]
            .tool_call_id()
            .is_some());
        for msg in &messages[..2] {
            if let MessagePart::ToolResult(r) = &msg.parts[0] {
                assert_eq!(r.output.as_str().unwrap(), DEDUP_REFERENCE);
            }
        }
        if let MessagePart::ToolResult(r) = &messages[2].parts[0] {
            assert!(r.output.as_str().unwrap().contains("old content"));
        }
    }

    #[test]
    fn test_dedup_idempotent() {
        let mut messages = vec![
            file_view_message("m1", "same"),
            file_view_message("m2", "same"),
        ];
        deduplicate_content(&mut messages);
        let after_first: Vec<_> = messages
            .iter()
            .map(|m| serde_json::to_string(m).unwrap())
            .collect();
        deduplicate_content(&mut messages);
        let after_second: Vec<_> = messages
            .iter()
            .map(|m| serde_json::to_string(m).unwrap())
            .collect();
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn test_dedup_ignores_unique_content() {
        let mut messages = vec![
            file_view_message("m1", "unique one"),
            file_view_message("m2", "unique two"),
        ];
        assert_eq!(deduplicate_content(&mut messages), 0);
    }

    #[test]
    fn test_cache_markers_no_summary() {
        let mut messages = vec![
            Message::system("sys", "s1").with_part(MessagePart::text("system prompt")),
            Message::user("u1", "s1").with_part(MessagePart::text("hi")),
            Message::assistant("a1", "s1").with_part(MessagePart::text("hello")),
            Message::user("u2", "s1").with_part(MessagePart::text("bye")),
        ];
        place_cache_markers(&mut messages, false, false);
        assert_eq!(messages[0].cache_marked_parts, vec![0]);
        // last 2 messages marked
        assert_eq!(messages[2].cache_marked_parts, vec![0]);
        assert_eq!(messages[3].cache_marked_parts, vec![0]);
        assert!(messages[1].cache_marked_parts.is_empty());
    }

    #[test]
    fn test_cache_markers_with_summary_marks_first_user() {
        let mut messages = vec![
            Message::system("sys", "s1").with_part(MessagePart::text("system prompt")),
            Message::user("u1", "s1").with_part(MessagePart::text("summary text")),
            Message::assistant("a1", "s1").with_part(MessagePart::text("hello")),
        ];
        place_cache_markers(&mut messages, true, false);
        assert_eq!(messages[1].cache_marked_parts, vec![0]);
        // k=1 with summary: only the last message also marked
        assert_eq!(messages[2].cache_marked_parts, vec![0]);
    }

    #[test]
    fn test_cache_markers_disabled() {
        let mut messages = vec![Message::system("sys", "s1").with_part(MessagePart::text("x"))];
        place_cache_markers(&mut messages, false, true);
        assert!(messages[0].cache_marked_parts.is_empty());
    }

    #[test]
    fn test_media_workaround_bypassed_for_native_provider() {
        let mut messages = vec![Message::assistant("a1", "s1").with_part(MessagePart::ToolResult(
            ToolResult::success("t1", serde_json::json!({}), 1).with_media("image/png", "aGVsbG8="),
        ))];
        apply_media_workaround(&mut messages, &ProviderKind::Anthropic);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_media_workaround_rehomes_media() {
        let mut messages = vec![Message::assistant("a1", "s1").with_part(MessagePart::ToolResult(
            ToolResult::success("t1", serde_json::json!({}), 1).with_media("image/png", "aGVsbG8="),
        ))];
        apply_media_workaround(&mut messages, &ProviderKind::Ollama);
        assert_eq!(messages.len(), 2);
        if let MessagePart::ToolResult(r) = &messages[0].parts[0] {
            assert_eq!(r.output.as_str().unwrap(), MEDIA_PLACEHOLDER);
            assert!(r.mime_type.is_none());
        }
        assert!(messages[1].parts.iter().any(|p| matches!(
            p,
            MessagePart::FileAttachment { filename: Some(f), .. } if f == "tool-result-t1"
        )));
    }
}
