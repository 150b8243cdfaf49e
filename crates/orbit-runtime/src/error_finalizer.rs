//! Error Finalizer: repairs the current assistant message after a failed or
//! cancelled stream so it never carries orphan streaming state. Always
//! writes on `parent_ctx` — callers must invoke this after, not during, a
//! `streamCtx`-scoped cancellation so the repair writes are not themselves
//! cancelled.

use orbit_core::{
    FinishRecord, FinishReason, Message, MessagePart, SessionId, ToolCallStatus, ToolResult,
};

use crate::error::RunError;
use crate::step_handler::StepHandler;

const COPILOT_NOT_SUPPORTED: &str = "The requested model is not supported.";

fn tool_execution_error_text(err: &RunError) -> &'static str {
    match err {
        RunError::Cancelled => "Tool execution canceled by user",
        RunError::PermissionDenied(_) => "User denied permission",
        _ => "There was an error while executing the tool",
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn derive_finish_record(err: &RunError, model: &str, billing_url: &str) -> FinishRecord {
    match err {
        RunError::Cancelled => {
            FinishRecord::new(FinishReason::Cancelled).with_title("User canceled request")
        }
        RunError::PermissionDenied(_) => {
            FinishRecord::new(FinishReason::PermissionDenied).with_title("User denied permission")
        }
        RunError::OutOfCredits => FinishRecord::new(FinishReason::Error)
            .with_title("No credits")
            .with_details(format!("You're out of credits. Add more at {billing_url}")),
        RunError::Provider(provider_err) if provider_err.message == COPILOT_NOT_SUPPORTED => {
            FinishRecord::new(FinishReason::Error)
                .with_title("Copilot model not enabled")
                .with_details(format!(
                    "The model '{model}' is not enabled for this Copilot account. Enable it at \
                     https://github.com/settings/copilot",
                ))
        }
        RunError::Provider(provider_err) => FinishRecord::new(FinishReason::Error)
            .with_title(capitalize(&provider_err.title))
            .with_details(provider_err.message.clone()),
        other => FinishRecord::new(FinishReason::Error)
            .with_title("Provider Error")
            .with_details(other.to_string()),
    }
}

/// Implements spec §4.4 steps 1-5. Returns `Ok(())` once the repair writes
/// have been persisted (or immediately if there was no current assistant);
/// the caller always re-returns the original `err` to its own caller
/// regardless of this function's outcome.
pub async fn finalize_error(
    handler: &mut StepHandler,
    err: &RunError,
    model: &str,
    billing_url: &str,
) -> crate::error::Result<()> {
    let Some(assistant) = handler.current_assistant_mut() else {
        return Ok(());
    };

    assistant.finish_thinking();

    let mut synthesized_results = Vec::new();
    for part in &mut assistant.parts {
        if let MessagePart::ToolCall(call) = part {
            if call.status != ToolCallStatus::Finished {
                call.status = ToolCallStatus::Finished;
                call.args = serde_json::Value::Object(Default::default());
                synthesized_results.push(call.id.clone());
            }
        }
    }

    let session_id = assistant.session_id.clone();
    let assistant_has_result: std::collections::HashSet<String> = assistant
        .parts
        .iter()
        .filter_map(|p| match p {
            MessagePart::ToolResult(r) => Some(r.tool_call_id.clone()),
            _ => None,
        })
        .collect();

    let all_messages = handler
        .message_store()
        .list(&SessionId(session_id.clone()))
        .await?;
    let has_result_elsewhere = |id: &str| {
        all_messages.iter().any(|m| {
            m.parts
                .iter()
                .any(|p| matches!(p, MessagePart::ToolResult(r) if r.tool_call_id == id))
        })
    };

    let error_text = tool_execution_error_text(err);
    for call_id in synthesized_results {
        if assistant_has_result.contains(&call_id) || has_result_elsewhere(&call_id) {
            continue;
        }
        let result = ToolResult::error(
            call_id.clone(),
            serde_json::Value::String(error_text.to_string()),
            0,
        );
        let tool_message = Message::assistant(
            format!("{}-tool-error", uuid::Uuid::new_v4()),
            session_id.clone(),
        )
        .with_part(MessagePart::ToolResult(result));
        handler.message_store().create(tool_message).await?;
    }

    let finish = derive_finish_record(err, model, billing_url);
    handler
        .current_assistant_mut()
        .expect("checked above")
        .add_finish(finish);

    let assistant = handler.current_assistant_mut().expect("checked above").clone();
    handler.message_store().update(assistant).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;

    #[test]
    fn test_tool_execution_error_text_cancelled() {
        assert_eq!(
            tool_execution_error_text(&RunError::Cancelled),
            "Tool execution canceled by user"
        );
    }

    const TEST_MODEL: &str = "claude-sonnet-4-20250514";
    const TEST_BILLING_URL: &str = "https://example.com/billing";

    #[test]
    fn test_derive_finish_record_cancelled() {
        let record = derive_finish_record(&RunError::Cancelled, TEST_MODEL, TEST_BILLING_URL);
        assert_eq!(record.reason, FinishReason::Cancelled);
        assert_eq!(record.title.as_deref(), Some("User canceled request"));
    }

    #[test]
    fn test_derive_finish_record_permission_denied() {
        let record = derive_finish_record(
            &RunError::PermissionDenied("bash".into()),
            TEST_MODEL,
            TEST_BILLING_URL,
        );
        assert_eq!(record.reason, FinishReason::PermissionDenied);
        assert_eq!(record.title.as_deref(), Some("User denied permission"));
    }

    #[test]
    fn test_derive_finish_record_out_of_credits() {
        let record = derive_finish_record(&RunError::OutOfCredits, TEST_MODEL, TEST_BILLING_URL);
        assert_eq!(record.title.as_deref(), Some("No credits"));
        assert!(record.details.as_ref().unwrap().contains("out of credits"));
        assert!(record.details.unwrap().contains(TEST_BILLING_URL));
    }

    #[test]
    fn test_derive_finish_record_copilot_special_case() {
        let err = RunError::Provider(ProviderError {
            title: "model_not_found".into(),
            message: COPILOT_NOT_SUPPORTED.to_string(),
            status_code: Some(400),
        });
        let record = derive_finish_record(&err, TEST_MODEL, TEST_BILLING_URL);
        assert_eq!(record.title.as_deref(), Some("Copilot model not enabled"));
        assert!(record.details.unwrap().contains(TEST_MODEL));
    }

    #[test]
    fn test_derive_finish_record_generic_provider_error() {
        let err = RunError::Provider(ProviderError {
            title: "rate_limited".into(),
            message: "Too many requests".into(),
            status_code: Some(429),
        });
        let record = derive_finish_record(&err, TEST_MODEL, TEST_BILLING_URL);
        assert_eq!(record.title.as_deref(), Some("Rate_limited"));
        assert_eq!(record.details.as_deref(), Some("Too many requests"));
    }
}
