//! Stream Runner: drives one provider stream to completion, translating
//! each `ProviderEvent` into a `StepHandler` callback and evaluating stop
//! conditions once the step finishes.

use std::sync::Arc;

use futures::StreamExt;
use orbit_core::{
    LlmProvider, ModelCallOptions, Message, RunState, Session, StepResult, ToolCall,
    ToolCallStatus, ToolCatalogue, ToolInfo,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RunnerConfig;
use crate::error::{ProviderError, RunError, Result};
use crate::queue::SessionQueues;
use crate::step_handler::StepHandler;
use crate::stop::{detect_tool_call_loop, should_auto_summarize};

pub struct StepOutcome {
    pub result: StepResult,
    pub should_summarize: bool,
    pub finished_with_tool_calls: bool,
}

pub struct StreamRunner {
    llm_provider: Arc<dyn LlmProvider>,
    tool_catalogue: Option<Arc<dyn ToolCatalogue>>,
    config: RunnerConfig,
}

impl StreamRunner {
    pub fn new(
        llm_provider: Arc<dyn LlmProvider>,
        tool_catalogue: Option<Arc<dyn ToolCatalogue>>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            llm_provider,
            tool_catalogue,
            config,
        }
    }

    /// Invokes the provider stream exactly once, routing every event
    /// through `handler`'s callbacks in the order received. `session` is
    /// reloaded by the caller before each call so usage stop conditions see
    /// up-to-date counters.
    pub async fn run_step(
        &self,
        _parent_ctx: &CancellationToken,
        stream_ctx: &CancellationToken,
        run_state: &mut RunState,
        handler: &mut StepHandler,
        session: &Session,
        queues: &SessionQueues,
        system_prompt: &str,
        template_context: Option<&str>,
        tools: &[ToolInfo],
        options: &ModelCallOptions,
        step_history: &[StepResult],
    ) -> Result<StepOutcome> {
        let prepared = handler
            .prepare_step(session, run_state, queues, system_prompt, template_context, &self.config)
            .await?;

        let mut stream = self
            .llm_provider
            .stream(
                stream_ctx.clone(),
                &self.config.model,
                &prepared.messages,
                system_prompt,
                tools,
                options,
            )
            .await?;

        let mut pending_calls: Vec<ToolCall> = Vec::new();

        while let Some(event) = stream.next().await {
            if stream_ctx.is_cancelled() {
                return Err(RunError::Cancelled);
            }

            match event {
                orbit_core::ProviderEvent::Start => {}
                orbit_core::ProviderEvent::ReasoningStart { .. } => {
                    handler.on_reasoning_start()?;
                }
                orbit_core::ProviderEvent::ReasoningDelta { delta, .. } => {
                    handler.on_reasoning_delta(&delta)?;
                }
                orbit_core::ProviderEvent::ReasoningEnd { .. } => {
                    handler.on_reasoning_end(&serde_json::Value::Null)?;
                }
                orbit_core::ProviderEvent::TextDelta { delta } => {
                    handler.on_text_delta(&delta)?;
                }
                orbit_core::ProviderEvent::ToolInputStart { id, name } => {
                    handler.on_tool_input_start(&id, &name)?;
                }
                orbit_core::ProviderEvent::ToolCall { call } => {
                    handler.on_tool_call(call.clone())?;
                    if !call.provider_executed {
                        pending_calls.push(call);
                    }
                }
                orbit_core::ProviderEvent::Finish { mut result } => {
                    if let Some(sig) = tool_call_signature_from(&pending_calls) {
                        result.provider_metadata = serde_json::json!({ "last_tool_call": sig });
                    }
                    self.run_pending_tools(stream_ctx, handler, &mut pending_calls)
                        .await?;
                    handler.on_step_finish(run_state, &result).await?;

                    let used = session.prompt_tokens + session.completion_tokens;
                    let should_summarize = should_auto_summarize(&self.config, used);
                    let mut history = step_history.to_vec();
                    history.push(result.clone());
                    let looping = detect_tool_call_loop(
                        &history,
                        self.config.loop_window_size,
                        self.config.loop_max_repeats,
                    );
                    if looping {
                        warn!(session_id = %session.id, "repeated tool-call loop detected");
                    }

                    return Ok(StepOutcome {
                        finished_with_tool_calls: result.finish_reason
                            == orbit_core::ProviderFinishReason::ToolCalls,
                        should_summarize: should_summarize || looping,
                        result,
                    });
                }
                orbit_core::ProviderEvent::Error {
                    title,
                    message,
                    status_code,
                    retryable: _,
                } => {
                    return Err(RunError::Provider(ProviderError {
                        title: title.unwrap_or_else(|| "Provider Error".to_string()),
                        message,
                        status_code,
                    }));
                }
            }
        }

        Err(RunError::Provider(ProviderError {
            title: "Provider Error".to_string(),
            message: "provider stream ended without a finish event".to_string(),
            status_code: None,
        }))
    }

    async fn run_pending_tools(
        &self,
        stream_ctx: &CancellationToken,
        handler: &mut StepHandler,
        pending: &mut Vec<ToolCall>,
    ) -> Result<()> {
        let Some(catalogue) = self.tool_catalogue.clone() else {
            return Ok(());
        };

        for call in pending.drain(..) {
            if stream_ctx.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            let mut call = call;
            call.status = ToolCallStatus::Ready;
            let result = match catalogue.run(stream_ctx.clone(), &call).await {
                Ok(result) => result,
                Err(orbit_core::CoreError::PermissionDenied(msg)) => {
                    return Err(RunError::PermissionDenied(msg));
                }
                Err(err) => return Err(RunError::from(err)),
            };
            handler.on_tool_result(result).await?;
        }
        Ok(())
    }
}

/// Builds the loop-detection signature for the calls dispatched in one step:
/// the last pending call's name plus its serialized arguments, matching the
/// format `stop::tool_call_signature` reads back off `provider_metadata`.
fn tool_call_signature_from(pending: &[ToolCall]) -> Option<String> {
    pending.last().map(|call| format!("{}:{}", call.name, call.args))
}

/// Builds the literal continuation prompt synthesized when auto-summarize
/// fires while the previous step still had unfinished tool calls.
pub fn continuation_prompt(original_prompt: &str) -> String {
    format!(
        "The previous session was interrupted because it got too long, the initial user \
         request was: `{original_prompt}`"
    )
}

/// Picks the most recent assistant text, used to build the synthetic
/// continuation user message's attachments when needed.
pub fn last_assistant_text(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == orbit_core::Role::Assistant)
        .map(|m| m.text())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_core::MessagePart;

    #[test]
    fn test_tool_call_signature_from_uses_last_pending_call() {
        let pending = vec![
            ToolCall::new("t1", "read", serde_json::json!({"path": "a.rs"})),
            ToolCall::new("t2", "bash", serde_json::json!({})),
        ];
        assert_eq!(tool_call_signature_from(&pending), Some("bash:{}".to_string()));
    }

    #[test]
    fn test_tool_call_signature_from_empty() {
        assert_eq!(tool_call_signature_from(&[]), None);
    }

    #[test]
    fn test_continuation_prompt_format() {
        let prompt = continuation_prompt("fix the bug");
        assert!(prompt.contains("fix the bug"));
        assert!(prompt.starts_with("The previous session was interrupted"));
    }

    #[test]
    fn test_last_assistant_text_none_when_empty() {
        assert!(last_assistant_text(&[
            Message::user("u1", "s1").with_part(MessagePart::text("hi")),
        ])
        .is_none());
    }
}
