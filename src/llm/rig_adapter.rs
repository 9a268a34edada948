//! Adapter bridging rig-core completion models to our `LlmProvider` trait.
//!
//! Handles message conversion in both directions: our flat `ChatMessage`
//! transcript (including tool calls and re-injected tool results) maps onto
//! rig's preamble + chat-history shape, and rig's assistant content maps
//! back onto text/tool-call responses.

use async_trait::async_trait;

use rig::OneOrMany;
use rig::completion::{CompletionModel, ToolDefinition as RigToolDefinition};
use rig::message::{AssistantContent, Message, ToolResultContent, UserContent};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse,
};
use crate::llm::retry::with_retry;

/// Attempts per provider call (1 initial + 1 retry on transient failure).
const CALL_ATTEMPTS: u32 = 2;

/// Adapter wrapping a rig `CompletionModel`.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M> RigAdapter<M>
where
    M: CompletionModel + Send + Sync,
{
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }

    fn request_failed(&self, e: impl std::fmt::Display) -> LlmError {
        LlmError::RequestFailed {
            provider: self.model_name.clone(),
            reason: e.to_string(),
        }
    }

    /// Split our transcript into rig's (preamble, history, prompt) shape.
    ///
    /// Leading system messages become the preamble; the final message is the
    /// prompt; everything between is chat history.
    fn convert_messages(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<(Option<String>, Vec<Message>, Message), LlmError> {
        let mut preamble: Option<String> = None;
        let mut converted: Vec<Message> = Vec::with_capacity(messages.len());

        for msg in messages {
            match msg.role {
                Role::System => {
                    // Multiple system messages are concatenated.
                    preamble = Some(match preamble.take() {
                        Some(existing) => format!("{existing}\n\n{}", msg.content),
                        None => msg.content,
                    });
                }
                Role::User => converted.push(Message::user(msg.content)),
                Role::Assistant => {
                    if msg.tool_calls.is_empty() {
                        converted.push(Message::assistant(msg.content));
                    } else {
                        let content: Vec<AssistantContent> = msg
                            .tool_calls
                            .iter()
                            .map(|tc| {
                                AssistantContent::tool_call(
                                    tc.id.clone(),
                                    tc.name.clone(),
                                    tc.arguments.clone(),
                                )
                            })
                            .collect();
                        let content =
                            OneOrMany::many(content).map_err(|e| self.request_failed(e))?;
                        converted.push(Message::Assistant { id: None, content });
                    }
                }
                Role::Tool => {
                    let call_id = msg.tool_call_id.clone().unwrap_or_default();
                    converted.push(Message::User {
                        content: OneOrMany::one(UserContent::tool_result(
                            call_id,
                            OneOrMany::one(ToolResultContent::text(msg.content)),
                        )),
                    });
                }
            }
        }

        let prompt = converted.pop().ok_or_else(|| LlmError::InvalidResponse {
            provider: self.model_name.clone(),
            reason: "empty message list".into(),
        })?;
        Ok((preamble, converted, prompt))
    }

    async fn completion(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<RigToolDefinition>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<(Option<String>, Vec<ToolCall>, u32, u32), LlmError> {
        let (preamble, history, prompt) = self.convert_messages(messages)?;

        let mut builder = self.model.completion_request(prompt).messages(history);
        if let Some(p) = preamble {
            builder = builder.preamble(p);
        }
        if let Some(t) = temperature {
            builder = builder.temperature(t as f64);
        }
        if let Some(m) = max_tokens {
            builder = builder.max_tokens(m as u64);
        }
        if !tools.is_empty() {
            builder = builder.tools(tools);
        }
        let request = builder.build();

        let response = self
            .model
            .completion(request)
            .await
            .map_err(|e| self.request_failed(e))?;

        let mut text: Option<String> = None;
        let mut tool_calls = Vec::new();
        for content in response.choice.iter() {
            match content {
                AssistantContent::Text(t) => {
                    let piece = t.text.clone();
                    text = Some(match text.take() {
                        Some(existing) => format!("{existing}{piece}"),
                        None => piece,
                    });
                }
                AssistantContent::ToolCall(tc) => {
                    tool_calls.push(ToolCall {
                        id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        arguments: tc.function.arguments.clone(),
                    });
                }
                _ => {}
            }
        }

        let input_tokens = response.usage.input_tokens as u32;
        let output_tokens = response.usage.output_tokens as u32;
        Ok((text, tool_calls, input_tokens, output_tokens))
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (content, _calls, input_tokens, output_tokens) = with_retry(
            "complete",
            CALL_ATTEMPTS,
            || {
                self.completion(
                    request.messages.clone(),
                    Vec::new(),
                    request.temperature,
                    request.max_tokens,
                )
            },
        )
        .await?;

        Ok(CompletionResponse {
            content: content.unwrap_or_default(),
            input_tokens,
            output_tokens,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let rig_tools: Vec<RigToolDefinition> = request
            .tools
            .iter()
            .map(|t| RigToolDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect();

        let (content, tool_calls, input_tokens, output_tokens) = with_retry(
            "complete_with_tools",
            CALL_ATTEMPTS,
            || {
                self.completion(
                    request.messages.clone(),
                    rig_tools.clone(),
                    request.temperature,
                    request.max_tokens,
                )
            },
        )
        .await?;

        Ok(ToolCompletionResponse {
            content,
            tool_calls,
            input_tokens,
            output_tokens,
        })
    }
}
